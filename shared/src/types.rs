use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// The (name, service type) pair that tells one advertiser from another,
/// regardless of whether it has been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Instance name, e.g. "Drone 1"
    pub name: String,

    /// Fully-qualified service type, e.g. "_drone._tcp.local."
    pub service_type: String,
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.service_type)
    }
}

/// One advertised service instance.
/// Host, addresses and port are only populated once the record is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,

    pub service_type: String,

    /// Hostname, e.g. "drone-1.local."
    pub hostname: Option<String>,

    /// Addresses the hostname resolved to
    pub addresses: Vec<IpAddr>,

    pub port: Option<u16>,

    /// TXT record key-value pairs
    pub attributes: HashMap<String, String>,

    /// When resolution succeeded
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ServiceRecord {
    /// A freshly discovered record with no resolution data
    pub fn unresolved(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            hostname: None,
            addresses: Vec::new(),
            port: None,
            attributes: HashMap::new(),
            resolved_at: None,
        }
    }

    /// Attach resolution data, stamping the resolution time
    pub fn into_resolved(
        mut self,
        hostname: impl Into<String>,
        addresses: Vec<IpAddr>,
        port: u16,
        attributes: HashMap<String, String>,
    ) -> Self {
        self.hostname = Some(hostname.into());
        self.addresses = addresses;
        self.port = Some(port);
        self.attributes = attributes;
        self.resolved_at = Some(Utc::now());
        self
    }

    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            name: self.name.clone(),
            service_type: self.service_type.clone(),
        }
    }

    /// Identity equality, independent of resolution state
    pub fn same_identity(&self, other: &ServiceRecord) -> bool {
        self.name == other.name && self.service_type == other.service_type
    }

    pub fn is_resolved(&self) -> bool {
        self.port.is_some() && self.hostname.is_some()
    }

    /// Returns the primary address (prefer IPv4)
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
    }

    /// Connectable address, if the record is resolved and has one
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.primary_address()?, self.port?))
    }
}
