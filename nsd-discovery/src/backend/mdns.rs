use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use shared::protocol::instance_label;
use shared::types::ServiceRecord;
use super::{BackendEvent, DiscoveryBackend, EventSink};

/// Requests from the coordinator to the pump task
enum PumpRequest {
    Stop,
    Resolve(ServiceRecord),
}

/// mDNS backend on top of an `mdns-sd` daemon.
///
/// `mdns-sd` resolves SRV/TXT/A records on its own while browsing, so
/// "resolve" here means handing back the `ServiceInfo` the daemon produced
/// for that instance. Stopping the browse only ends found/lost reporting: the
/// daemon keeps querying until the backend is dropped, so instances still
/// resolving at the browse deadline can finish within `resolve_timeout`.
#[derive(Clone)]
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    resolve_timeout: Duration,
    /// mdns-sd stops browses by service type, not by receiver. A session holds
    /// this from its `browse` until its `stop_browse` is sent, so sessions on
    /// one daemon never overlap.
    session_gate: Arc<Mutex<()>>,
    requests: Option<mpsc::UnboundedSender<PumpRequest>>,
    sink: Option<EventSink>,
}

impl MdnsBackend {
    pub fn new(daemon: ServiceDaemon, resolve_timeout: Duration) -> Self {
        Self {
            daemon,
            resolve_timeout,
            session_gate: Arc::new(Mutex::new(())),
            requests: None,
            sink: None,
        }
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn start_browse(&mut self, service_type: &str, sink: EventSink) {
        self.sink = Some(sink.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        self.requests = Some(tx);

        tokio::spawn(browse_session(
            self.daemon.clone(),
            self.session_gate.clone(),
            service_type.to_string(),
            sink,
            self.resolve_timeout,
            rx,
        ));
    }

    fn stop_browse(&mut self) {
        if let Some(requests) = &self.requests {
            if requests.send(PumpRequest::Stop).is_err() {
                tracing::debug!("mDNS pump already gone, nothing to stop");
            }
        }
    }

    fn resolve(&mut self, record: ServiceRecord) {
        let record = match &self.requests {
            Some(requests) => match requests.send(PumpRequest::Resolve(record)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(PumpRequest::Resolve(record))) => record,
                Err(_) => return,
            },
            None => record,
        };

        if let Some(sink) = &self.sink {
            let _ = sink.send(BackendEvent::ResolveFailed(
                record,
                "mDNS browser is not running".to_string(),
            ));
        }
    }
}

/// One browse on the daemon, from `browse` to the single `stop_browse`.
/// Ends once the owning backend is dropped.
async fn browse_session(
    daemon: ServiceDaemon,
    gate: Arc<Mutex<()>>,
    service_type: String,
    sink: EventSink,
    resolve_timeout: Duration,
    requests: mpsc::UnboundedReceiver<PumpRequest>,
) {
    let _session = gate.lock_owned().await;

    let events = match daemon.browse(&service_type) {
        Ok(events) => events,
        Err(e) => {
            tracing::error!("Failed to browse {}: {}", service_type, e);
            let _ = sink.send(BackendEvent::BrowseStartFailed(e.to_string()));
            return;
        }
    };

    let still_browsing = Pump::new(service_type.clone(), sink, resolve_timeout)
        .run(&events, requests)
        .await;

    // The daemon handles commands in order, so this stop is processed before
    // the browse of whichever session takes the gate next.
    if still_browsing {
        if let Err(e) = daemon.stop_browse(&service_type) {
            tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
        }
    }
    tracing::debug!("mDNS browse session for {} ended", service_type);
}

struct Pump {
    service_type: String,
    sink: EventSink,
    resolve_timeout: Duration,
    /// Resolved infos keyed by full instance name
    cache: HashMap<String, ServiceInfo>,
    /// A resolve waiting for the daemon to finish resolving its instance
    pending: Option<(ServiceRecord, Instant)>,
    /// Daemon receiver still delivering events
    connected: bool,
    /// Found/lost still forwarded to the coordinator
    reporting: bool,
}

impl Pump {
    fn new(service_type: String, sink: EventSink, resolve_timeout: Duration) -> Self {
        Self {
            service_type,
            sink,
            resolve_timeout,
            cache: HashMap::new(),
            pending: None,
            connected: true,
            reporting: true,
        }
    }

    /// Runs until the request channel closes. Returns whether the daemon
    /// browse is still live and needs stopping.
    async fn run(
        mut self,
        events: &flume::Receiver<ServiceEvent>,
        mut requests: mpsc::UnboundedReceiver<PumpRequest>,
    ) -> bool {
        tracing::debug!("mDNS pump started for {}", self.service_type);

        loop {
            let wait_until = self.pending.as_ref().map(|(_, deadline)| *deadline);

            tokio::select! {
                // Drain daemon events first so resolves see the freshest cache
                biased;

                event = events.recv_async(), if self.connected => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            tracing::debug!("mDNS receiver for {} closed: {}", self.service_type, e);
                            self.disconnected("browse ended before the instance resolved");
                        }
                    }
                }

                request = requests.recv() => {
                    match request {
                        Some(PumpRequest::Stop) => self.stop(),
                        Some(PumpRequest::Resolve(record)) => self.resolve(record),
                        None => break,
                    }
                }

                _ = tokio::time::sleep_until(wait_until.unwrap_or_else(Instant::now)), if wait_until.is_some() => {
                    self.fail_pending("timed out waiting for resolution");
                }
            }
        }

        tracing::debug!("mDNS pump for {} stopped", self.service_type);
        self.connected
    }

    fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceFound(_typ, fullname) => {
                tracing::debug!("Service found: {}", fullname);
                if self.reporting {
                    let record = record_from_fullname(&fullname, &self.service_type);
                    let _ = self.sink.send(BackendEvent::Found(record));
                }
            }
            ServiceEvent::ServiceResolved(info) => {
                let fullname = info.get_fullname().to_string();
                tracing::debug!("Service resolved by daemon: {}", fullname);

                let answers_pending = self
                    .pending
                    .as_ref()
                    .is_some_and(|(record, _)| full_name(record) == fullname);
                if answers_pending {
                    if let Some((record, _)) = self.pending.take() {
                        self.answer(record, &info);
                    }
                }
                self.cache.insert(fullname, info);
            }
            ServiceEvent::ServiceRemoved(_typ, fullname) => {
                tracing::debug!("Service removed: {}", fullname);
                self.cache.remove(&fullname);
                if self.reporting {
                    let record = record_from_fullname(&fullname, &self.service_type);
                    let _ = self.sink.send(BackendEvent::Lost(record));
                }
            }
            ServiceEvent::SearchStopped(typ) => {
                tracing::debug!("Search stopped: {}", typ);
                self.disconnected("browse stopped before the instance resolved");
            }
            other => {
                tracing::trace!("Ignoring mDNS event: {:?}", other);
            }
        }
    }

    /// The daemon stopped delivering events without being asked to
    fn disconnected(&mut self, reason: &str) {
        self.connected = false;
        self.end_reporting();
        self.fail_pending(reason);
    }

    fn stop(&mut self) {
        self.end_reporting();
    }

    fn end_reporting(&mut self) {
        if self.reporting {
            self.reporting = false;
            let _ = self.sink.send(BackendEvent::BrowseStopped);
        }
    }

    fn resolve(&mut self, record: ServiceRecord) {
        if let Some(info) = self.cache.get(&full_name(&record)) {
            let info = info.clone();
            self.answer(record, &info);
            return;
        }

        if self.connected {
            self.fail_pending("superseded by another resolve");
            let deadline = Instant::now() + self.resolve_timeout;
            self.pending = Some((record, deadline));
        } else {
            let _ = self.sink.send(BackendEvent::ResolveFailed(
                record,
                "instance was not resolved during browse".to_string(),
            ));
        }
    }

    fn answer(&self, record: ServiceRecord, info: &ServiceInfo) {
        let event = match convert_service_info(info, record.clone()) {
            Some(resolved) => BackendEvent::Resolved(resolved),
            None => BackendEvent::ResolveFailed(record, "no addresses advertised".to_string()),
        };
        let _ = self.sink.send(event);
    }

    fn fail_pending(&mut self, reason: &str) {
        if let Some((record, _)) = self.pending.take() {
            let _ = self.sink.send(BackendEvent::ResolveFailed(record, reason.to_string()));
        }
    }
}

fn full_name(record: &ServiceRecord) -> String {
    format!("{}.{}", record.name, record.service_type)
}

fn record_from_fullname(fullname: &str, service_type: &str) -> ServiceRecord {
    ServiceRecord::unresolved(instance_label(fullname, service_type), service_type)
}

/// Fill a discovered record from an mdns-sd ServiceInfo.
/// Returns None when the daemon has no address for the instance.
fn convert_service_info(info: &ServiceInfo, record: ServiceRecord) -> Option<ServiceRecord> {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    if addresses.is_empty() {
        tracing::debug!("Skipping service {} - no addresses", info.get_fullname());
        return None;
    }
    addresses.sort();

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    Some(record.into_resolved(info.get_hostname(), addresses, info.get_port(), txt))
}
