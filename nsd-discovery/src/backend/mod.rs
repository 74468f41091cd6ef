//! The discovery primitive the pipeline sits on.
//!
//! A backend is fire-and-forget: every request reports its outcome later as a
//! [`BackendEvent`] pushed into the [`EventSink`] handed over at browse start.
//! The sink is the only way results reach the coordinator, so backends that
//! call back from their own threads never touch pipeline state directly.

pub mod mdns;

#[cfg(test)]
pub(crate) mod scripted;

use tokio::sync::mpsc;
use shared::types::ServiceRecord;

/// Outcomes reported by a backend
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Found(ServiceRecord),
    Lost(ServiceRecord),
    BrowseStartFailed(String),
    BrowseStopped,
    BrowseStopFailed(String),
    Resolved(ServiceRecord),
    ResolveFailed(ServiceRecord, String),
}

/// Channel that marshals backend callbacks onto the driving task
pub type EventSink = mpsc::UnboundedSender<BackendEvent>;

pub trait DiscoveryBackend: Send + 'static {
    /// Begin browsing for `service_type`; found/lost events go to `sink`
    fn start_browse(&mut self, service_type: &str, sink: EventSink);

    /// Stop the browse started by `start_browse`
    fn stop_browse(&mut self);

    /// Resolve a single record. Callers never have more than one outstanding.
    fn resolve(&mut self, record: ServiceRecord);
}
