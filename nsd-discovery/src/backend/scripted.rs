//! In-process backend for tests: replays a browse script and answers
//! resolves after a fixed delay, recording every request it receives.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use shared::types::ServiceRecord;
use super::{BackendEvent, DiscoveryBackend, EventSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    StartBrowse(String),
    StopBrowse,
    Resolve(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Found(&'static str),
    Lost(&'static str),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub start_fails: bool,
    /// Browse events, each delivered at its offset from browse start
    pub browse: Vec<(Duration, Step)>,
    pub resolve_delay: Duration,
    /// Instance names whose resolve always fails
    pub failing: HashSet<&'static str>,
    /// Only record calls; the test feeds events itself
    pub manual: bool,
}

#[derive(Clone)]
pub(crate) struct ScriptedBackend {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<Call>>>,
    sink: Option<EventSink>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
            sink: None,
        }
    }

    pub fn manual() -> Self {
        Self::new(Script {
            manual: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn resolve_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Resolve(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DiscoveryBackend for ScriptedBackend {
    fn start_browse(&mut self, service_type: &str, sink: EventSink) {
        self.record(Call::StartBrowse(service_type.to_string()));
        self.sink = Some(sink.clone());

        if self.script.manual {
            return;
        }
        if self.script.start_fails {
            let _ = sink.send(BackendEvent::BrowseStartFailed("error code 0".to_string()));
            return;
        }

        let steps = self.script.browse.clone();
        let service_type = service_type.to_string();
        let started = Instant::now();
        tokio::spawn(async move {
            for (offset, step) in steps {
                tokio::time::sleep_until(started + offset).await;
                let event = match step {
                    Step::Found(name) => {
                        BackendEvent::Found(ServiceRecord::unresolved(name, &service_type))
                    }
                    Step::Lost(name) => {
                        BackendEvent::Lost(ServiceRecord::unresolved(name, &service_type))
                    }
                };
                let _ = sink.send(event);
            }
        });
    }

    fn stop_browse(&mut self) {
        self.record(Call::StopBrowse);
        if self.script.manual {
            return;
        }
        if let Some(sink) = &self.sink {
            let _ = sink.send(BackendEvent::BrowseStopped);
        }
    }

    fn resolve(&mut self, record: ServiceRecord) {
        self.record(Call::Resolve(record.name.clone()));
        if self.script.manual {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let fails = self.script.failing.contains(record.name.as_str());
        let delay = self.script.resolve_delay;
        let host = self.resolve_count() as u8;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = if fails {
                BackendEvent::ResolveFailed(record, "error code 3".to_string())
            } else {
                let hostname = format!("{}.local.", record.name.to_lowercase().replace(' ', "-"));
                BackendEvent::Resolved(record.into_resolved(
                    hostname,
                    vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, host))],
                    5760,
                    HashMap::new(),
                ))
            };
            let _ = sink.send(event);
        });
    }
}
