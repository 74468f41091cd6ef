use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use shared::types::ServiceRecord;
use crate::backend::{BackendEvent, DiscoveryBackend, EventSink};
use crate::resolve_queue::{ResolutionQueue, ResolveStep};

/// Lifecycle of a single discovery run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Browsing,
    Resolving,
    Completed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}

/// Why a run ended. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every queued record got a resolve attempt
    Completed,
    /// The overall deadline cut the run short
    DeadlineExceeded,
    /// The caller cancelled
    Cancelled,
}

/// Commands accepted by a running coordinator
#[derive(Debug, Clone, Copy)]
pub enum CoordinatorCommand {
    /// End the browse phase now instead of waiting for the browse timer
    StopBrowse,
}

/// Final result of one coordinator run
#[derive(Debug, Clone)]
pub struct CoordinatorReport {
    pub records: Vec<ServiceRecord>,
    pub state: RunState,
    pub outcome: RunOutcome,
    /// Size of the discovered set at hand-off
    pub discovered: usize,
}

/// Records currently believed present, deduplicated by identity.
/// Kept in first-seen order so resolution order is predictable.
#[derive(Debug, Default)]
pub struct DiscoveredSet {
    records: Vec<ServiceRecord>,
}

impl DiscoveredSet {
    /// Returns false if the identity was already present
    pub fn insert(&mut self, record: ServiceRecord) -> bool {
        if self.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Returns false if the identity was not present
    pub fn remove(&mut self, record: &ServiceRecord) -> bool {
        let before = self.records.len();
        self.records.retain(|existing| !existing.same_identity(record));
        self.records.len() != before
    }

    pub fn contains(&self, record: &ServiceRecord) -> bool {
        self.records.iter().any(|existing| existing.same_identity(record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ServiceRecord> {
        self.records.clone()
    }
}

/// Drives one browse → resolve run against a backend.
///
/// All state lives here and is only touched from the task running
/// [`DiscoveryCoordinator::run`]; backend results arrive as events on the
/// coordinator's own channel.
pub struct DiscoveryCoordinator<B> {
    service_type: String,
    browse_timeout: Duration,
    backend: B,
    state: RunState,
    outcome: Option<RunOutcome>,
    discovered: DiscoveredSet,
    handed_off: usize,
    queue: ResolutionQueue,
    events_tx: EventSink,
    events_rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl<B: DiscoveryBackend> DiscoveryCoordinator<B> {
    pub fn new(backend: B, service_type: impl Into<String>, browse_timeout: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            service_type: service_type.into(),
            browse_timeout,
            backend,
            state: RunState::Idle,
            outcome: None,
            discovered: DiscoveredSet::default(),
            handed_off: 0,
            queue: ResolutionQueue::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn discovered(&self) -> &DiscoveredSet {
        &self.discovered
    }

    pub fn queue(&self) -> &ResolutionQueue {
        &self.queue
    }

    fn advance(&mut self, next: RunState) {
        if next <= self.state {
            tracing::debug!("Ignoring transition {:?} -> {:?}", self.state, next);
            return;
        }
        tracing::debug!("Discovery run {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Idle -> Browsing
    pub fn start(&mut self) {
        if self.state != RunState::Idle {
            tracing::warn!("Discovery run already started ({:?})", self.state);
            return;
        }
        tracing::info!("Browsing for {} ({:?})", self.service_type, self.browse_timeout);
        self.advance(RunState::Browsing);
        self.backend.start_browse(&self.service_type, self.events_tx.clone());
    }

    /// Browsing -> Resolving: freeze the discovered set and start draining it
    pub fn stop(&mut self) {
        if self.state != RunState::Browsing {
            tracing::debug!("Stop requested while {:?}, nothing to do", self.state);
            return;
        }
        self.backend.stop_browse();
        self.hand_off(self.discovered.snapshot());
    }

    /// Finish now, keeping whatever has been resolved
    pub fn abort(&mut self, outcome: RunOutcome) {
        if self.state.is_terminal() {
            return;
        }
        if self.state == RunState::Browsing {
            self.backend.stop_browse();
        }
        tracing::info!(
            "Discovery run for {} aborted ({:?}) with {} resolved, {} not attempted{}",
            self.service_type,
            outcome,
            self.queue.resolved().len(),
            self.queue.pending_len(),
            if self.queue.is_in_flight() { ", one resolve abandoned" } else { "" }
        );
        self.outcome = Some(outcome);
        self.advance(RunState::Cancelled);
    }

    pub fn handle_event(&mut self, event: BackendEvent) {
        if self.state.is_terminal() {
            tracing::debug!("Ignoring late backend event after run ended: {:?}", event);
            return;
        }

        match event {
            BackendEvent::Found(record) => {
                if self.state != RunState::Browsing {
                    tracing::debug!("Ignoring {} found after browse ended", record.identity());
                    return;
                }
                if self.discovered.insert(record) {
                    tracing::debug!("Discovered set now holds {}", self.discovered.len());
                }
            }
            BackendEvent::Lost(record) => {
                if self.state != RunState::Browsing {
                    return;
                }
                if self.discovered.remove(&record) {
                    tracing::debug!("Lost {}", record.identity());
                }
            }
            BackendEvent::BrowseStartFailed(reason) => {
                tracing::error!("Start discovery failed for {}: {}", self.service_type, reason);
                if self.state == RunState::Browsing {
                    self.hand_off(Vec::new());
                }
            }
            BackendEvent::BrowseStopped => {
                if self.state == RunState::Browsing {
                    // Stopped underneath us; resolve what was seen so far
                    tracing::warn!("Discovery for {} stopped before the browse timer", self.service_type);
                    self.hand_off(self.discovered.snapshot());
                } else {
                    tracing::debug!("Discovery stopped for {}", self.service_type);
                }
            }
            BackendEvent::BrowseStopFailed(reason) => {
                tracing::error!("Stop discovery failed for {}: {}", self.service_type, reason);
            }
            BackendEvent::Resolved(record) => {
                if self.state == RunState::Resolving && self.queue.on_resolved(record) {
                    self.drive();
                }
            }
            BackendEvent::ResolveFailed(record, reason) => {
                if self.state == RunState::Resolving
                    && self.queue.on_failed(&record.identity(), &reason)
                {
                    self.drive();
                }
            }
        }
    }

    fn hand_off(&mut self, snapshot: Vec<ServiceRecord>) {
        self.handed_off = snapshot.len();
        tracing::info!(
            "Browse for {} finished, resolving {} services",
            self.service_type,
            self.handed_off
        );
        self.advance(RunState::Resolving);
        self.queue.enqueue_all(snapshot);
        self.drive();
    }

    fn drive(&mut self) {
        match self.queue.resolve_next() {
            ResolveStep::Issue(record) => {
                tracing::debug!("Resolving {}", record.identity());
                self.backend.resolve(record);
            }
            ResolveStep::InFlight => {}
            ResolveStep::Drained => {
                tracing::info!(
                    "Finished resolving {}: {} of {} resolved in {} attempts",
                    self.service_type,
                    self.queue.resolved().len(),
                    self.handed_off,
                    self.queue.attempts()
                );
                self.outcome = Some(RunOutcome::Completed);
                self.advance(RunState::Completed);
            }
        }
    }

    /// Run to a terminal state. Browsing ends on the browse timer or a
    /// `StopBrowse` command; a value on `abort` ends the run at once.
    /// Dropping the abort sender without sending leaves the run to finish.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<CoordinatorCommand>,
        mut abort: oneshot::Receiver<RunOutcome>,
    ) -> CoordinatorReport {
        self.start();

        let browse_timer = tokio::time::sleep(self.browse_timeout);
        tokio::pin!(browse_timer);
        let mut abort_armed = true;

        while !self.state.is_terminal() {
            let browsing = self.state == RunState::Browsing;

            tokio::select! {
                // Abort first so it is seen before the next resolve goes out
                biased;

                outcome = &mut abort, if abort_armed => {
                    abort_armed = false;
                    if let Ok(outcome) = outcome {
                        self.abort(outcome);
                    }
                }

                Some(command) = commands.recv() => {
                    match command {
                        CoordinatorCommand::StopBrowse => self.stop(),
                    }
                }

                _ = &mut browse_timer, if browsing => {
                    self.stop();
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }

        self.into_report()
    }

    pub fn into_report(self) -> CoordinatorReport {
        let outcome = self.outcome.unwrap_or(RunOutcome::Cancelled);
        CoordinatorReport {
            state: self.state,
            outcome,
            discovered: self.handed_off,
            records: self.queue.into_resolved(),
        }
    }
}
