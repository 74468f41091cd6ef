use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::protocol::qualify_service_type;
use shared::types::ServiceRecord;
use crate::backend::DiscoveryBackend;
use crate::coordinator::{CoordinatorCommand, DiscoveryCoordinator, RunOutcome};

/// What the caller's callback receives, exactly once per run
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub service_type: String,
    pub outcome: RunOutcome,
    /// Services seen when browsing ended
    pub discovered: usize,
    /// Resolved services, in resolution order
    pub records: Vec<ServiceRecord>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

mod millis {
    use std::time::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// One coordinator run bounded by an overall deadline and a cancellation token
pub struct BoundedTask<B> {
    coordinator: DiscoveryCoordinator<B>,
    service_type: String,
    deadline: Duration,
    cancel: CancellationToken,
    commands: mpsc::Sender<CoordinatorCommand>,
    command_rx: mpsc::Receiver<CoordinatorCommand>,
}

impl<B: DiscoveryBackend> BoundedTask<B> {
    pub fn new(
        backend: B,
        service_type: &str,
        browse_timeout: Duration,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(4);
        Self {
            coordinator: DiscoveryCoordinator::new(backend, service_type, browse_timeout),
            service_type: service_type.to_string(),
            deadline,
            cancel,
            commands,
            command_rx,
        }
    }

    /// Sender for steering the coordinator (e.g. ending the browse early)
    pub fn commands(&self) -> mpsc::Sender<CoordinatorCommand> {
        self.commands.clone()
    }

    /// Wait for natural completion, the deadline or cancellation, whichever
    /// comes first, and report whatever has been resolved by then.
    pub async fn run(self) -> DiscoveryReport {
        let Self {
            coordinator,
            service_type,
            deadline: limit,
            cancel,
            commands: _,
            command_rx,
        } = self;

        // Aborts travel on their own channel; queued StopBrowse requests can't crowd them out
        let (abort_tx, abort_rx) = oneshot::channel();
        let mut abort = Some(abort_tx);

        let started = Instant::now();
        let run = coordinator.run(command_rx, abort_rx);
        tokio::pin!(run);

        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);

        let report = loop {
            let armed = abort.is_some();

            tokio::select! {
                biased;

                report = &mut run => break report,

                _ = cancel.cancelled(), if armed => {
                    tracing::info!("Discovery for {} cancelled", service_type);
                    request_abort(abort.take(), RunOutcome::Cancelled);
                }

                _ = &mut deadline, if armed => {
                    tracing::warn!(
                        "Discovery for {} hit its {:?} deadline, returning partial results",
                        service_type,
                        limit
                    );
                    request_abort(abort.take(), RunOutcome::DeadlineExceeded);
                }
            }
        };

        DiscoveryReport {
            service_type,
            outcome: report.outcome,
            discovered: report.discovered,
            records: report.records,
            elapsed: started.elapsed(),
        }
    }
}

fn request_abort(abort: Option<oneshot::Sender<RunOutcome>>, outcome: RunOutcome) {
    if let Some(abort) = abort {
        if abort.send(outcome).is_err() {
            tracing::debug!("Coordinator already finished, abort not needed");
        }
    }
}

/// Handle to an in-flight discovery run
pub struct DiscoveryHandle {
    cancel: CancellationToken,
    commands: mpsc::Sender<CoordinatorCommand>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Cancel the run. The callback still fires, with whatever was resolved.
    /// Has no effect once the callback has fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// End the browse phase now and resolve what has been found so far
    pub fn stop_browsing(&self) {
        if self.commands.try_send(CoordinatorCommand::StopBrowse).is_err() {
            tracing::debug!("Discovery run already finished, ignoring stop");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the callback has run
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Discovery task failed: {}", e);
        }
    }
}

/// Entry point: runs one bounded discovery at a time on the current runtime
pub struct Discoverer<B> {
    backend: B,
    browse_timeout: Duration,
    busy: Arc<AtomicBool>,
}

impl<B: DiscoveryBackend + Clone> Discoverer<B> {
    pub fn new(backend: B, browse_timeout: Duration) -> Self {
        Self {
            backend,
            browse_timeout,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Discover and resolve `service_type` peers within `timeout`.
    ///
    /// Returns immediately; `callback` fires exactly once on a runtime worker.
    /// Fails without side effects if a run is already in flight.
    pub fn discover<F>(&self, service_type: &str, timeout: Duration, callback: F) -> Result<DiscoveryHandle>
    where
        F: FnOnce(DiscoveryReport) + Send + 'static,
    {
        if service_type.trim().is_empty() {
            bail!("Service type must not be empty");
        }
        if timeout.is_zero() {
            bail!("Discovery timeout must be greater than zero");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("Discovery must be started from within a tokio runtime")?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("Discovery already in progress");
        }
        let busy = BusyGuard(self.busy.clone());

        if timeout <= self.browse_timeout {
            tracing::warn!(
                "Timeout {:?} does not exceed the browse duration {:?}; resolution will be cut short",
                timeout,
                self.browse_timeout
            );
        }

        let service_type = qualify_service_type(service_type);
        let cancel = CancellationToken::new();
        let bounded = BoundedTask::new(
            self.backend.clone(),
            &service_type,
            self.browse_timeout,
            timeout,
            cancel.clone(),
        );
        let commands = bounded.commands();

        let task = runtime.spawn(async move {
            tracing::info!("Running discovery for {}", service_type);
            let report = bounded.run().await;
            tracing::info!(
                "Done discovering {}: {} services ({:?})",
                report.service_type,
                report.records.len(),
                report.outcome
            );
            // Free the slot first so the callback may start the next run
            drop(busy);
            callback(report);
        });

        Ok(DiscoveryHandle {
            cancel,
            commands,
            task,
        })
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
