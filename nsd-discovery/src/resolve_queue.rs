use std::collections::VecDeque;
use shared::types::{ServiceIdentity, ServiceRecord};

/// What the driver should do after calling [`ResolutionQueue::resolve_next`]
#[derive(Debug, Clone)]
pub enum ResolveStep {
    /// Issue exactly one resolve request for this record
    Issue(ServiceRecord),
    /// A resolve is still outstanding; wait for its answer
    InFlight,
    /// Nothing left to resolve
    Drained,
}

/// Discovered-but-unresolved records and the records resolved so far.
///
/// Drains strictly one record at a time. Both a success and a failure move on
/// to the next record, so one bad peer never stalls the rest.
#[derive(Debug, Default)]
pub struct ResolutionQueue {
    pending: VecDeque<ServiceRecord>,
    resolved: Vec<ServiceRecord>,
    in_flight: Option<ServiceIdentity>,
    enqueued: bool,
    attempts: usize,
}

impl ResolutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the one-time snapshot of discovered records.
    /// Returns false (and changes nothing) if a snapshot was already taken.
    pub fn enqueue_all(&mut self, records: impl IntoIterator<Item = ServiceRecord>) -> bool {
        if self.enqueued {
            tracing::warn!("Resolution queue already populated for this run, ignoring snapshot");
            return false;
        }
        self.enqueued = true;
        self.pending.extend(records);
        tracing::debug!("Queued {} records for resolution", self.pending.len());
        true
    }

    pub fn resolve_next(&mut self) -> ResolveStep {
        if self.in_flight.is_some() {
            return ResolveStep::InFlight;
        }

        match self.pending.pop_front() {
            Some(record) => {
                self.in_flight = Some(record.identity());
                self.attempts += 1;
                ResolveStep::Issue(record)
            }
            None => ResolveStep::Drained,
        }
    }

    /// Record a successful resolution. Answers that don't match the
    /// outstanding request are ignored; returns whether it was accepted.
    pub fn on_resolved(&mut self, record: ServiceRecord) -> bool {
        if self.in_flight.as_ref() != Some(&record.identity()) {
            tracing::debug!("Ignoring resolution for {} - not in flight", record.identity());
            return false;
        }
        self.in_flight = None;
        tracing::debug!("Resolved {}", record.identity());
        self.resolved.push(record);
        true
    }

    /// Drop the outstanding record after a failed resolution. It is not retried.
    pub fn on_failed(&mut self, identity: &ServiceIdentity, reason: &str) -> bool {
        if self.in_flight.as_ref() != Some(identity) {
            tracing::debug!("Ignoring resolve failure for {} - not in flight", identity);
            return false;
        }
        self.in_flight = None;
        tracing::warn!("Dropping {} after failed resolve: {}", identity, reason);
        true
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Resolve requests handed out so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn resolved(&self) -> &[ServiceRecord] {
        &self.resolved
    }

    pub fn into_resolved(self) -> Vec<ServiceRecord> {
        self.resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    const DRONE_TYPE: &str = "_drone._tcp.local.";

    fn found(name: &str) -> ServiceRecord {
        ServiceRecord::unresolved(name, DRONE_TYPE)
    }

    fn resolved(record: ServiceRecord) -> ServiceRecord {
        record.into_resolved(
            "drone.local.",
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))],
            5760,
            HashMap::new(),
        )
    }

    fn issued(step: ResolveStep) -> ServiceRecord {
        match step {
            ResolveStep::Issue(record) => record,
            other => panic!("expected a resolve to be issued, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_queue_drains_idempotently() {
        let mut queue = ResolutionQueue::new();
        assert!(queue.enqueue_all(Vec::new()));

        assert!(matches!(queue.resolve_next(), ResolveStep::Drained));
        assert!(matches!(queue.resolve_next(), ResolveStep::Drained));
        assert_eq!(queue.attempts(), 0);
        assert!(queue.resolved().is_empty());
    }

    #[test]
    fn test_second_snapshot_is_ignored() {
        let mut queue = ResolutionQueue::new();
        assert!(queue.enqueue_all(vec![found("a")]));
        assert!(!queue.enqueue_all(vec![found("b"), found("c")]));
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_one_request_in_flight_at_a_time() {
        let mut queue = ResolutionQueue::new();
        queue.enqueue_all(vec![found("a"), found("b")]);

        let first = issued(queue.resolve_next());
        assert_eq!(first.name, "a");
        assert!(matches!(queue.resolve_next(), ResolveStep::InFlight));
        assert_eq!(queue.pending_len(), 1);

        assert!(queue.on_resolved(resolved(first)));
        assert_eq!(issued(queue.resolve_next()).name, "b");
    }

    #[test]
    fn test_failure_drops_and_moves_on() {
        let mut queue = ResolutionQueue::new();
        queue.enqueue_all(vec![found("a"), found("b")]);

        let first = issued(queue.resolve_next());
        assert!(queue.on_failed(&first.identity(), "error code 3"));

        let second = issued(queue.resolve_next());
        assert!(queue.on_resolved(resolved(second)));
        assert!(matches!(queue.resolve_next(), ResolveStep::Drained));

        let names: Vec<_> = queue.resolved().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_stale_answers_are_ignored() {
        let mut queue = ResolutionQueue::new();
        queue.enqueue_all(vec![found("a")]);
        let first = issued(queue.resolve_next());

        assert!(!queue.on_resolved(resolved(found("zzz"))));
        assert!(!queue.on_failed(&found("zzz").identity(), "late"));
        assert!(queue.is_in_flight());

        assert!(queue.on_resolved(resolved(first.clone())));
        // A duplicate answer for the same record must not append twice
        assert!(!queue.on_resolved(resolved(first)));
        assert_eq!(queue.resolved().len(), 1);
    }

    #[test]
    fn test_drains_within_one_attempt_per_record() {
        let mut queue = ResolutionQueue::new();
        let names = ["a", "b", "c", "d", "e"];
        queue.enqueue_all(names.iter().map(|name| found(name)));

        let mut dropped = 0;
        while let ResolveStep::Issue(record) = queue.resolve_next() {
            // Every other record fails
            if queue.attempts() % 2 == 0 {
                queue.on_failed(&record.identity(), "error code 3");
                dropped += 1;
            } else {
                queue.on_resolved(resolved(record));
            }
        }

        assert_eq!(queue.attempts(), names.len());
        assert_eq!(queue.resolved().len() + dropped, names.len());
        assert_eq!(queue.pending_len(), 0);
    }
}
