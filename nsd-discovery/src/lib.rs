//! Discover peers advertising a service type on the local network, resolve
//! each one to a connectable address, and hand the results back within a
//! fixed time budget.
//!
//! A run browses for a fixed duration, freezes what it saw, resolves those
//! services one at a time, and reports once through a callback. An overall
//! deadline and a cancellation handle bound the whole thing; both yield the
//! partial result rather than an error.
//!
//! ```no_run
//! use std::time::Duration;
//! use mdns_sd::ServiceDaemon;
//! use nsd_discovery::{Discoverer, MdnsBackend};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let daemon = ServiceDaemon::new()?;
//! let discoverer = Discoverer::new(
//!     MdnsBackend::new(daemon, Duration::from_millis(500)),
//!     Duration::from_millis(1000),
//! );
//!
//! let handle = discoverer.discover("_drone._tcp", Duration::from_millis(2000), |report| {
//!     for record in &report.records {
//!         println!("{} at {:?}", record.name, record.socket_addr());
//!     }
//! })?;
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod resolve_queue;
pub mod task;

pub use backend::mdns::MdnsBackend;
pub use backend::{BackendEvent, DiscoveryBackend, EventSink};
pub use coordinator::{CoordinatorCommand, DiscoveryCoordinator, RunOutcome, RunState};
pub use resolve_queue::{ResolutionQueue, ResolveStep};
pub use task::{BoundedTask, Discoverer, DiscoveryHandle, DiscoveryReport};
