//! Incident crate: BigPanda polling, change detection and event delivery.
#![allow(clippy::uninlined_format_args)]
/// BigPanda API client
pub mod client;
/// Change detection strategies
pub mod detector;
/// Poll loop driving fetches, detection and emission
pub mod poller;
/// Event sinks owned by the host
pub mod sink;
/// Incident, activity and event types
pub mod types;

pub use client::Client;
pub use detector::{ActivityChangeDetector, ChangeDetector, FetchDepth, IncidentChangeDetector};
pub use poller::{CycleReport, IncidentSource, Poller, PollerHandle};
pub use sink::EventSink;
pub use types::{Activity, Event, Incident, Observation, ResourceId};
