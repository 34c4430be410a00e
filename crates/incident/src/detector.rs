//! Change detection strategies deciding which parts of a snapshot are new.
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use config::{PollConfig, PollMode};
use tracing::debug;

use crate::types::{Event, Observation, ResourceId};

/// How deep a cycle has to fetch before the detector can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDepth {
    /// The incidents page is enough.
    Incidents,
    /// Every incident's activity feed is needed too.
    Activities,
}

/// Computes the delta between what was seen before and a fresh snapshot.
///
/// Implementations own their dedup state and update it in the same call that
/// produces the events, so a cycle either applies its whole update or none.
pub trait ChangeDetector: Send + Sync + std::fmt::Debug {
    /// What the poll loop must fetch for [`ChangeDetector::detect`].
    fn depth(&self) -> FetchDepth;

    /// Return the events for everything new in `snapshot`, in page order, and
    /// remember it.
    fn detect(&mut self, snapshot: Vec<Observation>, first_poll: bool) -> Vec<Event>;

    /// Number of entries currently remembered.
    fn tracked(&self) -> usize;
}

/// Build the detector selected by the configuration.
pub fn from_config(config: &PollConfig) -> Box<dyn ChangeDetector> {
    match config.mode {
        PollMode::Incidents => Box::new(IncidentChangeDetector::default()),
        PollMode::Activities => Box::new(ActivityChangeDetector::new(config.return_first_poll)),
    }
}

/// Emits an incident whenever its change marker differs from the last one seen.
///
/// Any difference counts, including a marker that moved backwards.
#[derive(Debug, Default)]
pub struct IncidentChangeDetector {
    markers: HashMap<ResourceId, Option<DateTime<Utc>>>,
}

impl ChangeDetector for IncidentChangeDetector {
    fn depth(&self) -> FetchDepth {
        FetchDepth::Incidents
    }

    fn detect(&mut self, snapshot: Vec<Observation>, _first_poll: bool) -> Vec<Event> {
        let mut events = Vec::new();
        for Observation { incident, .. } in snapshot {
            let marker = incident.marker();
            match self.markers.insert(incident.id.clone(), marker) {
                Some(previous) if previous == marker => {}
                previous => {
                    debug!(
                        incident_id = %incident.id,
                        ?previous,
                        ?marker,
                        "incident changed"
                    );
                    events.push(Event::Incident(incident));
                }
            }
        }
        events
    }

    fn tracked(&self) -> usize {
        self.markers.len()
    }
}

/// Emits each activity at most once, paired with its incident.
///
/// Unless `return_first_poll` is set, activities present on the first poll only
/// form the baseline and are never emitted.
#[derive(Debug, Default)]
pub struct ActivityChangeDetector {
    seen: HashMap<ResourceId, HashSet<ResourceId>>,
    return_first_poll: bool,
}

impl ActivityChangeDetector {
    /// Creates a detector with an empty seen-set.
    pub fn new(return_first_poll: bool) -> Self {
        Self { seen: HashMap::new(), return_first_poll }
    }

    /// Whether `activity_id` was already recorded for `incident_id`.
    pub fn has_seen(&self, incident_id: &ResourceId, activity_id: &ResourceId) -> bool {
        self.seen.get(incident_id).is_some_and(|ids| ids.contains(activity_id))
    }
}

impl ChangeDetector for ActivityChangeDetector {
    fn depth(&self) -> FetchDepth {
        FetchDepth::Activities
    }

    fn detect(&mut self, snapshot: Vec<Observation>, first_poll: bool) -> Vec<Event> {
        let baseline = first_poll && !self.return_first_poll;
        let mut events = Vec::new();

        for Observation { incident, activities } in snapshot {
            if activities.is_empty() {
                continue;
            }
            let seen = self.seen.entry(incident.id.clone()).or_default();
            for activity in activities {
                if baseline {
                    seen.insert(activity.id);
                } else if seen.insert(activity.id.clone()) {
                    events.push(Event::Activity { incident: incident.clone(), activity });
                }
            }
        }

        if baseline {
            debug!(incidents = self.seen.len(), "recorded first poll baseline");
        }
        events
    }

    fn tracked(&self) -> usize {
        self.seen.values().map(HashSet::len).sum()
    }
}
