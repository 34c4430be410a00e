//! Incident, activity and event types exchanged with BigPanda and the host.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque identifier of an incident or an activity.
///
/// BigPanda hands out string ids, but numeric ids are accepted and serialized
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    /// Numeric id
    Number(i64),
    /// String id
    Text(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_owned())
    }
}

/// An active incident as returned by the incidents endpoint.
///
/// Only the id is typed; `status`, `changed_at`, `updated_at` and everything
/// else stay raw JSON so an emitted incident is exactly the fetched one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident id
    pub id: ResourceId,
    /// Every other field, passed through verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Incident {
    /// Incident status (e.g. `critical`, `warning`), if it is a string.
    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Last time the incident changed state.
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get("changed_at").and_then(parse_timestamp)
    }

    /// Last time any incident field was updated.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get("updated_at").and_then(parse_timestamp)
    }

    /// Change marker used by incident-level dedup: the later of `changed_at`
    /// and `updated_at`. Timestamps that cannot be read count as absent.
    pub fn marker(&self) -> Option<DateTime<Utc>> {
        self.changed_at().max(self.updated_at())
    }
}

/// Read a timestamp given as unix seconds (integer, float or numeric string)
/// or as an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(secs) => DateTime::from_timestamp(secs, 0),
            None => n.as_f64().and_then(from_fractional_secs),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return DateTime::from_timestamp(secs, 0);
            }
            if let Ok(secs) = s.parse::<f64>() {
                return from_fractional_secs(secs);
            }
            DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn from_fractional_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// One entry of an incident's activity feed (note, status change, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity id, unique within its incident
    pub id: ResourceId,
    /// Every other field, passed through verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A unit pushed to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    /// A new or changed incident.
    Incident(Incident),
    /// A new activity on an incident.
    Activity {
        /// The incident the activity belongs to
        incident: Incident,
        /// The new activity
        activity: Activity,
    },
}

/// One incident of a fetched page together with its activities.
///
/// `activities` stays empty when the detector does not ask for them or when
/// fetching them failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// The fetched incident
    pub incident: Incident,
    /// The incident's activities, in response order
    pub activities: Vec<Activity>,
}

impl Observation {
    /// Observation of an incident without activities.
    pub const fn bare(incident: Incident) -> Self {
        Self { incident, activities: Vec::new() }
    }
}

/// A page of results; BigPanda wraps every list in an `items` array.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub(crate) items: Vec<T>,
}
