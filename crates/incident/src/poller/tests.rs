use super::*;
use crate::{
    detector::{ActivityChangeDetector, IncidentChangeDetector},
    types::Event,
};
use eyre::eyre;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::{sync::mpsc, time::Instant};

/// In-memory incident source whose contents tests change between cycles.
#[derive(Debug, Default)]
struct FakeSource {
    incidents: Mutex<Vec<Incident>>,
    activities: Mutex<HashMap<ResourceId, Vec<Activity>>>,
    failing_activities: Mutex<HashSet<ResourceId>>,
    failing_incidents: Mutex<bool>,
    activity_delays: Mutex<HashMap<ResourceId, Duration>>,
    incident_fetches: Mutex<Vec<Instant>>,
    activity_fetches: Mutex<Vec<ResourceId>>,
}

impl FakeSource {
    fn set_incidents(&self, incidents: Vec<Incident>) {
        *self.incidents.lock().unwrap() = incidents;
    }

    fn set_activities(&self, incident_id: &str, ids: &[&str]) {
        self.activities
            .lock()
            .unwrap()
            .insert(incident_id.into(), ids.iter().map(|id| activity(id)).collect());
    }
}

#[async_trait]
impl IncidentSource for Arc<FakeSource> {
    async fn incidents(&self) -> Result<Vec<Incident>> {
        self.incident_fetches.lock().unwrap().push(Instant::now());
        if *self.failing_incidents.lock().unwrap() {
            return Err(eyre!("HTTP status 500 Internal Server Error: boom"));
        }
        Ok(self.incidents.lock().unwrap().clone())
    }

    async fn activities(&self, incident_id: &ResourceId) -> Result<Vec<Activity>> {
        self.activity_fetches.lock().unwrap().push(incident_id.clone());
        let delay = self.activity_delays.lock().unwrap().get(incident_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_activities.lock().unwrap().contains(incident_id) {
            return Err(eyre!("HTTP status 404 Not Found"));
        }
        Ok(self.activities.lock().unwrap().get(incident_id).cloned().unwrap_or_default())
    }
}

fn incident(id: &str, changed_at: i64) -> Incident {
    serde_json::from_value(json!({
        "id": id,
        "status": "critical",
        "changed_at": changed_at,
        "updated_at": changed_at,
    }))
    .unwrap()
}

fn activity(id: &str) -> Activity {
    serde_json::from_value(json!({"id": id})).unwrap()
}

fn incident_poller(source: &Arc<FakeSource>) -> Poller<Arc<FakeSource>> {
    Poller::new(
        Arc::clone(source),
        Box::new(IncidentChangeDetector::default()),
        Duration::from_secs(60),
    )
}

fn activity_poller(source: &Arc<FakeSource>, return_first_poll: bool) -> Poller<Arc<FakeSource>> {
    Poller::new(
        Arc::clone(source),
        Box::new(ActivityChangeDetector::new(return_first_poll)),
        Duration::from_secs(60),
    )
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::Incident(incident) => out.push((incident.id.to_string(), String::new())),
            Event::Activity { incident, activity } => {
                out.push((incident.id.to_string(), activity.id.to_string()))
            }
        }
    }
    out
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items.iter().map(|(i, a)| ((*i).to_owned(), (*a).to_owned())).collect()
}

#[tokio::test]
async fn incident_mode_unchanged_snapshot_is_quiet() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 10), incident("I2", 20)]);
    let mut poller = incident_poller(&source);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = poller.poll_once(&tx).await.unwrap();
    assert_eq!(first.events, 2);
    assert_eq!(drain(&mut rx), pairs(&[("I1", ""), ("I2", "")]));

    let second = poller.poll_once(&tx).await.unwrap();
    assert_eq!(second, CycleReport { incidents: 2, ..Default::default() });
    assert!(drain(&mut rx).is_empty());
    assert!(source.activity_fetches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn incident_mode_reemits_changed_incident_once() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 10), incident("I2", 20)]);
    let mut poller = incident_poller(&source);
    let (tx, mut rx) = mpsc::unbounded_channel();
    poller.poll_once(&tx).await.unwrap();
    drain(&mut rx);

    source.set_incidents(vec![incident("I1", 11), incident("I2", 20)]);
    poller.poll_once(&tx).await.unwrap();
    assert_eq!(drain(&mut rx), pairs(&[("I1", "")]));

    poller.poll_once(&tx).await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn activity_mode_suppresses_first_poll() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1)]);
    source.set_activities("I1", &["A1", "A2"]);
    let mut poller = activity_poller(&source, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = poller.poll_once(&tx).await.unwrap();
    assert_eq!(report.events, 0);
    assert_eq!(poller.tracked(), 2);

    source.set_activities("I1", &["A1", "A2", "A3"]);
    poller.poll_once(&tx).await.unwrap();
    assert_eq!(drain(&mut rx), pairs(&[("I1", "A3")]));
}

#[tokio::test]
async fn activity_mode_returns_first_poll_when_enabled() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1)]);
    source.set_activities("I1", &["A1", "A2"]);
    let mut poller = activity_poller(&source, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    poller.poll_once(&tx).await.unwrap();
    assert_eq!(drain(&mut rx), pairs(&[("I1", "A1"), ("I1", "A2")]));

    for _ in 0..3 {
        poller.poll_once(&tx).await.unwrap();
    }
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn activity_failure_is_isolated_to_its_incident() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1), incident("I2", 1)]);
    source.set_activities("I1", &["A1"]);
    source.failing_activities.lock().unwrap().insert("I2".into());
    let mut poller = activity_poller(&source, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = poller.poll_once(&tx).await.unwrap();

    assert_eq!(report.failed_activity_fetches, 1);
    assert_eq!(drain(&mut rx), pairs(&[("I1", "A1")]));
    assert_eq!(
        *source.activity_fetches.lock().unwrap(),
        vec![ResourceId::from("I1"), ResourceId::from("I2")]
    );
}

#[tokio::test]
async fn failed_incident_fetch_skips_cycle_and_ends_first_poll() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1)]);
    source.set_activities("I1", &["A1"]);
    *source.failing_incidents.lock().unwrap() = true;
    let mut poller = activity_poller(&source, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = poller.poll_once(&tx).await.unwrap();
    assert!(report.skipped);
    assert!(source.activity_fetches.lock().unwrap().is_empty());

    *source.failing_incidents.lock().unwrap() = false;
    poller.poll_once(&tx).await.unwrap();
    assert_eq!(drain(&mut rx), pairs(&[("I1", "A1")]));
}

#[tokio::test(start_paused = true)]
async fn concurrent_activity_fetches_keep_page_order() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1), incident("I2", 1), incident("I3", 1)]);
    for id in ["I1", "I2", "I3"] {
        source.set_activities(id, &["A1"]);
    }
    {
        let mut delays = source.activity_delays.lock().unwrap();
        delays.insert("I1".into(), Duration::from_millis(300));
        delays.insert("I2".into(), Duration::from_millis(100));
    }
    let mut poller = activity_poller(&source, true).with_activity_concurrency(3);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    poller.poll_once(&tx).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(drain(&mut rx), pairs(&[("I1", "A1"), ("I2", "A1"), ("I3", "A1")]));
}

#[tokio::test]
async fn closed_sink_stops_the_poller() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1)]);
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let result = incident_poller(&source).run_until(tx, std::future::pending()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn cycles_are_spaced_by_interval() {
    let source = Arc::new(FakeSource::default());
    source.set_incidents(vec![incident("I1", 1)]);
    let poller = Poller::new(
        Arc::clone(&source),
        Box::new(IncidentChangeDetector::default()),
        Duration::from_secs(10),
    );
    let (tx, _rx) = mpsc::unbounded_channel();

    let handle = poller.spawn(tx);
    tokio::time::sleep(Duration::from_secs(35)).await;
    handle.shutdown().await.unwrap();

    let starts = source.incident_fetches.lock().unwrap().clone();
    assert!(starts.len() >= 3, "only {} cycles ran", starts.len());
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(10));
    }
}

#[tokio::test]
async fn shutdown_interrupts_long_sleep() {
    let source = Arc::new(FakeSource::default());
    let poller = Poller::new(
        Arc::clone(&source),
        Box::new(IncidentChangeDetector::default()),
        Duration::from_secs(3600),
    );
    let (tx, _rx) = mpsc::unbounded_channel();

    let handle = poller.spawn(tx);
    while source.incident_fetches.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("poller should stop without waiting out the interval")
        .unwrap();
}

fn assert_send<T: Send>(_: &T) {}

fn assert_sync<T: Sync>() {}

#[test]
fn poll_loop_future_can_be_spawned() {
    assert_sync::<Poller<Arc<FakeSource>>>();
    assert_sync::<Poller<Client>>();

    let source = Arc::new(FakeSource::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let run = activity_poller(&source, false).run_until(tx, std::future::pending::<()>());
    assert_send(&run);
}
