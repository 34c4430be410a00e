use std::{future::Future, time::Duration};

use async_trait::async_trait;
use config::PollConfig;
use eyre::{Context, Result};
use futures::stream::{self, StreamExt};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    client::Client,
    detector::{self, ChangeDetector, FetchDepth},
    sink::EventSink,
    types::{Activity, Incident, Observation, ResourceId},
};

#[cfg(test)]
mod tests;

/// Where a poller reads incident state from.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Fetch the current page of active incidents.
    async fn incidents(&self) -> Result<Vec<Incident>>;

    /// Fetch the activity feed of one incident.
    async fn activities(&self, incident_id: &ResourceId) -> Result<Vec<Activity>>;
}

#[async_trait]
impl IncidentSource for Client {
    async fn incidents(&self) -> Result<Vec<Incident>> {
        self.fetch_incidents().await
    }

    async fn activities(&self, incident_id: &ResourceId) -> Result<Vec<Activity>> {
        self.fetch_activities(incident_id).await
    }
}

/// Outcome of a single poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// The incidents fetch failed and the cycle was skipped
    pub skipped: bool,
    /// Incidents on the fetched page
    pub incidents: usize,
    /// Events delivered to the sink
    pub events: usize,
    /// Incidents whose activities could not be fetched
    pub failed_activity_fetches: usize,
}

/// Polls incident state at a fixed interval and pushes what is new to a sink.
///
/// Exactly one cycle runs at a time. Fetch failures only cost the affected
/// cycle (or incident); the loop keeps going until it is cancelled or the sink
/// closes.
#[derive(Debug)]
pub struct Poller<S> {
    source: S,
    detector: Box<dyn ChangeDetector>,
    interval: Duration,
    activity_concurrency: usize,
    first_poll: bool,
}

impl Poller<Client> {
    /// Build a BigPanda poller from a validated configuration.
    pub fn from_config(config: &PollConfig) -> Result<Self> {
        config.validate()?;
        let poller =
            Self::new(Client::from_config(config)?, detector::from_config(config), config.interval())
                .with_activity_concurrency(config.activity_concurrency);
        Ok(poller)
    }
}

impl<S: IncidentSource> Poller<S> {
    /// Creates a new poller with an empty dedup state.
    pub fn new(source: S, detector: Box<dyn ChangeDetector>, interval: Duration) -> Self {
        Self { source, detector, interval, activity_concurrency: 1, first_poll: true }
    }

    /// Allow up to `limit` activity requests in flight within one cycle.
    pub fn with_activity_concurrency(mut self, limit: usize) -> Self {
        self.activity_concurrency = limit.max(1);
        self
    }

    /// Sleep between two cycles.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of incidents or activities remembered so far.
    pub fn tracked(&self) -> usize {
        self.detector.tracked()
    }

    /// Run one fetch-diff-emit cycle.
    ///
    /// Only a closed sink is an error; fetch failures are logged and reported in
    /// the returned [`CycleReport`]. The first call counts as the first poll
    /// even if its incidents fetch fails.
    pub async fn poll_once<K: EventSink + ?Sized>(&mut self, sink: &K) -> Result<CycleReport> {
        let first_poll = std::mem::replace(&mut self.first_poll, false);
        let mut report = CycleReport::default();

        let incidents = match self.source.incidents().await {
            Ok(incidents) => incidents,
            Err(e) => {
                error!(error = %format_args!("{e:#}"), "failed to fetch incidents, skipping cycle");
                report.skipped = true;
                return Ok(report);
            }
        };
        report.incidents = incidents.len();

        let snapshot = match self.detector.depth() {
            FetchDepth::Incidents => incidents.into_iter().map(Observation::bare).collect(),
            FetchDepth::Activities => self.observe_activities(incidents, &mut report).await,
        };

        let events = self.detector.detect(snapshot, first_poll);
        report.events = events.len();
        for event in events {
            sink.put(event).await?;
        }

        Ok(report)
    }

    /// Fetch every incident's activities, keeping page order.
    async fn observe_activities(
        &self,
        incidents: Vec<Incident>,
        report: &mut CycleReport,
    ) -> Vec<Observation> {
        let source = &self.source;
        let fetched: Vec<_> = stream::iter(incidents)
            .map(|incident| async move {
                let activities = source.activities(&incident.id).await;
                (incident, activities)
            })
            .buffered(self.activity_concurrency)
            .collect()
            .await;

        fetched
            .into_iter()
            .map(|(incident, activities)| match activities {
                Ok(activities) => Observation { incident, activities },
                Err(e) => {
                    warn!(
                        incident_id = %incident.id,
                        error = %format_args!("{e:#}"),
                        "failed to fetch activities"
                    );
                    report.failed_activity_fetches += 1;
                    Observation::bare(incident)
                }
            })
            .collect()
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Cancellation is observed while sleeping between cycles, so a cycle in
    /// progress always finishes first.
    pub async fn run_until<K, F>(mut self, sink: K, shutdown: F) -> Result<()>
    where
        K: EventSink,
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        info!(
            interval_secs = self.interval.as_secs(),
            depth = ?self.detector.depth(),
            "poller started"
        );

        loop {
            let report = self.poll_once(&sink).await?;
            if report.events > 0 {
                info!(
                    incidents = report.incidents,
                    events = report.events,
                    failed_activity_fetches = report.failed_activity_fetches,
                    "emitted new events"
                );
            } else {
                debug!(?report, tracked = self.tracked(), "poll cycle complete");
            }

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("shutdown requested, poller stopped");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Spawn the poller on the Tokio runtime.
    ///
    /// The loop stops when [`PollerHandle::shutdown`] is called or the handle
    /// is dropped.
    pub fn spawn<K>(self, sink: K) -> PollerHandle
    where
        S: 'static,
        K: EventSink + 'static,
    {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(sink, async move {
            stopped.await.ok();
        }));
        PollerHandle { stop, task }
    }
}

/// Handle to a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl PollerHandle {
    /// Whether the poller has exited on its own (sink closed or panic).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request the poller to stop and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        self.stop.send(()).ok();
        self.task.await.wrap_err("poller task failed")?
    }
}
