use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::mpsc;

use crate::types::Event;

/// Destination of emitted events, owned by the host.
///
/// `put` may suspend the poller, e.g. while a bounded queue is full. An error
/// means nobody will ever consume events again and stops the poller.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    async fn put(&self, event: Event) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<Event> {
    async fn put(&self, event: Event) -> Result<()> {
        self.send(event).await.map_err(|_| eyre!("event sink closed"))
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<Event> {
    async fn put(&self, event: Event) -> Result<()> {
        self.send(event).map_err(|_| eyre!("event sink closed"))
    }
}
