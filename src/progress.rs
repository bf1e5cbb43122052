use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::collaborators::ProgressSink;
use crate::data_models::{ProgressEvent, Stage};
use crate::error::SinkClosed;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressMessage {
    #[serde(rename_all = "camelCase")]
    Connected { request_id: String },
    Progress(ProgressEvent),
    #[serde(rename_all = "camelCase")]
    Completed {
        step: u32,
        total_steps: u32,
        percentage: u32,
    },
}

impl ProgressMessage {
    pub fn completed() -> ProgressMessage {
        ProgressMessage::Completed {
            step: Stage::Done.step(),
            total_steps: Stage::ALL.len() as u32,
            percentage: Stage::Done.percentage(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressHub {
    listeners: Arc<DashMap<String, mpsc::UnboundedSender<ProgressMessage>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `request_id`, replacing any previous one.
    /// The first message is `Connected`. Dropping the subscription
    /// unregisters it.
    pub fn subscribe(&self, request_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(ProgressMessage::Connected {
            request_id: request_id.to_string(),
        });
        let own = tx.downgrade();
        self.listeners.insert(request_id.to_string(), tx);
        tracing::info!(request_id, "progress listener connected");
        Subscription {
            rx: UnboundedReceiverStream::new(rx),
            hub: self.clone(),
            request_id: request_id.to_string(),
            own,
        }
    }

    pub fn sink(&self, request_id: &str) -> HubSink {
        HubSink {
            hub: self.clone(),
            request_id: request_id.to_string(),
        }
    }

    pub fn complete(&self, request_id: &str) {
        if let Some((_, tx)) = self.listeners.remove(request_id) {
            if tx.send(ProgressMessage::completed()).is_err() {
                tracing::debug!(request_id, "listener left before completion");
            }
        }
    }

    pub fn remove(&self, request_id: &str) {
        self.listeners.remove(request_id);
    }

    pub fn is_listening(&self, request_id: &str) -> bool {
        self.listeners.contains_key(request_id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn send(&self, request_id: &str, message: ProgressMessage) -> Result<(), SinkClosed> {
        let Some(tx) = self.listeners.get(request_id).map(|tx| tx.clone()) else {
            return Ok(());
        };
        if tx.send(message).is_err() {
            self.listeners.remove(request_id);
            tracing::info!(request_id, "progress listener disconnected");
            return Err(SinkClosed);
        }
        Ok(())
    }
}

pub struct Subscription {
    rx: UnboundedReceiverStream<ProgressMessage>,
    hub: ProgressHub,
    request_id: String,
    own: mpsc::WeakUnboundedSender<ProgressMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressMessage> {
        self.rx.next().await
    }
}

impl Stream for Subscription {
    type Item = ProgressMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Only the hub holds a strong sender; if it is gone the entry is too.
        let Some(own) = self.own.upgrade() else {
            return;
        };
        // A newer subscriber under the same id keeps its entry.
        let removed = self
            .hub
            .listeners
            .remove_if(&self.request_id, |_, tx| tx.same_channel(&own));
        if removed.is_some() {
            tracing::info!(request_id = %self.request_id, "progress listener disconnected");
        }
    }
}

/// [`ProgressSink`] that forwards events to whoever listens on one id.
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct HubSink {
    hub: ProgressHub,
    request_id: String,
}

impl ProgressSink for HubSink {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed> {
        self.hub
            .send(&self.request_id, ProgressMessage::Progress(event.clone()))
    }
}
