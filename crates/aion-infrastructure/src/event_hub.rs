//! In-process push bus.
//!
//! `EventHub` is the concrete [`EventSource`] the transport layer emits into:
//! every payload emitted on a channel is delivered, in order, to every live
//! subscription on that channel. Dropped subscriptions are pruned lazily.

use aion_core::error::Result;
use aion_core::event::{Channel, EventSource, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

type Listeners = HashMap<Channel, Vec<mpsc::UnboundedSender<Value>>>;

#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<Listeners>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `payload` to every live subscription on `channel`.
    ///
    /// Returns how many subscriptions received it.
    pub fn emit(&self, channel: Channel, payload: Value) -> usize {
        let mut listeners = self.lock();
        let Some(senders) = listeners.get_mut(&channel) else {
            return 0;
        };
        senders.retain(|tx| tx.send(payload.clone()).is_ok());
        trace!("[EventHub] {} delivered to {} listener(s)", channel, senders.len());
        senders.len()
    }

    /// Number of live subscriptions on `channel`.
    pub fn listener_count(&self, channel: Channel) -> usize {
        let mut listeners = self.lock();
        match listeners.get_mut(&channel) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl EventSource for EventHub {
    async fn listen(&self, channel: Channel) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().entry(channel).or_default().push(tx);
        Ok(Subscription::new(channel, rx))
    }
}
