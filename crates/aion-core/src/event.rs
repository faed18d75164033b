//! Push channels emitted by the backend.
//!
//! Payloads arrive as raw JSON values, the same way an IPC event bus delivers
//! them; consumers decode them and are expected to skip malformed ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::{AionError, Result};

/// Push channels the client listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Bytes arrived from a session's PTY.
    PtyData,
    /// A session's process exited.
    PtyExit,
    /// Something changed in the watched workspace. No payload.
    GitChanged,
    /// New usage records were stored for a session.
    TokenCaptured,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::PtyData => "pty:data",
            Channel::PtyExit => "pty:exit",
            Channel::GitChanged => "git:changed",
            Channel::TokenCaptured => "token:captured",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of [`Channel::PtyData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyDataEvent {
    pub session_id: String,
    pub data: Vec<u8>,
}

/// Payload of [`Channel::PtyExit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyExitEvent {
    pub session_id: String,
    #[serde(default)]
    pub code: Option<i32>,
}

/// Payload of [`Channel::TokenCaptured`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCapturedEvent {
    pub session_id: String,
    /// Records written by this capture
    #[serde(default)]
    pub inserts: u32,
}

impl TokenCapturedEvent {
    pub fn decode(payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| AionError::decode(e.to_string()))
    }
}

impl PtyDataEvent {
    pub fn decode(payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| AionError::decode(e.to_string()))
    }
}

impl PtyExitEvent {
    pub fn decode(payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|e| AionError::decode(e.to_string()))
    }
}

/// A live registration on one channel.
///
/// Dropping the subscription releases it; the source stops delivering to it.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn new(channel: Channel, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { channel, rx }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next payload in arrival order, `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// Something that can register listeners on push channels.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Registers a listener. Registration itself is asynchronous and may
    /// resolve after the caller has lost interest.
    async fn listen(&self, channel: Channel) -> Result<Subscription>;
}
