//! Bridges the backend's PTY push channels into the session store.
//!
//! Two listener tasks live as long as the bridge: one for data, one for exits.
//! Teardown cancels both; a registration that only completes after teardown
//! started is released on the spot.

use aion_core::event::{Channel, EventSource, PtyDataEvent, PtyExitEvent, Subscription};
use aion_core::session::{SessionStatus, detect_agent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session_store::{SessionStore, StoreEvent};

/// Incremental UTF-8 decoder for one byte stream.
///
/// A character split across two pushes is held back until its remaining bytes
/// arrive. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `bytes` (prefixed by any held-back tail) as possible.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// One decoder per session stream, dropped once the session leaves the store.
#[derive(Debug, Default)]
struct SessionDecoders {
    decoders: HashMap<String, Utf8StreamDecoder>,
}

impl SessionDecoders {
    fn push(&mut self, session_id: &str, bytes: &[u8]) -> String {
        self.decoders
            .entry(session_id.to_string())
            .or_default()
            .push(bytes)
    }

    fn forget(&mut self, session_id: &str) {
        self.decoders.remove(session_id);
    }

    /// Drops the decoders, and any held-back bytes, of removed sessions.
    async fn prune(&mut self, store: &SessionStore) {
        if self.decoders.is_empty() {
            return;
        }
        let known: HashSet<String> = store
            .read(|r| r.sessions().iter().map(|s| s.id.clone()).collect())
            .await;
        self.decoders.retain(|id, _| known.contains(id));
    }

    fn len(&self) -> usize {
        self.decoders.len()
    }
}

/// Owns the PTY listener tasks.
pub struct EventBridge {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EventBridge {
    /// Subscribes to `pty:data` and `pty:exit` and starts feeding `store`.
    pub fn start(source: Arc<dyn EventSource>, store: SessionStore) -> Self {
        let cancel = CancellationToken::new();
        info!("[EventBridge] Starting PTY listeners");

        let data_task = {
            let source = source.clone();
            let store = store.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Some(sub) = subscribe(source.as_ref(), Channel::PtyData, &cancel).await {
                    run_data_listener(sub, store, cancel).await;
                }
            })
        };

        let exit_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Some(sub) = subscribe(source.as_ref(), Channel::PtyExit, &cancel).await {
                    run_exit_listener(sub, store, cancel).await;
                }
            })
        };

        Self {
            cancel,
            tasks: vec![data_task, exit_task],
        }
    }

    /// Begins teardown without waiting for the listeners to finish.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tears down and waits for both listeners to release their subscriptions.
    pub async fn shutdown(mut self) {
        self.teardown();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("[EventBridge] Listener task ended abnormally: {}", e);
            }
        }
        info!("[EventBridge] PTY listeners stopped");
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Registers on `channel`, giving the subscription back only if the bridge is
/// still alive once registration resolves.
async fn subscribe(
    source: &dyn EventSource,
    channel: Channel,
    cancel: &CancellationToken,
) -> Option<Subscription> {
    let sub = match source.listen(channel).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!("[EventBridge] Failed to listen on {}: {}", channel, e);
            return None;
        }
    };

    if cancel.is_cancelled() {
        debug!(
            "[EventBridge] Subscription to {} resolved after teardown, releasing",
            channel
        );
        drop(sub);
        return None;
    }
    Some(sub)
}

async fn run_data_listener(mut sub: Subscription, store: SessionStore, cancel: CancellationToken) {
    let mut decoders = SessionDecoders::default();
    let mut events = store.subscribe();

    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = sub.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            event = events.recv() => {
                match event {
                    Ok(StoreEvent::SessionsChanged) | Err(RecvError::Lagged(_)) => {
                        decoders.prune(&store).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                }
                continue;
            }
        };

        let event = match PtyDataEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                debug!("[EventBridge] Skipping undecodable pty:data payload: {}", e);
                continue;
            }
        };

        let text = decoders.push(&event.session_id, &event.data);
        if text.is_empty() {
            continue;
        }

        let outcome = store.append_output(&event.session_id, text.as_str()).await;
        if !outcome.appended {
            debug!(
                "[EventBridge] Dropping output for unknown session {}",
                event.session_id
            );
            decoders.forget(&event.session_id);
            continue;
        }

        // Agent identity is sticky, so classify only until one is found.
        let needs_agent = store
            .read(|r| r.get(&event.session_id).is_some_and(|s| s.agent.is_none()))
            .await;
        if needs_agent {
            if let Some(agent) = detect_agent(&text) {
                if store.set_agent(&event.session_id, agent).await {
                    info!(
                        "[EventBridge] Detected {} in session {}",
                        agent.display_name(),
                        event.session_id
                    );
                }
            }
        }
    }
    debug!("[EventBridge] pty:data listener finished");
}

async fn run_exit_listener(mut sub: Subscription, store: SessionStore, cancel: CancellationToken) {
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = sub.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        match PtyExitEvent::decode(payload) {
            Ok(event) => {
                debug!(
                    "[EventBridge] Session {} exited with code {:?}",
                    event.session_id, event.code
                );
                store
                    .set_status(&event.session_id, SessionStatus::Terminated)
                    .await;
            }
            Err(e) => debug!("[EventBridge] Skipping undecodable pty:exit payload: {}", e),
        }
    }
    debug!("[EventBridge] pty:exit listener finished");
}
