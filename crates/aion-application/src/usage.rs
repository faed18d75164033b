//! Keeps the usage panel's [`UsageSnapshot`] current.
//!
//! Records of the current month and its budget are fetched together. While
//! started, `token:captured` notifications trigger a debounced refresh. The
//! panel's error is independent of the workspace error.

use aion_core::backend::UsageBackend;
use aion_core::config::UsageConfig;
use aion_core::error::Result;
use aion_core::event::{Channel, EventSource, Subscription, TokenCapturedEvent};
use aion_core::usage::{UsageAggregates, UsageQuery, UsageSnapshot, current_month, month_key};
use chrono::Local;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deadline::wait_until;

struct Inner {
    usage: Arc<dyn UsageBackend>,
    source: Arc<dyn EventSource>,
    config: UsageConfig,
    snapshot: watch::Sender<UsageSnapshot>,
    /// Bumped on stop so refreshes still in flight are discarded
    generation: AtomicU64,
    in_flight: AtomicUsize,
    listener: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct UsageOrchestrator {
    inner: Arc<Inner>,
}

struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: inner.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.snapshot.send_modify(|s| s.loading = false);
        }
    }
}

impl UsageOrchestrator {
    pub fn new(
        usage: Arc<dyn UsageBackend>,
        source: Arc<dyn EventSource>,
        config: UsageConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                usage,
                source,
                config,
                snapshot: watch::Sender::new(UsageSnapshot::default()),
                generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UsageSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Day timeline, per-agent breakdown and totals of the loaded records.
    pub fn aggregates(&self) -> UsageAggregates {
        self.inner.snapshot.borrow().aggregates()
    }

    pub fn is_started(&self) -> bool {
        self.lock_listener().is_some()
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Subscribes to `token:captured` and runs the initial refresh.
    /// Starting again replaces the previous listener.
    pub async fn start(&self) {
        let cancel = CancellationToken::new();
        let previous = self.lock_listener().replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.spawn_capture_listener(cancel);

        info!("[UsageOrchestrator] Started");
        self.refresh().await;
    }

    /// Releases the listener and drops any pending or in-flight refresh.
    pub fn stop(&self) {
        let Some(cancel) = self.lock_listener().take() else {
            return;
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        info!("[UsageOrchestrator] Stopped");
    }

    fn spawn_capture_listener(&self, cancel: CancellationToken) {
        let this = self.clone();

        tokio::spawn(async move {
            let sub = match this.inner.source.listen(Channel::TokenCaptured).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!("[UsageOrchestrator] Failed to listen for captures: {}", e);
                    return;
                }
            };
            if cancel.is_cancelled() {
                debug!("[UsageOrchestrator] Capture subscription resolved after stop, releasing");
                return;
            }
            this.debounce_captures(sub, cancel).await;
        });
    }

    async fn debounce_captures(&self, mut sub: Subscription, cancel: CancellationToken) {
        let window = self.inner.config.refresh_debounce();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                payload = sub.recv() => match payload {
                    Some(payload) => match TokenCapturedEvent::decode(payload) {
                        Ok(event) => {
                            debug!(
                                "[UsageOrchestrator] {} record(s) captured for {}",
                                event.inserts, event.session_id
                            );
                            deadline = Some(Instant::now() + window);
                        }
                        Err(e) => {
                            debug!("[UsageOrchestrator] Skipping undecodable token:captured payload: {}", e);
                        }
                    },
                    None => break,
                },
                _ = wait_until(deadline) => {
                    deadline = None;
                    let this = self.clone();
                    tokio::spawn(async move { this.refresh().await });
                }
            }
        }
        debug!("[UsageOrchestrator] Capture listener finished");
    }

    // ============================================================================
    // Commands
    // ============================================================================

    /// Fetches this month's records and budget concurrently.
    ///
    /// A failure is recorded in `error` and leaves the previous records and
    /// budget in place.
    pub async fn refresh(&self) {
        let generation = self.generation();
        let _guard = InFlightGuard::enter(&self.inner);
        self.inner.snapshot.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let now = Local::now();
        let month = month_key(&now);
        let query = UsageQuery::since_month_start(&now);
        let usage = &self.inner.usage;
        let result = tokio::try_join!(usage.query_usage(&query), usage.query_budget(&month));

        if self.generation() != generation {
            debug!("[UsageOrchestrator] Discarding refresh finished after stop");
            return;
        }

        match result {
            Ok((records, budget)) => {
                debug!("[UsageOrchestrator] Loaded {} record(s) for {}", records.len(), month);
                self.inner.snapshot.send_modify(|s| {
                    s.records = records;
                    s.budget = Some(budget);
                });
            }
            Err(e) => {
                warn!("[UsageOrchestrator] Refresh failed: {}", e);
                self.inner
                    .snapshot
                    .send_modify(|s| s.error = Some(e.to_string()));
            }
        }
    }

    /// Sets this month's limit, then refreshes. A failure is recorded and
    /// returned.
    pub async fn update_budget(&self, limit_usd: f64) -> Result<()> {
        let month = current_month();
        match self.inner.usage.set_budget(&month, limit_usd).await {
            Ok(()) => {
                info!("[UsageOrchestrator] Budget for {} set to {:.2}", month, limit_usd);
                self.refresh().await;
                Ok(())
            }
            Err(e) => {
                warn!("[UsageOrchestrator] set_budget failed: {}", e);
                self.inner
                    .snapshot
                    .send_modify(|s| s.error = Some(e.to_string()));
                Err(e)
            }
        }
    }
}
