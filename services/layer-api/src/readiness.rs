//! Map server readiness initialization.
//!
//! The map server usually boots slower than this service. The initializer
//! creates the publish workspace in a background task, retrying transport
//! failures with exponential backoff, and publishes its progress on a
//! `watch` channel:
//!
//! ```text
//! NotStarted -> Initializing -> Ready
//!                            -> Failed -> (retry) -> Initializing
//! ```
//!
//! Only `Ready` admits publishes. Rejections are not retried: a bad
//! credential or workspace name will not fix itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use geoserver_client::PublishBackend;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics;

/// Progress of map server initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadinessState {
    NotStarted,
    Initializing { attempt: u32 },
    Ready,
    Failed { reason: String },
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadinessState::NotStarted => "not_started",
            ReadinessState::Initializing { .. } => "initializing",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed { .. } => "failed",
        }
    }
}

/// Retry policy for initialization.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Wait before the first attempt
    pub initial_delay: Duration,
    /// Delay after the first failed attempt (doubles each retry)
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Total attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_attempts: 6,
        }
    }
}

/// Drives the workspace creation sequence and owns the readiness state.
pub struct ReadinessInitializer {
    backend: Arc<dyn PublishBackend>,
    config: ReadinessConfig,
    state: watch::Sender<ReadinessState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessInitializer {
    pub fn new(backend: Arc<dyn PublishBackend>, config: ReadinessConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ReadinessState::NotStarted);
        Arc::new(Self {
            backend,
            config,
            state,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    /// Receiver for observing state changes.
    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state.subscribe()
    }

    /// Start initialization. Returns false unless the state was `NotStarted`.
    pub fn start(self: &Arc<Self>) -> bool {
        self.launch(
            |s| matches!(s, ReadinessState::NotStarted),
            self.config.initial_delay,
        )
    }

    /// Re-run initialization after a failure. A no-op in any other state.
    pub fn retry(self: &Arc<Self>) -> bool {
        self.launch(|s| matches!(s, ReadinessState::Failed { .. }), Duration::ZERO)
    }

    /// Wait until the state is `Ready` or `Failed`.
    pub async fn wait_terminal(&self) -> ReadinessState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => state.clone(),
            // The sender lives in self, so the channel cannot close here.
            Err(_) => self.state(),
        };
        state
    }

    /// Stop any running sequence. The state becomes `Failed` if it was in flight.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn launch(self: &Arc<Self>, allowed: impl Fn(&ReadinessState) -> bool, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let transitioned = self.state.send_if_modified(|state| {
            if allowed(&*state) {
                *state = ReadinessState::Initializing { attempt: 0 };
                true
            } else {
                false
            }
        });
        if !transitioned {
            return false;
        }

        metrics::set_readiness(&ReadinessState::Initializing { attempt: 0 });
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(delay).await });
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        true
    }

    fn transition(&self, next: ReadinessState) {
        metrics::set_readiness(&next);
        self.state.send_replace(next);
    }

    async fn run(&self, initial_delay: Duration) {
        if !initial_delay.is_zero() && !self.pause(initial_delay).await {
            return;
        }

        let workspace = self.backend.workspace().to_string();
        let mut delay = self.config.base_delay;

        for attempt in 1..=self.config.max_attempts {
            self.transition(ReadinessState::Initializing { attempt });

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.transition(ReadinessState::Failed { reason: "cancelled".to_string() });
                    return;
                }
                result = self.backend.create_workspace(&workspace) => result,
            };

            match result {
                Ok(()) => {
                    info!(workspace = %workspace, attempt = attempt, "Map server ready");
                    self.transition(ReadinessState::Ready);
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        workspace = %workspace,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Map server not reachable, retrying"
                    );
                    if !self.pause(delay).await {
                        return;
                    }
                    delay = std::cmp::min(delay * 2, self.config.max_delay);
                }
                Err(e) => {
                    let reason = if e.is_retryable() {
                        format!("gave up after {} attempts: {}", attempt, e)
                    } else {
                        e.to_string()
                    };
                    error!(workspace = %workspace, attempt = attempt, reason = %reason, "Map server initialization failed");
                    self.transition(ReadinessState::Failed { reason });
                    return;
                }
            }
        }

        // Only reachable with max_attempts == 0
        self.transition(ReadinessState::Failed {
            reason: "no initialization attempts configured".to_string(),
        });
    }

    /// Sleep unless cancelled. Returns false (and records the failure) on cancel.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.transition(ReadinessState::Failed { reason: "cancelled".to_string() });
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
