//! Connectivity tracking with cached reachability state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_common::{ApiError, Result};

/// Last-known connectivity, shared read-only with every other component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Radio-level connection is up.
    pub is_connected: bool,
    /// The internet is actually reachable (probe succeeded).
    pub is_reachable: bool,
    /// When the state was last confirmed.
    pub last_checked_at: DateTime<Utc>,
}

impl ConnectivityState {
    /// Usable for network I/O.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_reachable
    }
}

/// One reachability measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub is_connected: bool,
    pub is_reachable: bool,
}

impl ProbeSample {
    /// Fully online sample.
    pub fn online() -> Self {
        Self { is_connected: true, is_reachable: true }
    }

    /// Fully offline sample.
    pub fn offline() -> Self {
        Self { is_connected: false, is_reachable: false }
    }
}

/// Periodic check against a lightweight endpoint, used to disambiguate
/// "radio connected" from "internet reachable".
///
/// An `Err` return means the probe itself failed and the result is
/// unknown; the monitor folds that into the cached last-known state
/// instead of reporting a false offline flicker.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> Result<ProbeSample>;
}

/// Probe whose answer is set programmatically.
///
/// Used in tests and on platforms that feed connectivity events from a
/// native push API instead of polling.
pub struct ManualProbe {
    sample: std::sync::RwLock<Result<ProbeSample>>,
}

impl ManualProbe {
    /// Create a probe that reports the given sample.
    pub fn new(sample: ProbeSample) -> Self {
        Self {
            sample: std::sync::RwLock::new(Ok(sample)),
        }
    }

    /// Change the reported sample.
    pub fn set(&self, sample: ProbeSample) {
        if let Ok(mut guard) = self.sample.write() {
            *guard = Ok(sample);
        }
    }

    /// Make the probe fail (result unknown).
    pub fn fail(&self) {
        if let Ok(mut guard) = self.sample.write() {
            *guard = Err(ApiError::Network("probe failed".to_string()));
        }
    }
}

#[async_trait]
impl ReachabilityProbe for ManualProbe {
    async fn check(&self) -> Result<ProbeSample> {
        self.sample
            .read()
            .map_err(|_| ApiError::Unknown("probe lock poisoned".to_string()))?
            .clone()
    }
}

/// Tracks current reachability, refreshed at most once per poll window.
///
/// Transitions (online to offline or back) are published on a watch
/// channel, de-duplicated against the last reported state. Dropping the
/// receiver returned by [`subscribe`](ConnectivityMonitor::subscribe)
/// unsubscribes.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    state: Arc<RwLock<ConnectivityState>>,
    tx: watch::Sender<ConnectivityState>,
    poll_window: Duration,
    // Serializes window-expiry refreshes so concurrent readers crossing
    // the window boundary trigger a single probe run.
    refresh_gate: Mutex<()>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor around a probe.
    ///
    /// The initial state is optimistically online so that requests made
    /// before the first probe are attempted rather than queued; the
    /// first `current_state` call refreshes it.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, poll_window: Duration) -> Self {
        let initial = ConnectivityState {
            is_connected: true,
            is_reachable: true,
            last_checked_at: Utc::now() - chrono::Duration::from_std(poll_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
        };
        let (tx, _rx) = watch::channel(initial);

        Self {
            probe,
            state: Arc::new(RwLock::new(initial)),
            tx,
            poll_window,
            refresh_gate: Mutex::new(()),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    fn is_fresh(&self, state: &ConnectivityState) -> bool {
        let window = chrono::Duration::from_std(self.poll_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        Utc::now() - state.last_checked_at < window
    }

    /// Current cached state, refreshed if the cache window has elapsed.
    ///
    /// Concurrent callers crossing the window boundary share one probe
    /// run: whoever enters the gate first refreshes, the rest see the
    /// fresh result.
    pub async fn current_state(&self) -> ConnectivityState {
        let cached = *self.state.read().await;
        if self.is_fresh(&cached) {
            return cached;
        }

        let _gate = self.refresh_gate.lock().await;
        let cached = *self.state.read().await;
        if self.is_fresh(&cached) {
            return cached;
        }
        self.refresh().await
    }

    /// Run the probe now and update the cached state.
    ///
    /// A failed probe keeps the last-known flags and only bumps the
    /// check timestamp, avoiding a false offline flicker on transient
    /// probe failures.
    pub async fn refresh(&self) -> ConnectivityState {
        let sample = self.probe.check().await;
        let mut state = self.state.write().await;

        match sample {
            Ok(sample) => {
                let next = ConnectivityState {
                    is_connected: sample.is_connected,
                    is_reachable: sample.is_reachable,
                    last_checked_at: Utc::now(),
                };
                let transitioned = next.is_online() != state.is_online()
                    || next.is_connected != state.is_connected;
                *state = next;
                if transitioned {
                    info!(
                        online = next.is_online(),
                        connected = next.is_connected,
                        "connectivity transition"
                    );
                    let _ = self.tx.send(next);
                }
                next
            }
            Err(err) => {
                warn!(error = %err, "reachability probe failed, keeping last-known state");
                state.last_checked_at = Utc::now();
                *state
            }
        }
    }

    /// Overwrite the state directly, bypassing the probe.
    ///
    /// For platforms with push-based connectivity events, and for tests.
    pub async fn set_state(&self, is_connected: bool, is_reachable: bool) {
        let mut state = self.state.write().await;
        let next = ConnectivityState {
            is_connected,
            is_reachable,
            last_checked_at: Utc::now(),
        };
        let transitioned =
            next.is_online() != state.is_online() || next.is_connected != state.is_connected;
        *state = next;
        if transitioned {
            info!(online = next.is_online(), "connectivity transition (pushed)");
            let _ = self.tx.send(next);
        }
    }

    /// Subscribe to connectivity transitions.
    ///
    /// The receiver yields at most one notification per actual
    /// transition. Dropping it unregisters the listener.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Start the background polling task.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.poll_window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            debug!("connectivity monitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.refresh().await;
                    }
                }
            }
            debug!("connectivity monitor stopped");
        });

        if let Ok(mut task) = self.task.try_lock() {
            *task = Some(handle);
        }
    }

    /// Stop the polling task and release its timer.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
