//! Shared test doubles for queue, engine and batcher tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_common::{OfflineConfig, Result};
use tether_net::{
    ConnectivityMonitor, ManualProbe, ProbeSample, RequestDescriptor, RequestExecutor, Response,
    Session, SessionProvider, Transport,
};

/// Transport double that plays back a scripted sequence of outcomes and
/// records what was sent.
pub(crate) struct ScriptedTransport {
    script: Mutex<Vec<Result<Response>>>,
    calls: AtomicU32,
    targets: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Option<Value>>>,
    delay: Option<Duration>,
    go_offline_after: Mutex<Option<(u32, Arc<ConnectivityMonitor>)>>,
}

impl ScriptedTransport {
    /// Always succeeds.
    pub(crate) fn ok() -> Self {
        Self::script(Vec::new())
    }

    /// Plays back `script`, then succeeds.
    pub(crate) fn script(script: Vec<Result<Response>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            targets: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
            delay: None,
            go_offline_after: Mutex::new(None),
        }
    }

    /// Sleep this long inside every send.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Push the monitor offline once `after` calls have been made.
    pub(crate) fn go_offline_after(&self, after: u32, monitor: Arc<ConnectivityMonitor>) {
        *self.go_offline_after.lock().unwrap() = Some((after, monitor));
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub(crate) fn bodies(&self) -> Vec<Option<Value>> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        _access_token: Option<&str>,
    ) -> Result<Response> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.targets.lock().unwrap().push(request.target.clone());
        self.bodies.lock().unwrap().push(request.body.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let kill = self.go_offline_after.lock().unwrap().clone();
        if let Some((after, monitor)) = kill {
            if call >= after {
                monitor.set_state(false, false).await;
            }
        }

        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(Response {
                status: 200,
                body: json!({"ok": true}),
            })
        } else {
            script.remove(0)
        }
    }
}

/// Session provider that always holds a valid session.
pub(crate) struct FakeSessions;

#[async_trait]
impl SessionProvider for FakeSessions {
    async fn current_session(&self) -> Option<Session> {
        Some(Session {
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn refresh_session(&self) -> Result<Option<Session>> {
        Ok(self.current_session().await)
    }
}

/// Monitor that starts online with a long cache window.
pub(crate) fn online_monitor() -> Arc<ConnectivityMonitor> {
    Arc::new(ConnectivityMonitor::new(
        Arc::new(ManualProbe::new(ProbeSample::online())),
        Duration::from_secs(60),
    ))
}

/// Millisecond-scale backoff so retry paths run fast in tests.
pub(crate) fn fast_config() -> OfflineConfig {
    OfflineConfig::default()
        .with_base_backoff_ms(1)
        .with_max_backoff_ms(2)
        .with_jitter(false)
}

/// Executor wired to the scripted transport.
pub(crate) fn scripted_executor(
    transport: Arc<ScriptedTransport>,
    monitor: Arc<ConnectivityMonitor>,
    config: &OfflineConfig,
) -> Arc<RequestExecutor> {
    Arc::new(RequestExecutor::new(
        transport,
        monitor,
        Arc::new(FakeSessions),
        config,
    ))
}
