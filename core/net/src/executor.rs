//! Retrying request executor with backoff and session renewal.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_common::{ApiError, OfflineConfig, Result};

use crate::classify::{decide, BackoffPolicy};
use crate::connectivity::ConnectivityMonitor;
use crate::session::SessionProvider;
use crate::transport::{RequestDescriptor, Response, Transport};

/// Issues one logical request with retry, exponential backoff and
/// transparent session renewal.
///
/// Terminal outcomes are always a typed [`ApiError`], never a raw
/// transport failure. If the device is definitely offline the executor
/// short-circuits to [`ApiError::Offline`] without touching the network;
/// that error is the signal callers use to decide whether to enqueue.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
    sessions: Arc<dyn SessionProvider>,
    policy: BackoffPolicy,
    max_retries: u32,
    request_timeout: Duration,
}

impl RequestExecutor {
    /// Create an executor over the given collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: Arc<ConnectivityMonitor>,
        sessions: Arc<dyn SessionProvider>,
        config: &OfflineConfig,
    ) -> Self {
        Self {
            transport,
            monitor,
            sessions,
            policy: BackoffPolicy::from_config(config),
            max_retries: config.max_retries,
            request_timeout: config.request_timeout(),
        }
    }

    /// Execute a request to completion or terminal failure.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Response> {
        self.execute_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Execute a request, aborting retries and backoff sleeps when
    /// `cancel` fires.
    ///
    /// Cancellation stops further attempts for this call only; work
    /// already enqueued durably elsewhere is unaffected.
    pub async fn execute_cancellable(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut attempt: u32 = 0;
        let mut renewal_attempted = false;

        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            // Connectivity is re-checked before every attempt.
            if !self.monitor.current_state().await.is_online() {
                return Err(ApiError::Offline);
            }

            let access_token = if request.requires_auth {
                self.sessions
                    .current_session()
                    .await
                    .map(|s| s.access_token)
            } else {
                None
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                sent = timeout(
                    self.request_timeout,
                    self.transport.send(request, access_token.as_deref()),
                ) => match sent {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(self.request_timeout.as_millis() as u64)),
                },
            };

            let err = match outcome {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(target = %request.target, attempt, "request succeeded after retries");
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            let decision = decide(&err, attempt, self.max_retries, &self.policy);

            if decision.is_auth_error {
                // Renewal runs at most once per logical request; a
                // successful renewal buys one extra attempt outside the
                // backoff counter.
                if renewal_attempted {
                    return Err(err);
                }
                renewal_attempted = true;

                info!(target = %request.target, "auth failure, renewing session");
                match self.sessions.refresh_session().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return Err(err),
                    Err(refresh_err) => {
                        warn!(error = %refresh_err, "session renewal failed");
                        return Err(err);
                    }
                }
            }

            if !decision.should_retry {
                if attempt > 0 {
                    warn!(
                        target = %request.target,
                        attempts = attempt + 1,
                        error = %err,
                        "request failed after retries"
                    );
                }
                return Err(err);
            }

            warn!(
                target = %request.target,
                attempt,
                error = %err,
                delay_ms = decision.delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            attempt += 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = sleep(decision.delay) => {}
            }
        }
    }
}
