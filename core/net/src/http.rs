//! HTTP implementations of the transport and probe contracts.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use tether_common::{ApiError, Result};

use crate::connectivity::{ProbeSample, ReachabilityProbe};
use crate::transport::{Method, RequestDescriptor, Response, Transport};

/// Header carrying the client-generated deduplication key.
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// reqwest-backed transport against a JSON HTTP API.
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("Tether/0.1")
            .build()
            .map_err(|e| ApiError::Unknown(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, target: &str) -> String {
        format!("{}/{}", self.base_url, target.trim_start_matches('/'))
    }

    fn map_send_error(err: reqwest::Error) -> ApiError {
        if err.is_timeout() || err.is_connect() {
            ApiError::Network(err.to_string())
        } else {
            ApiError::Unknown(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> Result<Response> {
        let url = self.url_for(&request.target);

        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Patch => self.http.patch(&url),
            Method::Delete => self.http.delete(&url),
        };

        if let Some(token) = access_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key.to_string());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = request.method.as_str(), target = %request.target, "sending request");

        let response = builder.send().await.map_err(Self::map_send_error)?;
        let status = response.status().as_u16();

        if response.status().is_success() {
            let body = response
                .json()
                .await
                .unwrap_or(serde_json::Value::Null);
            Ok(Response { status, body })
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, message))
        }
    }
}

/// Reachability probe that hits a lightweight, low-latency endpoint.
pub struct HttpProbe {
    http: Client,
    endpoint: String,
}

impl HttpProbe {
    /// Create a probe against `endpoint` with a short deadline.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("Tether/0.1")
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| ApiError::Unknown(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> Result<ProbeSample> {
        match self.http.head(&self.endpoint).send().await {
            // Any HTTP response at all means the internet is reachable,
            // even a server error from the probe endpoint.
            Ok(response) if response.status() != StatusCode::SERVICE_UNAVAILABLE => {
                Ok(ProbeSample::online())
            }
            Ok(_) => Ok(ProbeSample {
                is_connected: true,
                is_reachable: false,
            }),
            Err(e) if e.is_timeout() => Ok(ProbeSample {
                is_connected: true,
                is_reachable: false,
            }),
            Err(e) if e.is_connect() => Ok(ProbeSample::offline()),
            // Anything else is a probe failure, not a connectivity answer.
            Err(e) => Err(ApiError::Network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("https://api.example.com/v1/").unwrap();
        assert_eq!(
            transport.url_for("/tasks/123"),
            "https://api.example.com/v1/tasks/123"
        );
        assert_eq!(transport.url_for("tasks"), "https://api.example.com/v1/tasks");
    }
}
