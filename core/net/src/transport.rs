//! Transport contract: the shape of one outbound call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tether_common::Result;

/// HTTP-style method of a request descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Whether the request mutates remote state and is therefore
    /// eligible for offline queueing.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One logical request, serializable so queued mutations can be
/// replayed after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Target path or RPC name, relative to the transport's base.
    pub target: String,
    /// JSON body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Client-generated key the remote service deduplicates replays on.
    /// Set at enqueue time for every deferred mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    /// Whether an access token must be attached.
    #[serde(default = "default_requires_auth")]
    pub requires_auth: bool,
}

fn default_requires_auth() -> bool {
    true
}

impl RequestDescriptor {
    /// New descriptor with no body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            idempotency_key: None,
            requires_auth: true,
        }
    }

    /// GET request.
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    /// POST request with a JSON body.
    pub fn post(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, target).with_body(body)
    }

    /// PUT request with a JSON body.
    pub fn put(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, target).with_body(body)
    }

    /// PATCH request with a JSON body.
    pub fn patch(target: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, target).with_body(body)
    }

    /// DELETE request.
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::Delete, target)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Mark the request as not needing authentication.
    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }
}

/// Successful response from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The underlying HTTP/RPC call.
///
/// Implementations return `Ok` only for successful (2xx) responses;
/// everything else is mapped into the `ApiError` taxonomy so the
/// executor can classify it. The executor is transport-agnostic beyond
/// this shape.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> Result<Response>;
}
