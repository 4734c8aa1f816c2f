//! Locally synthesized results for queued mutations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use tether_net::{Method, RequestDescriptor};

/// Marker carried by every optimistic result.
pub const PENDING_MARKER: &str = "pending";

/// A result shaped like the real response but synthesized locally.
///
/// Returned to the caller immediately upon enqueue so queueing never
/// blocks them. Never persisted as authoritative; it is overwritten
/// once the real response arrives and the caller's cache is refetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimisticResponse {
    /// Temporary identifier, present for creations only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
    /// Always [`PENDING_MARKER`].
    pub status: String,
    /// The submitted fields, echoed back.
    pub fields: Value,
    pub updated_at: DateTime<Utc>,
}

/// Synthesize an optimistic result for a request, or `None` when no
/// useful shape exists (reads and deletions).
pub fn synthesize(request: &RequestDescriptor) -> Option<OptimisticResponse> {
    match request.method {
        Method::Post => Some(OptimisticResponse {
            temp_id: Some(Uuid::new_v4()),
            status: PENDING_MARKER.to_string(),
            fields: request.body.clone().unwrap_or(Value::Null),
            updated_at: Utc::now(),
        }),
        Method::Put | Method::Patch => Some(OptimisticResponse {
            temp_id: None,
            status: PENDING_MARKER.to_string(),
            fields: request.body.clone().unwrap_or(Value::Null),
            updated_at: Utc::now(),
        }),
        Method::Get | Method::Delete => None,
    }
}
