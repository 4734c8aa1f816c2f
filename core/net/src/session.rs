//! Session contract with the external auth collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tether_common::Result;

/// Auth tokens with expiration tracking.
///
/// Owned by the auth collaborator; the executor only reads validity and
/// asks for renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Access token attached to outbound requests.
    pub access_token: String,
    /// Refresh token used by the auth collaborator for renewal.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Treat tokens with less than 5 minutes remaining as expired.
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Accessor into the auth collaborator.
///
/// Both operations are idempotent and safe to call concurrently; the
/// collaborator serializes refreshes internally.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current session, if one exists.
    async fn current_session(&self) -> Option<Session>;

    /// Force a renewal and return the fresh session, or `None` when the
    /// user must re-authenticate.
    async fn refresh_session(&self) -> Result<Option<Session>>;
}
