use super::{Broker, ExternalUserId, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable outcome of a successful login: everything the repository persists.
/// The live client handle some protocols need is deliberately not part of
/// this struct; it lives only in the in-process cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub broker: Broker,
    pub external_user_id: ExternalUserId,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub feed_token: Option<String>,
    /// Broker-side client id learned during login (consent consume or the
    /// OAuth exchange report it; registration may also supply it up front).
    pub client_id: Option<String>,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl SessionTokens {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            broker: self.broker,
            external_user_id: self.external_user_id.clone(),
        }
    }

    /// Age check against the restore policy. Sessions with no recorded
    /// connect time never qualify for restore.
    pub fn within_ttl(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match self.last_connected_at {
            Some(at) => now - at < ttl,
            None => false,
        }
    }
}

/// Answer to a status query; never includes token material.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub broker: Broker,
    pub external_user_id: ExternalUserId,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
}
