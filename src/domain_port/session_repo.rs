use crate::application_port::*;
use crate::domain_model::*;

/// Durable session records, one per (broker, external_user_id).
///
/// Writes must be atomic per key: a `save` racing a `mark_disconnected` for
/// the same pair may land in either order but never interleave into a record
/// that is half one and half the other.
#[async_trait::async_trait]
pub trait SessionRepo: Send + Sync {
    /// Upsert the record. Implementations set `connected = true` and refresh
    /// `last_connected_at` whenever a non-empty access token is written.
    async fn save(&self, tokens: &SessionTokens) -> Result<(), BrokerError>;

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionTokens>, BrokerError>;

    /// Flip `connected` off. Historical tokens are kept for diagnostics;
    /// the record is never physically deleted here.
    async fn mark_disconnected(&self, key: &SessionKey) -> Result<(), BrokerError>;

    /// Every record currently flagged connected, regardless of age. The
    /// restore pass applies the TTL policy on top of this.
    async fn list_connected(&self) -> Result<Vec<SessionTokens>, BrokerError>;

    async fn list_all(&self) -> Result<Vec<SessionTokens>, BrokerError>;
}
