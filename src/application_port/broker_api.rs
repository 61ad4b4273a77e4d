use super::BrokerError;
use crate::domain_model::SessionKey;
use crate::domain_port::BrokerOp;

/// Thin pass-through in front of broker data calls. Every call goes through
/// `SessionManager::ensure_valid` first; a driver-recognized auth failure is
/// retried exactly once after a forced re-authentication.
#[async_trait::async_trait]
pub trait BrokerApi: Send + Sync {
    async fn call(&self, key: &SessionKey, op: BrokerOp) -> Result<serde_json::Value, BrokerError>;
}
