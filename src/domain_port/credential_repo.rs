use crate::application_port::*;
use crate::domain_model::*;

/// Durable store of registered credentials. Pure storage: validation happens
/// before a credential reaches this port, and nothing here contacts a broker.
#[async_trait::async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Insert or replace the credential for its (broker, external_user_id).
    async fn upsert(&self, credential: &Credential) -> Result<(), BrokerError>;

    async fn get(&self, key: &SessionKey) -> Result<Option<Credential>, BrokerError>;
}
