use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;

/// DashMap-backed credential store for the memory backend and tests.
#[derive(Default)]
pub struct MemoryCredentialRepo {
    rows: DashMap<SessionKey, Credential>,
}

impl MemoryCredentialRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CredentialRepo for MemoryCredentialRepo {
    async fn upsert(&self, credential: &Credential) -> Result<(), BrokerError> {
        self.rows.insert(credential.key(), credential.clone());
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Credential>, BrokerError> {
        Ok(self.rows.get(key).map(|r| r.clone()))
    }
}
