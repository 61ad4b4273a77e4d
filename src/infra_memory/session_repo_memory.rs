use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use dashmap::DashMap;

/// DashMap-backed session repository. Each entry is replaced or mutated
/// under its shard lock, which gives the per-key write atomicity the
/// durable store must provide.
#[derive(Default)]
pub struct MemorySessionRepo {
    rows: DashMap<SessionKey, SessionTokens>,
}

impl MemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRepo for MemorySessionRepo {
    async fn save(&self, tokens: &SessionTokens) -> Result<(), BrokerError> {
        let mut row = tokens.clone();
        if !row.access_token.is_empty() {
            row.connected = true;
            row.last_connected_at = Some(Utc::now());
        }
        self.rows.insert(row.key(), row);
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionTokens>, BrokerError> {
        Ok(self.rows.get(key).map(|r| r.clone()))
    }

    async fn mark_disconnected(&self, key: &SessionKey) -> Result<(), BrokerError> {
        if let Some(mut row) = self.rows.get_mut(key) {
            row.connected = false;
        }
        Ok(())
    }

    async fn list_connected(&self) -> Result<Vec<SessionTokens>, BrokerError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.connected)
            .map(|r| r.clone())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<SessionTokens>, BrokerError> {
        Ok(self.rows.iter().map(|r| r.clone()).collect())
    }
}
