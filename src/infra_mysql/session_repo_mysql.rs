use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use std::str::FromStr;

/// Session rows live in `broker_session`, one per (broker, user_id). Every
/// write is a single statement, so concurrent saves and disconnects for the
/// same pair serialize at the row without ever mixing fields.
pub struct MySqlSessionRepo {
    pool: MySqlPool,
}

impl MySqlSessionRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlSessionRepo { pool }
    }

    fn row_to_tokens(row: MySqlRow) -> Result<SessionTokens, BrokerError> {
        let broker: String = row
            .try_get("broker")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let broker =
            Broker::from_str(&broker).map_err(|e| BrokerError::Store(e.to_string()))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let access_token: String = row
            .try_get("access_token")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let refresh_token: Option<String> = row
            .try_get("refresh_token")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let feed_token: Option<String> = row
            .try_get("feed_token")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let client_id: Option<String> = row
            .try_get("client_id")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let connected: bool = row
            .try_get("connected")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let last_connected_at: Option<DateTime<Utc>> = row
            .try_get("last_connected_at")
            .map_err(|e| BrokerError::Store(e.to_string()))?;

        Ok(SessionTokens {
            broker,
            external_user_id: user_id.into(),
            access_token,
            refresh_token,
            feed_token,
            client_id,
            connected,
            last_connected_at,
        })
    }
}

#[async_trait::async_trait]
impl SessionRepo for MySqlSessionRepo {
    async fn save(&self, tokens: &SessionTokens) -> Result<(), BrokerError> {
        let mut row = tokens.clone();
        if !row.access_token.is_empty() {
            row.connected = true;
            row.last_connected_at = Some(Utc::now());
        }

        sqlx::query(
            r#"
INSERT INTO broker_session
    (broker, user_id, access_token, refresh_token, feed_token, client_id, connected, last_connected_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    access_token = VALUES(access_token),
    refresh_token = VALUES(refresh_token),
    feed_token = VALUES(feed_token),
    client_id = VALUES(client_id),
    connected = VALUES(connected),
    last_connected_at = VALUES(last_connected_at)
"#,
        )
        .bind(row.broker.as_str())
        .bind(&row.external_user_id.0)
        .bind(&row.access_token)
        .bind(&row.refresh_token)
        .bind(&row.feed_token)
        .bind(&row.client_id)
        .bind(row.connected)
        .bind(row.last_connected_at)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionTokens>, BrokerError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT broker, user_id, access_token, refresh_token, feed_token, client_id, connected, last_connected_at
FROM broker_session
WHERE broker = ? AND user_id = ?
"#,
        )
        .bind(key.broker.as_str())
        .bind(&key.external_user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_tokens).transpose()
    }

    async fn mark_disconnected(&self, key: &SessionKey) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
UPDATE broker_session
SET connected = FALSE
WHERE broker = ? AND user_id = ?
"#,
        )
        .bind(key.broker.as_str())
        .bind(&key.external_user_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        Ok(())
    }

    async fn list_connected(&self) -> Result<Vec<SessionTokens>, BrokerError> {
        let rows = sqlx::query(
            r#"
SELECT broker, user_id, access_token, refresh_token, feed_token, client_id, connected, last_connected_at
FROM broker_session
WHERE connected = TRUE
"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        rows.into_iter().map(Self::row_to_tokens).collect()
    }

    async fn list_all(&self) -> Result<Vec<SessionTokens>, BrokerError> {
        let rows = sqlx::query(
            r#"
SELECT broker, user_id, access_token, refresh_token, feed_token, client_id, connected, last_connected_at
FROM broker_session
"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        rows.into_iter().map(Self::row_to_tokens).collect()
    }
}
