use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use std::str::FromStr;

pub struct MySqlCredentialRepo {
    pool: MySqlPool,
}

impl MySqlCredentialRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlCredentialRepo { pool }
    }

    fn row_to_credential(row: MySqlRow) -> Result<Credential, BrokerError> {
        let broker: String = row
            .try_get("broker")
            .map_err(|e| BrokerError::Store(e.to_string()))?;
        let broker =
            Broker::from_str(&broker).map_err(|e| BrokerError::Store(e.to_string()))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| BrokerError::Store(e.to_string()))?;

        let field = |name: &str| -> Result<Option<String>, BrokerError> {
            row.try_get(name).map_err(|e| BrokerError::Store(e.to_string()))
        };

        Ok(Credential {
            broker,
            external_user_id: user_id.into(),
            api_key: field("api_key")?,
            api_secret: field("api_secret")?,
            client_id: field("client_id")?,
            direct_access_token: field("direct_access_token")?,
            totp_seed: field("totp_seed")?,
            login_password: field("login_password")?,
        })
    }
}

#[async_trait::async_trait]
impl CredentialRepo for MySqlCredentialRepo {
    async fn upsert(&self, credential: &Credential) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
INSERT INTO broker_credential
    (broker, user_id, api_key, api_secret, client_id, direct_access_token, totp_seed, login_password)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    api_key = VALUES(api_key),
    api_secret = VALUES(api_secret),
    client_id = VALUES(client_id),
    direct_access_token = VALUES(direct_access_token),
    totp_seed = VALUES(totp_seed),
    login_password = VALUES(login_password)
"#,
        )
        .bind(credential.broker.as_str())
        .bind(&credential.external_user_id.0)
        .bind(&credential.api_key)
        .bind(&credential.api_secret)
        .bind(&credential.client_id)
        .bind(&credential.direct_access_token)
        .bind(&credential.totp_seed)
        .bind(&credential.login_password)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Credential>, BrokerError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT broker, user_id, api_key, api_secret, client_id, direct_access_token, totp_seed, login_password
FROM broker_credential
WHERE broker = ? AND user_id = ?
"#,
        )
        .bind(key.broker.as_str())
        .bind(&key.external_user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_credential).transpose()
    }
}
