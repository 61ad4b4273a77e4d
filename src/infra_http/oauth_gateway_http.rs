use super::util::{http_client, request_error, string_field};
use crate::domain_port::*;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Live redirect-OAuth upstream. The one-time request token from the
/// callback is exchanged at `/session/token`, authenticated by a SHA-256
/// checksum over api_key + request_token + api_secret.
pub struct HttpOauthGateway {
    client: reqwest::Client,
    login_base_url: String,
    api_base_url: String,
}

impl HttpOauthGateway {
    pub fn new(login_base_url: String, api_base_url: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            login_base_url,
            api_base_url,
        }
    }

    fn error_from_body(status: u16, body: &str) -> UpstreamError {
        let mut err = UpstreamError::status(status, body.to_string());
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(message) = string_field(&value, &["message"]) {
                err.message = message;
            }
            if let Some(code) = string_field(&value, &["error_type"]) {
                err = err.with_code(code);
            }
        }
        err
    }
}

#[async_trait::async_trait]
impl OauthGateway for HttpOauthGateway {
    fn login_url(&self, api_key: &str, state: &str) -> String {
        match Url::parse(&format!("{}/connect/login", self.login_base_url)) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("v", "3")
                    .append_pair("api_key", api_key)
                    .append_pair("state", state);
                url.to_string()
            }
            Err(_) => format!(
                "{}/connect/login?v=3&api_key={api_key}&state={state}",
                self.login_base_url
            ),
        }
    }

    async fn exchange_request_token(
        &self,
        api_key: &str,
        api_secret: &str,
        request_token: &str,
    ) -> Result<OauthExchange, UpstreamError> {
        let checksum = hex::encode(Sha256::digest(
            format!("{api_key}{request_token}{api_secret}").as_bytes(),
        ));

        let response = self
            .client
            .post(format!("{}/session/token", self.api_base_url))
            .form(&[
                ("api_key", api_key),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("token exchange reply: {e}")))?;
        let data = value.get("data").unwrap_or(&value);
        let access_token = string_field(data, &["access_token"])
            .ok_or_else(|| UpstreamError::payload("access_token missing from exchange reply"))?;

        Ok(OauthExchange {
            access_token,
            broker_user_id: string_field(data, &["user_id"]),
        })
    }

    fn data_handle(&self, api_key: &str, access_token: &str) -> Arc<dyn BrokerHandle> {
        Arc::new(HttpOauthHandle {
            client: self.client.clone(),
            api_base_url: self.api_base_url.clone(),
            authorization: format!("token {api_key}:{access_token}"),
        })
    }
}

struct HttpOauthHandle {
    client: reqwest::Client,
    api_base_url: String,
    authorization: String,
}

#[async_trait::async_trait]
impl BrokerHandle for HttpOauthHandle {
    async fn execute(&self, op: BrokerOp) -> Result<serde_json::Value, UpstreamError> {
        let path = match op {
            BrokerOp::Orders => "/orders",
            BrokerOp::Positions => "/portfolio/positions",
            BrokerOp::Trades => "/trades",
        };
        let response = self
            .client
            .get(format!("{}{path}", self.api_base_url))
            .header("Authorization", &self.authorization)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(HttpOauthGateway::error_from_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("{op} reply: {e}")))
    }
}
