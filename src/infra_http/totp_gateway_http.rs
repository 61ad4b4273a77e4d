use super::util::{http_client, request_error, string_field};
use crate::domain_port::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Live password+TOTP upstream. This provider reports failures inside a 200
/// body (`errorcode`/`message`), so replies are inspected before any field
/// is trusted; data calls reuse the bearer token the login returned.
pub struct HttpTotpGateway {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpTotpGateway {
    pub fn new(api_base_url: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_base_url,
        }
    }

    /// The body-level error envelope, also produced on 2xx replies.
    fn body_error(value: &serde_json::Value) -> Option<UpstreamError> {
        let code = string_field(value, &["errorcode", "errorCode"])?;
        if code.is_empty() {
            return None;
        }
        let message =
            string_field(value, &["message"]).unwrap_or_else(|| "upstream rejected call".into());
        Some(UpstreamError::payload(message).with_code(code))
    }

    fn error_from_body(status: u16, body: &str) -> UpstreamError {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(mut err) = Self::body_error(&value) {
                err.kind = UpstreamErrorKind::Status(status);
                return err;
            }
        }
        UpstreamError::status(status, body.to_string())
    }
}

#[async_trait::async_trait]
impl TotpGateway for HttpTotpGateway {
    async fn generate_session(
        &self,
        api_key: &str,
        client_code: &str,
        password: &str,
        totp_code: &str,
    ) -> Result<TotpLogin, UpstreamError> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.api_base_url))
            .header("X-Api-Key", api_key)
            .json(&json!({
                "clientcode": client_code,
                "password": password,
                "totp": totp_code,
            }))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("login reply: {e}")))?;
        if let Some(err) = Self::body_error(&value) {
            return Err(err);
        }

        let data = value.get("data").unwrap_or(&value);
        let access_token = string_field(data, &["jwtToken", "access_token"])
            .ok_or_else(|| UpstreamError::payload("jwtToken missing from login reply"))?;

        let handle = Arc::new(HttpTotpHandle {
            client: self.client.clone(),
            api_base_url: self.api_base_url.clone(),
            api_key: api_key.to_string(),
            authorization: format!("Bearer {access_token}"),
        });

        Ok(TotpLogin {
            access_token,
            refresh_token: string_field(data, &["refreshToken", "refresh_token"]),
            feed_token: string_field(data, &["feedToken", "feed_token"]),
            handle,
        })
    }
}

struct HttpTotpHandle {
    client: reqwest::Client,
    api_base_url: String,
    api_key: String,
    authorization: String,
}

#[async_trait::async_trait]
impl BrokerHandle for HttpTotpHandle {
    async fn execute(&self, op: BrokerOp) -> Result<serde_json::Value, UpstreamError> {
        let path = match op {
            BrokerOp::Orders => "/orders",
            BrokerOp::Positions => "/positions",
            BrokerOp::Trades => "/trades",
        };
        let response = self
            .client
            .get(format!("{}{path}", self.api_base_url))
            .header("X-Api-Key", &self.api_key)
            .header("Authorization", &self.authorization)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(HttpTotpGateway::error_from_body(status.as_u16(), &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("{op} reply: {e}")))?;
        if let Some(err) = HttpTotpGateway::body_error(&value) {
            return Err(err);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_error_envelope_is_detected() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{"status":false,"message":"Invalid Token","errorcode":"AG8001","data":null}"#,
        )
        .unwrap();
        let err = HttpTotpGateway::body_error(&value).expect("error detected");
        assert_eq!(err.code.as_deref(), Some("AG8001"));
        assert_eq!(err.message, "Invalid Token");
    }

    #[test]
    fn empty_errorcode_means_success() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{"status":true,"message":"SUCCESS","errorcode":"","data":{"jwtToken":"j"}}"#,
        )
        .unwrap();
        assert!(HttpTotpGateway::body_error(&value).is_none());
    }

    #[test]
    fn http_error_keeps_the_status() {
        let err = HttpTotpGateway::error_from_body(
            401,
            r#"{"message":"Invalid Token","errorcode":"AG8001"}"#,
        );
        assert_eq!(err.kind, UpstreamErrorKind::Status(401));
        assert_eq!(err.code.as_deref(), Some("AG8001"));
    }
}
