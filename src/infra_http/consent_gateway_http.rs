use super::util::{http_client, request_error, string_field};
use crate::domain_port::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Live partner-consent upstream: generate-consent / consent-login /
/// consume-consent against the auth host, data calls against the API host
/// with the granted access token.
pub struct HttpConsentGateway {
    client: reqwest::Client,
    auth_base_url: String,
    api_base_url: String,
}

impl HttpConsentGateway {
    pub fn new(auth_base_url: String, api_base_url: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            auth_base_url,
            api_base_url,
        }
    }

    fn error_from_body(status: u16, body: &str) -> UpstreamError {
        let mut err = UpstreamError::status(status, body.to_string());
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(message) = string_field(&value, &["errorMessage", "message"]) {
                err.message = message;
            }
            if let Some(code) = string_field(&value, &["errorCode", "errorType"]) {
                err = err.with_code(code);
            }
        }
        err
    }
}

#[async_trait::async_trait]
impl ConsentGateway for HttpConsentGateway {
    async fn generate_consent(
        &self,
        partner_id: &str,
        partner_secret: &str,
    ) -> Result<String, UpstreamError> {
        let response = self
            .client
            .post(format!("{}/partner/generate-consent", self.auth_base_url))
            .header("partner_id", partner_id)
            .header("partner_secret", partner_secret)
            .json(&json!({}))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("generate-consent reply: {e}")))?;
        string_field(&value, &["consentId", "consent_id"])
            .ok_or_else(|| UpstreamError::payload("consentId missing from generate-consent reply"))
    }

    fn consent_login_url(&self, consent_id: &str) -> String {
        format!("{}/consent-login?consentId={consent_id}", self.auth_base_url)
    }

    async fn consume_consent(
        &self,
        partner_id: &str,
        partner_secret: &str,
        token_id: &str,
    ) -> Result<ConsentGrant, UpstreamError> {
        let response = self
            .client
            .get(format!("{}/partner/consume-consent", self.auth_base_url))
            .header("partner_id", partner_id)
            .header("partner_secret", partner_secret)
            .query(&[("tokenId", token_id)])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("consume-consent reply: {e}")))?;
        // Field spellings vary across upstream versions.
        let client_id = string_field(&value, &["clientId", "client_id"])
            .ok_or_else(|| UpstreamError::payload("clientId missing from consume-consent reply"))?;
        let access_token = string_field(&value, &["accessToken", "access_token", "jwt", "JWT"])
            .ok_or_else(|| UpstreamError::payload("token missing from consume-consent reply"))?;

        Ok(ConsentGrant {
            client_id,
            access_token,
        })
    }

    fn data_handle(&self, client_id: &str, access_token: &str) -> Arc<dyn BrokerHandle> {
        Arc::new(HttpConsentHandle {
            client: self.client.clone(),
            api_base_url: self.api_base_url.clone(),
            client_id: client_id.to_string(),
            access_token: access_token.to_string(),
        })
    }
}

struct HttpConsentHandle {
    client: reqwest::Client,
    api_base_url: String,
    client_id: String,
    access_token: String,
}

#[async_trait::async_trait]
impl BrokerHandle for HttpConsentHandle {
    async fn execute(&self, op: BrokerOp) -> Result<serde_json::Value, UpstreamError> {
        let path = match op {
            BrokerOp::Orders => "/orders",
            BrokerOp::Positions => "/positions",
            BrokerOp::Trades => "/trades",
        };
        let response = self
            .client
            .get(format!("{}{path}", self.api_base_url))
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(HttpConsentGateway::error_from_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| UpstreamError::payload(format!("{op} reply: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_login_url_embeds_the_id() {
        let gateway = HttpConsentGateway::new(
            "https://auth.example".into(),
            "https://api.example".into(),
            Duration::from_secs(30),
        );
        assert_eq!(
            gateway.consent_login_url("c-42"),
            "https://auth.example/consent-login?consentId=c-42"
        );
    }

    #[test]
    fn error_body_spellings_are_normalized() {
        let err = HttpConsentGateway::error_from_body(
            401,
            r#"{"errorCode":"DH-901","errorMessage":"Invalid partner credentials"}"#,
        );
        assert_eq!(err.kind, UpstreamErrorKind::Status(401));
        assert_eq!(err.code.as_deref(), Some("DH-901"));
        assert_eq!(err.message, "Invalid partner credentials");
    }
}
