use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::sync::Arc;

/// Redirect-based OAuth exchange: the user authorizes in a browser, the
/// callback delivers a one-time request token, and the driver swaps it for
/// an access token. The one-time token only ever comes from a human-driven
/// redirect, so this driver cannot heal itself.
pub struct RedirectOauthDriver {
    gateway: Arc<dyn OauthGateway>,
}

impl RedirectOauthDriver {
    pub fn new(gateway: Arc<dyn OauthGateway>) -> Self {
        Self { gateway }
    }

    fn api_key<'c>(credential: &'c Credential) -> Result<&'c str, BrokerError> {
        credential
            .api_key
            .as_deref()
            .ok_or_else(|| BrokerError::InvalidCredential {
                cause: "api_key missing".into(),
            })
    }
}

#[async_trait::async_trait]
impl ProtocolDriver for RedirectOauthDriver {
    fn broker(&self) -> Broker {
        Broker::RedirectOauth
    }

    fn can_self_heal(&self) -> bool {
        false
    }

    async fn begin_login(&self, credential: &Credential) -> Result<LoginHandoff, BrokerError> {
        let state = uuid::Uuid::new_v4().to_string();
        let url = self.gateway.login_url(Self::api_key(credential)?, &state);
        Ok(LoginHandoff::Redirect {
            url,
            issued: IssuedLogin {
                state: Some(state),
                consent_id: None,
            },
        })
    }

    async fn complete_login(
        &self,
        credential: &Credential,
        issued: &IssuedLogin,
        callback: &LoginCallback,
    ) -> Result<LoginOutcome, BrokerError> {
        // The echoed state must match what begin_login issued; anything else
        // is a fatal mismatch, not a retry.
        match (&issued.state, &callback.state) {
            (Some(expected), Some(echoed)) if expected == echoed => {}
            _ => return Err(BrokerError::StateMismatch),
        }

        let request_token =
            callback
                .request_token
                .as_deref()
                .ok_or_else(|| BrokerError::AuthRejected {
                    cause: "request_token missing from callback".into(),
                })?;

        let api_key = Self::api_key(credential)?;
        let api_secret =
            credential
                .api_secret
                .as_deref()
                .ok_or_else(|| BrokerError::InvalidCredential {
                    cause: "api_secret missing".into(),
                })?;

        let exchange = self
            .gateway
            .exchange_request_token(api_key, api_secret, request_token)
            .await
            .map_err(|e| classify_upstream(self.is_auth_error(&e), &e))?;

        let handle = self.gateway.data_handle(api_key, &exchange.access_token);
        Ok(LoginOutcome {
            tokens: SessionTokens {
                broker: self.broker(),
                external_user_id: credential.external_user_id.clone(),
                access_token: exchange.access_token,
                refresh_token: None,
                feed_token: None,
                client_id: exchange.broker_user_id,
                connected: true,
                last_connected_at: Some(Utc::now()),
            },
            handle: Some(handle),
        })
    }

    fn is_auth_error(&self, err: &UpstreamError) -> bool {
        if err.code.as_deref() == Some("TokenException") {
            return true;
        }
        err.kind == UpstreamErrorKind::Status(403)
    }

    fn rebuild_handle(
        &self,
        credential: &Credential,
        tokens: &SessionTokens,
    ) -> Option<Arc<dyn BrokerHandle>> {
        let api_key = credential.api_key.as_deref()?;
        Some(self.gateway.data_handle(api_key, &tokens.access_token))
    }
}
