use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::sync::Arc;

/// Partner-consent flow with two sub-modes. Direct mode: the registration
/// already carries a usable (client_id, access_token) pair and login is a
/// single local step. Consent mode: generate-consent issues a consent id,
/// the user approves in a browser, and consume-consent trades the returned
/// token for the client's credentials. Both legs are redirect- or
/// externally-supplied, so the driver cannot heal itself.
pub struct PartnerConsentDriver {
    gateway: Arc<dyn ConsentGateway>,
}

impl PartnerConsentDriver {
    pub fn new(gateway: Arc<dyn ConsentGateway>) -> Self {
        Self { gateway }
    }

    fn partner_creds<'c>(credential: &'c Credential) -> Result<(&'c str, &'c str), BrokerError> {
        match (credential.api_key.as_deref(), credential.api_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(BrokerError::InvalidCredential {
                cause: "partner api_key and api_secret missing".into(),
            }),
        }
    }

    fn direct_outcome(&self, credential: &Credential) -> Result<LoginOutcome, BrokerError> {
        let (client_id, access_token) = match (
            credential.client_id.as_deref(),
            credential.direct_access_token.as_deref(),
        ) {
            (Some(id), Some(token)) => (id, token),
            _ => {
                return Err(BrokerError::InvalidCredential {
                    cause: "direct mode needs client_id and direct_access_token".into(),
                });
            }
        };
        let handle = self.gateway.data_handle(client_id, access_token);
        Ok(LoginOutcome {
            tokens: SessionTokens {
                broker: self.broker(),
                external_user_id: credential.external_user_id.clone(),
                access_token: access_token.to_string(),
                refresh_token: None,
                feed_token: None,
                client_id: Some(client_id.to_string()),
                connected: true,
                last_connected_at: Some(Utc::now()),
            },
            handle: Some(handle),
        })
    }
}

#[async_trait::async_trait]
impl ProtocolDriver for PartnerConsentDriver {
    fn broker(&self) -> Broker {
        Broker::PartnerConsent
    }

    fn can_self_heal(&self) -> bool {
        false
    }

    async fn begin_login(&self, credential: &Credential) -> Result<LoginHandoff, BrokerError> {
        if credential.has_direct_token() {
            return Ok(LoginHandoff::Ready);
        }

        let (partner_id, partner_secret) = Self::partner_creds(credential)?;
        let consent_id = self
            .gateway
            .generate_consent(partner_id, partner_secret)
            .await
            .map_err(|e| classify_upstream(self.is_auth_error(&e), &e))?;

        let url = self.gateway.consent_login_url(&consent_id);
        Ok(LoginHandoff::Redirect {
            url,
            issued: IssuedLogin {
                state: None,
                consent_id: Some(consent_id),
            },
        })
    }

    async fn complete_login(
        &self,
        credential: &Credential,
        issued: &IssuedLogin,
        callback: &LoginCallback,
    ) -> Result<LoginOutcome, BrokerError> {
        if issued.consent_id.is_none() {
            // Direct mode: begin_login answered Ready and nothing upstream
            // has happened yet.
            return self.direct_outcome(credential);
        }

        let token_id =
            callback
                .consent_token
                .as_deref()
                .ok_or_else(|| BrokerError::AuthRejected {
                    cause: "consent token missing from callback".into(),
                })?;

        let (partner_id, partner_secret) = Self::partner_creds(credential)?;
        let grant = self
            .gateway
            .consume_consent(partner_id, partner_secret, token_id)
            .await
            .map_err(|e| classify_upstream(self.is_auth_error(&e), &e))?;

        let handle = self.gateway.data_handle(&grant.client_id, &grant.access_token);
        Ok(LoginOutcome {
            tokens: SessionTokens {
                broker: self.broker(),
                external_user_id: credential.external_user_id.clone(),
                access_token: grant.access_token,
                refresh_token: None,
                feed_token: None,
                client_id: Some(grant.client_id),
                connected: true,
                last_connected_at: Some(Utc::now()),
            },
            handle: Some(handle),
        })
    }

    fn is_auth_error(&self, err: &UpstreamError) -> bool {
        err.kind == UpstreamErrorKind::Status(401)
    }

    fn rebuild_handle(
        &self,
        credential: &Credential,
        tokens: &SessionTokens,
    ) -> Option<Arc<dyn BrokerHandle>> {
        // Fall back through the places a client id can live; the account id
        // itself is the last resort the upstream accepts.
        let client_id = tokens
            .client_id
            .clone()
            .or_else(|| credential.client_id.clone())
            .unwrap_or_else(|| tokens.external_user_id.0.clone());
        Some(self.gateway.data_handle(&client_id, &tokens.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::FakeConsentGateway;

    fn direct_credential() -> Credential {
        Credential {
            broker: Broker::PartnerConsent,
            external_user_id: "U1".into(),
            api_key: None,
            api_secret: None,
            client_id: Some("C100".into()),
            direct_access_token: Some("direct-token".into()),
            totp_seed: None,
            login_password: None,
        }
    }

    fn partner_credential() -> Credential {
        Credential {
            broker: Broker::PartnerConsent,
            external_user_id: "U1".into(),
            api_key: Some("partner-id".into()),
            api_secret: Some("partner-secret".into()),
            client_id: None,
            direct_access_token: None,
            totp_seed: None,
            login_password: None,
        }
    }

    #[tokio::test]
    async fn direct_mode_completes_without_upstream() {
        let gateway = Arc::new(FakeConsentGateway::new());
        let driver = PartnerConsentDriver::new(gateway.clone());

        let handoff = driver.begin_login(&direct_credential()).await.unwrap();
        assert!(matches!(handoff, LoginHandoff::Ready));

        let outcome = driver
            .complete_login(
                &direct_credential(),
                &IssuedLogin::default(),
                &LoginCallback::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.tokens.access_token, "direct-token");
        assert_eq!(outcome.tokens.client_id.as_deref(), Some("C100"));
        assert_eq!(gateway.generate_calls(), 0);
        assert_eq!(gateway.consume_calls(), 0);
    }

    #[tokio::test]
    async fn consent_mode_round_trips_the_consent_id() {
        let gateway = Arc::new(FakeConsentGateway::new());
        let driver = PartnerConsentDriver::new(gateway.clone());

        let LoginHandoff::Redirect { url, issued } =
            driver.begin_login(&partner_credential()).await.unwrap()
        else {
            panic!("expected redirect handoff");
        };
        let consent_id = issued.consent_id.clone().expect("consent id issued");
        assert!(url.contains(&consent_id));
        assert_eq!(gateway.generate_calls(), 1);

        let callback = LoginCallback {
            request_token: None,
            consent_token: Some("tok-abc".into()),
            state: None,
        };
        let outcome = driver
            .complete_login(&partner_credential(), &issued, &callback)
            .await
            .unwrap();
        assert!(outcome.tokens.connected);
        assert!(outcome.tokens.client_id.is_some());
        assert_eq!(gateway.consume_calls(), 1);
    }

    #[tokio::test]
    async fn missing_consent_token_rejects_the_attempt() {
        let gateway = Arc::new(FakeConsentGateway::new());
        let driver = PartnerConsentDriver::new(gateway.clone());
        let issued = IssuedLogin {
            state: None,
            consent_id: Some("consent-1".into()),
        };
        let err = driver
            .complete_login(&partner_credential(), &issued, &LoginCallback::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthRejected { .. }));
        assert_eq!(gateway.consume_calls(), 0);
    }

    #[test]
    fn classifier_recognizes_401_only() {
        let driver = PartnerConsentDriver::new(Arc::new(FakeConsentGateway::new()));
        assert!(driver.is_auth_error(&UpstreamError::status(401, "unauthorized")));
        assert!(!driver.is_auth_error(&UpstreamError::status(400, "bad request")));
        assert!(!driver.is_auth_error(&UpstreamError::status(500, "oops")));
        assert!(!driver.is_auth_error(&UpstreamError::timeout("slow")));
    }
}
