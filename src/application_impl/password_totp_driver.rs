use super::totp;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::sync::Arc;

/// Password + TOTP login, entirely server-side: the driver computes the
/// current 6-digit code from the stored seed and exchanges
/// (client_code, password, code) for tokens plus a live upstream client.
/// That client is stateful and cannot be rebuilt from the token, but since
/// every secret is known here the driver can redo the whole login on demand.
pub struct PasswordTotpDriver {
    gateway: Arc<dyn TotpGateway>,
}

impl PasswordTotpDriver {
    pub fn new(gateway: Arc<dyn TotpGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl ProtocolDriver for PasswordTotpDriver {
    fn broker(&self) -> Broker {
        Broker::PasswordTotp
    }

    fn can_self_heal(&self) -> bool {
        true
    }

    async fn begin_login(&self, _credential: &Credential) -> Result<LoginHandoff, BrokerError> {
        Ok(LoginHandoff::Ready)
    }

    async fn complete_login(
        &self,
        credential: &Credential,
        _issued: &IssuedLogin,
        _callback: &LoginCallback,
    ) -> Result<LoginOutcome, BrokerError> {
        let missing = |field: &str| BrokerError::InvalidCredential {
            cause: format!("{field} missing"),
        };
        let api_key = credential.api_key.as_deref().ok_or_else(|| missing("api_key"))?;
        let password = credential
            .login_password
            .as_deref()
            .ok_or_else(|| missing("login_password"))?;
        let seed = credential
            .totp_seed
            .as_deref()
            .ok_or_else(|| missing("totp_seed"))?;

        let (code, _remaining) = totp::now_code(seed).map_err(|e| BrokerError::AuthRejected {
            cause: e.to_string(),
        })?;

        // The external user id doubles as the broker-side client code.
        let client_code = credential.external_user_id.0.as_str();
        let login = self
            .gateway
            .generate_session(api_key, client_code, password, &code)
            .await
            .map_err(|e| classify_upstream(self.is_auth_error(&e), &e))?;

        Ok(LoginOutcome {
            tokens: SessionTokens {
                broker: self.broker(),
                external_user_id: credential.external_user_id.clone(),
                access_token: login.access_token,
                refresh_token: login.refresh_token,
                feed_token: login.feed_token,
                client_id: None,
                connected: true,
                last_connected_at: Some(Utc::now()),
            },
            handle: Some(login.handle),
        })
    }

    fn is_auth_error(&self, err: &UpstreamError) -> bool {
        if err.code.as_deref() == Some("AG8001") {
            return true;
        }
        err.message.contains("AG8001") || err.message.contains("Invalid Token")
    }

    fn rebuild_handle(
        &self,
        _credential: &Credential,
        _tokens: &SessionTokens,
    ) -> Option<Arc<dyn BrokerHandle>> {
        // The upstream library binds behavior to the client instance; a
        // stored token alone cannot bring one back.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::FakeTotpGateway;

    const SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn credential() -> Credential {
        Credential {
            broker: Broker::PasswordTotp,
            external_user_id: "C123".into(),
            api_key: Some("key".into()),
            api_secret: None,
            client_id: None,
            direct_access_token: None,
            totp_seed: Some(SEED.into()),
            login_password: Some("pw".into()),
        }
    }

    #[tokio::test]
    async fn login_is_synchronous_and_yields_a_live_handle() {
        let gateway = Arc::new(FakeTotpGateway::new());
        let driver = PasswordTotpDriver::new(gateway.clone());

        assert!(matches!(
            driver.begin_login(&credential()).await.unwrap(),
            LoginHandoff::Ready
        ));

        let outcome = driver
            .complete_login(&credential(), &IssuedLogin::default(), &LoginCallback::default())
            .await
            .unwrap();
        assert!(outcome.handle.is_some());
        assert!(outcome.tokens.refresh_token.is_some());
        assert!(outcome.tokens.feed_token.is_some());
        assert_eq!(gateway.login_calls(), 1);

        // The submitted code came from the registered seed.
        let sent = gateway.last_totp_code().expect("code recorded");
        assert_eq!(sent.len(), 6);
        assert!(sent.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn bad_seed_rejects_before_any_upstream_call() {
        let gateway = Arc::new(FakeTotpGateway::new());
        let driver = PasswordTotpDriver::new(gateway.clone());
        let mut cred = credential();
        cred.totp_seed = Some("!!! not base32".into());
        let err = driver
            .complete_login(&cred, &IssuedLogin::default(), &LoginCallback::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthRejected { .. }));
        assert_eq!(gateway.login_calls(), 0);
    }

    #[test]
    fn classifier_recognizes_ag8001_and_invalid_token_text() {
        let driver = PasswordTotpDriver::new(Arc::new(FakeTotpGateway::new()));
        assert!(driver.is_auth_error(&UpstreamError::status(403, "session gone").with_code("AG8001")));
        assert!(driver.is_auth_error(&UpstreamError::payload("AG8001: token expired")));
        assert!(driver.is_auth_error(&UpstreamError::status(401, "Invalid Token")));
        assert!(!driver.is_auth_error(&UpstreamError::status(500, "server error")));
        assert!(!driver.is_auth_error(&UpstreamError::transport("unreachable")));
    }

    #[test]
    fn never_rebuilds_a_handle_from_tokens() {
        let driver = PasswordTotpDriver::new(Arc::new(FakeTotpGateway::new()));
        let tokens = SessionTokens {
            broker: Broker::PasswordTotp,
            external_user_id: "C123".into(),
            access_token: "jwt".into(),
            refresh_token: None,
            feed_token: None,
            client_id: None,
            connected: true,
            last_connected_at: Some(Utc::now()),
        };
        assert!(driver.rebuild_handle(&credential(), &tokens).is_none());
    }
}
