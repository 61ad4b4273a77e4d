use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Pass-through in front of the broker data calls. The only automatic
/// recovery in the system lives here: when a call fails in a way the
/// owning driver recognizes as an auth failure, the cached session is
/// invalidated and the call retried once through `ensure_valid`. A second
/// failure is surfaced as-is.
pub struct RealBrokerApi {
    manager: Arc<dyn SessionManager>,
    drivers: HashMap<Broker, Arc<dyn ProtocolDriver>>,
}

impl RealBrokerApi {
    pub fn new(manager: Arc<dyn SessionManager>, drivers: Vec<Arc<dyn ProtocolDriver>>) -> Self {
        let drivers = drivers.into_iter().map(|d| (d.broker(), d)).collect();
        Self { manager, drivers }
    }
}

#[async_trait::async_trait]
impl BrokerApi for RealBrokerApi {
    async fn call(&self, key: &SessionKey, op: BrokerOp) -> Result<serde_json::Value, BrokerError> {
        let driver = self
            .drivers
            .get(&key.broker)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownBroker(key.broker.to_string()))?;

        let handle = self.manager.ensure_valid(key).await?;
        match handle.execute(op).await {
            Ok(value) => Ok(value),
            Err(err) if driver.is_auth_error(&err) => {
                warn!(%key, %op, "auth error from upstream, forcing re-authentication");
                self.manager.invalidate(key).await;
                let handle = self.manager.ensure_valid(key).await?;
                handle
                    .execute(op)
                    .await
                    .map_err(|e| classify_upstream(driver.is_auth_error(&e), &e))
            }
            Err(err) => Err(classify_upstream(false, &err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::*;
    use crate::infra_memory::*;

    const SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    struct Fixture {
        api: RealBrokerApi,
        manager: Arc<RealSessionManager>,
        sessions: Arc<MemorySessionRepo>,
        oauth: Arc<FakeOauthGateway>,
        totp: Arc<FakeTotpGateway>,
    }

    fn fixture() -> Fixture {
        let credentials = Arc::new(MemoryCredentialRepo::new());
        let sessions = Arc::new(MemorySessionRepo::new());
        let oauth = Arc::new(FakeOauthGateway::new());
        let consent = Arc::new(FakeConsentGateway::new());
        let totp = Arc::new(FakeTotpGateway::new());
        let drivers: Vec<Arc<dyn ProtocolDriver>> = vec![
            Arc::new(RedirectOauthDriver::new(oauth.clone())),
            Arc::new(PartnerConsentDriver::new(consent.clone())),
            Arc::new(PasswordTotpDriver::new(totp.clone())),
        ];
        let manager = Arc::new(RealSessionManager::new(
            credentials,
            sessions.clone(),
            Arc::new(MemorySessionCache::new()),
            drivers.clone(),
            SessionPolicy::default(),
        ));
        let api = RealBrokerApi::new(manager.clone(), drivers);
        Fixture {
            api,
            manager,
            sessions,
            oauth,
            totp,
        }
    }

    fn totp_credential(user: &str) -> Credential {
        Credential {
            broker: Broker::PasswordTotp,
            external_user_id: user.into(),
            api_key: Some("key".into()),
            api_secret: None,
            client_id: None,
            direct_access_token: None,
            totp_seed: Some(SEED.into()),
            login_password: Some("pw".into()),
        }
    }

    fn oauth_credential(user: &str) -> Credential {
        Credential {
            broker: Broker::RedirectOauth,
            external_user_id: user.into(),
            api_key: Some("key".into()),
            api_secret: Some("secret".into()),
            client_id: None,
            direct_access_token: None,
            totp_seed: None,
            login_password: None,
        }
    }

    async fn totp_login(fix: &Fixture, key: &SessionKey) {
        fix.manager
            .register_credential(totp_credential(&key.external_user_id.0))
            .await
            .unwrap();
        fix.manager.start_login(key).await.unwrap();
    }

    async fn oauth_login(fix: &Fixture, key: &SessionKey) {
        fix.manager
            .register_credential(oauth_credential(&key.external_user_id.0))
            .await
            .unwrap();
        let StartLogin::Redirect { redirect_url } = fix.manager.start_login(key).await.unwrap()
        else {
            panic!("expected redirect");
        };
        let state = redirect_url.split("state=").nth(1).unwrap().to_string();
        fix.manager
            .complete_login(
                key,
                LoginCallback {
                    request_token: Some("rt".into()),
                    consent_token: None,
                    state: Some(state),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn healthy_session_passes_straight_through() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        totp_login(&fix, &key).await;

        let value = fix.api.call(&key, BrokerOp::Orders).await.unwrap();
        assert_eq!(value["op"], "orders");
        assert_eq!(fix.totp.login_calls(), 1);
    }

    #[tokio::test]
    async fn auth_failure_heals_and_retries_exactly_once() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        totp_login(&fix, &key).await;

        // Kill the live session server-side; the cached handle is now dead.
        fix.totp.revoke_latest();

        let value = fix.api.call(&key, BrokerOp::Trades).await.unwrap();
        assert_eq!(value["op"], "trades");
        // One initial login plus exactly one healing relogin.
        assert_eq!(fix.totp.login_calls(), 2);
    }

    #[tokio::test]
    async fn second_failure_is_surfaced_not_retried() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        totp_login(&fix, &key).await;

        fix.totp.revoke_latest();
        fix.totp
            .fail_next_login(UpstreamError::status(503, "maintenance window"));

        let err = fix.api.call(&key, BrokerOp::Orders).await.unwrap_err();
        assert!(matches!(err, BrokerError::UpstreamUnavailable { .. }));
        // The failed relogin was the second and last upstream attempt.
        assert_eq!(fix.totp.login_calls(), 2);
    }

    #[tokio::test]
    async fn oauth_auth_failure_surfaces_reauth_required() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        oauth_login(&fix, &key).await;

        let token = fix.sessions.get(&key).await.unwrap().unwrap().access_token;
        fix.oauth.revoke(&token);

        let err = fix.api.call(&key, BrokerOp::Positions).await.unwrap_err();
        assert!(matches!(err, BrokerError::ReauthRequired { .. }));
        // The one-time exchange was never re-attempted with a stale token.
        assert_eq!(fix.oauth.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn unconnected_pair_never_reaches_upstream() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        let err = fix.api.call(&key, BrokerOp::Orders).await.unwrap_err();
        assert!(matches!(err, BrokerError::ReauthRequired { .. }));
    }
}
