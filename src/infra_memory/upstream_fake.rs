use crate::domain_port::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Minimal fake upstreams for the fake backend and tests. Extend the
// scripting hooks as more failure shapes need simulating.

/// Tokens revoked out-of-band; handles bound to one of these fail with the
/// owning protocol's auth-error shape.
#[derive(Default)]
struct Revocations(Mutex<HashSet<String>>);

impl Revocations {
    fn revoke(&self, token: &str) {
        self.0.lock().unwrap().insert(token.to_string());
    }

    fn is_revoked(&self, token: &str) -> bool {
        self.0.lock().unwrap().contains(token)
    }
}

struct FakeHandle {
    token: String,
    auth_error: UpstreamError,
    revocations: Arc<Revocations>,
}

#[async_trait::async_trait]
impl BrokerHandle for FakeHandle {
    async fn execute(&self, op: BrokerOp) -> Result<serde_json::Value, UpstreamError> {
        if self.revocations.is_revoked(&self.token) {
            return Err(self.auth_error.clone());
        }
        Ok(json!({ "op": op.as_str(), "data": [] }))
    }
}

// region redirect-oauth

pub struct FakeOauthGateway {
    seq: AtomicUsize,
    exchange_calls: AtomicUsize,
    fail_exchange: Mutex<Option<UpstreamError>>,
    revocations: Arc<Revocations>,
}

impl FakeOauthGateway {
    pub fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            fail_exchange: Mutex::new(None),
            revocations: Arc::new(Revocations::default()),
        }
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_exchange(&self, err: UpstreamError) {
        *self.fail_exchange.lock().unwrap() = Some(err);
    }

    pub fn revoke(&self, access_token: &str) {
        self.revocations.revoke(access_token);
    }
}

#[async_trait::async_trait]
impl OauthGateway for FakeOauthGateway {
    fn login_url(&self, api_key: &str, state: &str) -> String {
        format!("https://oauth.fake/connect/login?api_key={api_key}&state={state}")
    }

    async fn exchange_request_token(
        &self,
        _api_key: &str,
        _api_secret: &str,
        _request_token: &str,
    ) -> Result<OauthExchange, UpstreamError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_exchange.lock().unwrap().take() {
            return Err(err);
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(OauthExchange {
            access_token: format!("oauth-access-{n}"),
            broker_user_id: Some("BRK001".to_string()),
        })
    }

    fn data_handle(&self, _api_key: &str, access_token: &str) -> Arc<dyn BrokerHandle> {
        Arc::new(FakeHandle {
            token: access_token.to_string(),
            auth_error: UpstreamError::status(403, "Token is invalid or has expired")
                .with_code("TokenException"),
            revocations: self.revocations.clone(),
        })
    }
}

// endregion

// region partner-consent

pub struct FakeConsentGateway {
    seq: AtomicUsize,
    generate_calls: AtomicUsize,
    consume_calls: AtomicUsize,
    generate_delay: Mutex<Option<Duration>>,
    fail_consume: Mutex<Option<UpstreamError>>,
    revocations: Arc<Revocations>,
}

impl FakeConsentGateway {
    pub fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            consume_calls: AtomicUsize::new(0),
            generate_delay: Mutex::new(None),
            fail_consume: Mutex::new(None),
            revocations: Arc::new(Revocations::default()),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn consume_calls(&self) -> usize {
        self.consume_calls.load(Ordering::SeqCst)
    }

    /// Hold generate-consent open long enough for a racing caller to arrive.
    pub fn set_generate_delay(&self, delay: Duration) {
        *self.generate_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next_consume(&self, err: UpstreamError) {
        *self.fail_consume.lock().unwrap() = Some(err);
    }

    pub fn revoke(&self, access_token: &str) {
        self.revocations.revoke(access_token);
    }
}

#[async_trait::async_trait]
impl ConsentGateway for FakeConsentGateway {
    async fn generate_consent(
        &self,
        _partner_id: &str,
        _partner_secret: &str,
    ) -> Result<String, UpstreamError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.generate_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!("consent-{n}"))
    }

    fn consent_login_url(&self, consent_id: &str) -> String {
        format!("https://consent.fake/consent-login?consentId={consent_id}")
    }

    async fn consume_consent(
        &self,
        _partner_id: &str,
        _partner_secret: &str,
        token_id: &str,
    ) -> Result<ConsentGrant, UpstreamError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_consume.lock().unwrap().take() {
            return Err(err);
        }
        Ok(ConsentGrant {
            client_id: "CL1001".to_string(),
            access_token: format!("consent-access-{token_id}"),
        })
    }

    fn data_handle(&self, _client_id: &str, access_token: &str) -> Arc<dyn BrokerHandle> {
        Arc::new(FakeHandle {
            token: access_token.to_string(),
            auth_error: UpstreamError::status(401, "unauthorized"),
            revocations: self.revocations.clone(),
        })
    }
}

// endregion

// region password-totp

pub struct FakeTotpGateway {
    seq: AtomicUsize,
    login_calls: AtomicUsize,
    last_code: Mutex<Option<String>>,
    latest_token: Mutex<Option<String>>,
    fail_login: Mutex<Option<UpstreamError>>,
    revocations: Arc<Revocations>,
}

impl FakeTotpGateway {
    pub fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            last_code: Mutex::new(None),
            latest_token: Mutex::new(None),
            fail_login: Mutex::new(None),
            revocations: Arc::new(Revocations::default()),
        }
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn last_totp_code(&self) -> Option<String> {
        self.last_code.lock().unwrap().clone()
    }

    pub fn fail_next_login(&self, err: UpstreamError) {
        *self.fail_login.lock().unwrap() = Some(err);
    }

    /// Kill the most recently issued session, as the upstream does when the
    /// token expires server-side.
    pub fn revoke_latest(&self) {
        if let Some(token) = self.latest_token.lock().unwrap().clone() {
            self.revocations.revoke(&token);
        }
    }
}

#[async_trait::async_trait]
impl TotpGateway for FakeTotpGateway {
    async fn generate_session(
        &self,
        _api_key: &str,
        _client_code: &str,
        _password: &str,
        totp_code: &str,
    ) -> Result<TotpLogin, UpstreamError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().unwrap() = Some(totp_code.to_string());
        if let Some(err) = self.fail_login.lock().unwrap().take() {
            return Err(err);
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        let token = format!("jwt-{n}");
        *self.latest_token.lock().unwrap() = Some(token.clone());
        Ok(TotpLogin {
            access_token: token.clone(),
            refresh_token: Some(format!("refresh-{n}")),
            feed_token: Some(format!("feed-{n}")),
            handle: Arc::new(FakeHandle {
                token,
                auth_error: UpstreamError::status(401, "Invalid Token").with_code("AG8001"),
                revocations: self.revocations.clone(),
            }),
        })
    }
}

// endregion
