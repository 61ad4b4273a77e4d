use super::totp;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

/// Lifetimes the manager applies on top of whatever the brokers report.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// How long after the last successful connect a durable session stays
    /// eligible for restore. A policy default, not a broker guarantee.
    pub restore_ttl: Duration,
    /// How long an unfinished login attempt may sit before a new attempt is
    /// allowed to displace it.
    pub login_attempt_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            restore_ttl: Duration::hours(24),
            login_attempt_ttl: Duration::minutes(10),
        }
    }
}

/// One in-flight login. Holding the owned guard is what serializes logins
/// per pair; dropping this struct releases it, so every exit path from the
/// begin/complete exchange frees the pair automatically.
struct PendingLogin {
    issued: IssuedLogin,
    started_at: DateTime<Utc>,
    _guard: OwnedMutexGuard<()>,
}

pub struct RealSessionManager {
    credentials: Arc<dyn CredentialRepo>,
    sessions: Arc<dyn SessionRepo>,
    cache: Arc<dyn SessionCache>,
    drivers: HashMap<Broker, Arc<dyn ProtocolDriver>>,
    pending: DashMap<SessionKey, PendingLogin>,
    policy: SessionPolicy,
}

impl RealSessionManager {
    pub fn new(
        credentials: Arc<dyn CredentialRepo>,
        sessions: Arc<dyn SessionRepo>,
        cache: Arc<dyn SessionCache>,
        drivers: Vec<Arc<dyn ProtocolDriver>>,
        policy: SessionPolicy,
    ) -> Self {
        let drivers = drivers.into_iter().map(|d| (d.broker(), d)).collect();
        Self {
            credentials,
            sessions,
            cache,
            drivers,
            pending: DashMap::new(),
            policy,
        }
    }

    fn driver(&self, broker: Broker) -> Result<Arc<dyn ProtocolDriver>, BrokerError> {
        self.drivers
            .get(&broker)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownBroker(broker.to_string()))
    }

    fn connect_url(key: &SessionKey) -> String {
        format!(
            "/api/v1/login/{}?user_id={}",
            key.broker, key.external_user_id
        )
    }

    fn status_of(tokens: &SessionTokens) -> SessionStatus {
        SessionStatus {
            broker: tokens.broker,
            external_user_id: tokens.external_user_id.clone(),
            connected: tokens.connected,
            last_connected_at: tokens.last_connected_at,
        }
    }

    async fn credential(&self, key: &SessionKey) -> Result<Credential, BrokerError> {
        self.credentials
            .get(key)
            .await?
            .ok_or(BrokerError::SessionNotFound)
    }

    /// Cache entry for a durable row: token-backed protocols get their
    /// handle rebuilt on the spot, the rest are flagged for lazy relogin.
    async fn cache_entry_for(&self, tokens: SessionTokens) -> Result<CachedSession, BrokerError> {
        let driver = self.driver(tokens.broker)?;
        let credential = self.credentials.get(&tokens.key()).await?;
        let handle = credential
            .as_ref()
            .and_then(|c| driver.rebuild_handle(c, &tokens));
        Ok(match handle {
            Some(handle) => CachedSession::with_handle(tokens, handle),
            None => CachedSession {
                tokens,
                handle: None,
                handle_missing: true,
            },
        })
    }

    /// Repository-backed restore for one pair, applying the TTL policy.
    /// Over-TTL rows are flipped to disconnected right here rather than by
    /// any background job.
    async fn restore_into_cache(
        &self,
        key: &SessionKey,
    ) -> Result<Option<CachedSession>, BrokerError> {
        let Some(row) = self.sessions.get(key).await? else {
            return Ok(None);
        };
        if !row.connected {
            return Ok(None);
        }
        if !row.within_ttl(Utc::now(), self.policy.restore_ttl) {
            self.sessions.mark_disconnected(key).await?;
            self.cache.invalidate(key);
            info!(%key, "session past restore ttl, marked disconnected");
            return Ok(None);
        }
        let entry = self.cache_entry_for(row).await?;
        self.cache.put(entry.clone());
        Ok(Some(entry))
    }

    async fn store_session(
        &self,
        credential: &Credential,
        outcome: LoginOutcome,
    ) -> Result<SessionStatus, BrokerError> {
        let LoginOutcome { tokens, handle } = outcome;
        self.sessions.save(&tokens).await?;

        let driver = self.driver(tokens.broker)?;
        let handle = handle.or_else(|| driver.rebuild_handle(credential, &tokens));
        let entry = match handle {
            Some(handle) => CachedSession::with_handle(tokens.clone(), handle),
            None => CachedSession {
                tokens: tokens.clone(),
                handle: None,
                handle_missing: true,
            },
        };
        self.cache.put(entry);

        info!(broker = %tokens.broker, user = %tokens.external_user_id, "session established");
        Ok(Self::status_of(&tokens))
    }
}

#[async_trait::async_trait]
impl SessionManager for RealSessionManager {
    async fn register_credential(&self, credential: Credential) -> Result<(), BrokerError> {
        credential
            .validate()
            .map_err(|e| BrokerError::InvalidCredential {
                cause: e.to_string(),
            })?;
        if credential.broker == Broker::PasswordTotp {
            // Decode the seed now so a mistyped secret fails registration,
            // not the first relogin at three in the morning.
            let seed = credential.totp_seed.as_deref().unwrap_or_default();
            totp::code_at(seed, 0).map_err(|e| BrokerError::InvalidCredential {
                cause: e.to_string(),
            })?;
        }
        self.credentials.upsert(&credential).await?;
        info!(broker = %credential.broker, user = %credential.external_user_id, "credential registered");
        Ok(())
    }

    async fn start_login(&self, key: &SessionKey) -> Result<StartLogin, BrokerError> {
        let credential = self.credential(key).await?;
        let driver = self.driver(key.broker)?;

        // Displace an abandoned attempt so its guard releases; a live one
        // keeps the lock below busy and the caller is told to retry.
        let stale = self
            .pending
            .get(key)
            .map(|p| Utc::now() - p.started_at >= self.policy.login_attempt_ttl)
            .unwrap_or(false);
        if stale {
            self.pending.remove(key);
            warn!(%key, "discarded stale login attempt");
        }

        let guard = match self.cache.login_lock(key).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return Err(BrokerError::LoginInProgress),
        };

        match driver.begin_login(&credential).await? {
            LoginHandoff::Redirect { url, issued } => {
                self.pending.insert(
                    key.clone(),
                    PendingLogin {
                        issued,
                        started_at: Utc::now(),
                        _guard: guard,
                    },
                );
                Ok(StartLogin::Redirect { redirect_url: url })
            }
            LoginHandoff::Ready => {
                let outcome = driver
                    .complete_login(&credential, &IssuedLogin::default(), &LoginCallback::default())
                    .await?;
                let session = self.store_session(&credential, outcome).await?;
                Ok(StartLogin::Connected { session })
            }
        }
    }

    async fn complete_login(
        &self,
        key: &SessionKey,
        callback: LoginCallback,
    ) -> Result<SessionStatus, BrokerError> {
        // Taking the entry consumes the attempt whatever happens next: a
        // failure drops the pair back to plain Registered and releases the
        // login guard with it.
        let Some((_, pending)) = self.pending.remove(key) else {
            return Err(BrokerError::SessionNotFound);
        };
        let credential = self.credential(key).await?;
        let driver = self.driver(key.broker)?;

        let outcome = driver
            .complete_login(&credential, &pending.issued, &callback)
            .await?;
        self.store_session(&credential, outcome).await
    }

    async fn status(&self, key: &SessionKey) -> Result<SessionStatus, BrokerError> {
        if let Some(entry) = self.cache.get(key) {
            return Ok(Self::status_of(&entry.tokens));
        }
        if let Some(entry) = self.restore_into_cache(key).await? {
            return Ok(Self::status_of(&entry.tokens));
        }
        if let Some(row) = self.sessions.get(key).await? {
            return Ok(SessionStatus {
                broker: key.broker,
                external_user_id: key.external_user_id.clone(),
                connected: false,
                last_connected_at: row.last_connected_at,
            });
        }
        if self.credentials.get(key).await?.is_some() {
            return Ok(SessionStatus {
                broker: key.broker,
                external_user_id: key.external_user_id.clone(),
                connected: false,
                last_connected_at: None,
            });
        }
        Err(BrokerError::SessionNotFound)
    }

    async fn ensure_valid(&self, key: &SessionKey) -> Result<Arc<dyn BrokerHandle>, BrokerError> {
        let driver = self.driver(key.broker)?;

        if let Some(entry) = self.cache.get(key) {
            if let Some(handle) = entry.handle {
                return Ok(handle);
            }
            // Tokens without a handle: rebuild in place when the protocol
            // is purely token-backed.
            if let Some(credential) = self.credentials.get(key).await? {
                if let Some(handle) = driver.rebuild_handle(&credential, &entry.tokens) {
                    self.cache
                        .put(CachedSession::with_handle(entry.tokens, handle.clone()));
                    return Ok(handle);
                }
            }
        }

        if !driver.can_self_heal() {
            return Err(BrokerError::ReauthRequired {
                connect_url: Some(Self::connect_url(key)),
            });
        }

        // Self-heal only revives sessions that still claim to be connected;
        // an explicit disconnect stays disconnected until someone logs in.
        let durable = self.sessions.get(key).await?;
        let healable =
            self.cache.get(key).is_some() || durable.map(|r| r.connected).unwrap_or(false);
        if !healable {
            return Err(BrokerError::ReauthRequired {
                connect_url: Some(Self::connect_url(key)),
            });
        }

        let credential = self.credential(key).await?;
        let _guard = self.cache.login_lock(key).lock_owned().await;

        // Another worker may have healed the pair while we waited.
        if let Some(entry) = self.cache.get(key) {
            if let Some(handle) = entry.handle {
                return Ok(handle);
            }
        }

        info!(%key, "re-authenticating invalid session");
        match driver.begin_login(&credential).await? {
            LoginHandoff::Ready => {}
            LoginHandoff::Redirect { .. } => {
                return Err(BrokerError::Internal(
                    "self-healing driver produced a redirect".into(),
                ));
            }
        }
        let outcome = driver
            .complete_login(&credential, &IssuedLogin::default(), &LoginCallback::default())
            .await?;
        let handle = outcome
            .handle
            .clone()
            .ok_or_else(|| BrokerError::Internal("relogin produced no handle".into()))?;
        self.store_session(&credential, outcome).await?;
        Ok(handle)
    }

    async fn invalidate(&self, key: &SessionKey) {
        self.cache.invalidate(key);
    }

    async fn disconnect(&self, key: &SessionKey) -> Result<(), BrokerError> {
        let known = self.cache.get(key).is_some()
            || self.sessions.get(key).await?.is_some()
            || self.credentials.get(key).await?.is_some();
        if !known {
            return Err(BrokerError::SessionNotFound);
        }
        self.pending.remove(key);
        self.cache.invalidate(key);
        self.sessions.mark_disconnected(key).await?;
        info!(%key, "disconnected");
        Ok(())
    }

    async fn resync(&self) -> Result<ResyncReport, BrokerError> {
        let now = Utc::now();
        let mut report = ResyncReport::default();
        for row in self.sessions.list_connected().await? {
            let key = row.key();
            if row.within_ttl(now, self.policy.restore_ttl) {
                let entry = self.cache_entry_for(row).await?;
                self.cache.put(entry);
                report.restored += 1;
            } else {
                self.sessions.mark_disconnected(&key).await?;
                self.cache.invalidate(&key);
                report.expired += 1;
            }
        }
        info!(
            restored = report.restored,
            expired = report.expired,
            "session cache resynced"
        );
        Ok(report)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionStatus>, BrokerError> {
        Ok(self
            .sessions
            .list_all()
            .await?
            .iter()
            .map(Self::status_of)
            .collect())
    }

    async fn totp_preview(&self, key: &SessionKey) -> Result<TotpPreview, BrokerError> {
        let credential = self.credential(key).await?;
        let seed = match (credential.broker, credential.totp_seed.as_deref()) {
            (Broker::PasswordTotp, Some(seed)) => seed,
            _ => {
                return Err(BrokerError::InvalidCredential {
                    cause: "totp preview needs a password-totp credential with a seed".into(),
                });
            }
        };
        let (code, remaining) =
            totp::now_code(seed).map_err(|e| BrokerError::InvalidCredential {
                cause: e.to_string(),
            })?;
        Ok(TotpPreview {
            code,
            period: totp::STEP_SECS,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{
        PartnerConsentDriver, PasswordTotpDriver, RedirectOauthDriver,
    };
    use crate::infra_memory::*;

    const SEED: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    struct Fixture {
        manager: Arc<RealSessionManager>,
        sessions: Arc<MemorySessionRepo>,
        credentials: Arc<MemoryCredentialRepo>,
        oauth: Arc<FakeOauthGateway>,
        consent: Arc<FakeConsentGateway>,
        totp: Arc<FakeTotpGateway>,
    }

    fn fixture_with_policy(policy: SessionPolicy) -> Fixture {
        let credentials = Arc::new(MemoryCredentialRepo::new());
        let sessions = Arc::new(MemorySessionRepo::new());
        let oauth = Arc::new(FakeOauthGateway::new());
        let consent = Arc::new(FakeConsentGateway::new());
        let totp = Arc::new(FakeTotpGateway::new());
        let manager = Arc::new(RealSessionManager::new(
            credentials.clone(),
            sessions.clone(),
            Arc::new(MemorySessionCache::new()),
            vec![
                Arc::new(RedirectOauthDriver::new(oauth.clone())),
                Arc::new(PartnerConsentDriver::new(consent.clone())),
                Arc::new(PasswordTotpDriver::new(totp.clone())),
            ],
            policy,
        ));
        Fixture {
            manager,
            sessions,
            credentials,
            oauth,
            consent,
            totp,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_policy(SessionPolicy::default())
    }

    /// Second manager over the same durable stores but a fresh cache: what a
    /// process restart looks like.
    fn restarted(fix: &Fixture) -> Arc<RealSessionManager> {
        restarted_with_policy(fix, SessionPolicy::default())
    }

    fn restarted_with_policy(fix: &Fixture, policy: SessionPolicy) -> Arc<RealSessionManager> {
        Arc::new(RealSessionManager::new(
            fix.credentials.clone(),
            fix.sessions.clone(),
            Arc::new(MemorySessionCache::new()),
            vec![
                Arc::new(RedirectOauthDriver::new(fix.oauth.clone())),
                Arc::new(PartnerConsentDriver::new(fix.consent.clone())),
                Arc::new(PasswordTotpDriver::new(fix.totp.clone())),
            ],
            policy,
        ))
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

    fn consent_credential(user: &str) -> Credential {
        Credential {
            broker: Broker::PartnerConsent,
            external_user_id: user.into(),
            api_key: Some("partner".into()),
            api_secret: Some("partner-secret".into()),
            client_id: None,
            direct_access_token: None,
            totp_seed: None,
            login_password: None,
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

    fn state_from(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    async fn oauth_login(fix: &Fixture, key: &SessionKey) {
        let StartLogin::Redirect { redirect_url } = fix.manager.start_login(key).await.unwrap()
        else {
            panic!("expected redirect");
        };
        fix.manager
            .complete_login(
                key,
                LoginCallback {
                    request_token: Some("rt".into()),
                    consent_token: None,
                    state: Some(state_from(&redirect_url)),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let fix = fixture();
        let cred = oauth_credential("U1");
        fix.manager.register_credential(cred.clone()).await.unwrap();
        fix.manager.register_credential(cred.clone()).await.unwrap();
        let stored = fix
            .credentials
            .get(&cred.key())
            .await
            .unwrap()
            .expect("stored");
        assert_eq!(stored.api_key, cred.api_key);
        assert_eq!(stored.api_secret, cred.api_secret);
    }

    #[tokio::test]
    async fn register_rejects_bad_combinations_up_front() {
        let fix = fixture();
        let mut cred = totp_credential("C1");
        cred.login_password = None;
        assert!(matches!(
            fix.manager.register_credential(cred).await.unwrap_err(),
            BrokerError::InvalidCredential { .. }
        ));

        let mut bad_seed = totp_credential("C1");
        bad_seed.totp_seed = Some("!!definitely not base32!!".into());
        assert!(matches!(
            fix.manager.register_credential(bad_seed).await.unwrap_err(),
            BrokerError::InvalidCredential { .. }
        ));
    }

    #[tokio::test]
    async fn oauth_login_round_trip() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        oauth_login(&fix, &key).await;

        let status = fix.manager.status(&key).await.unwrap();
        assert!(status.connected);
        assert!(status.last_connected_at.is_some());
        assert_eq!(fix.oauth.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn tampered_state_fails_and_releases_the_pair() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();

        let err = fix
            .manager
            .complete_login(
                &key,
                LoginCallback {
                    request_token: Some("rt".into()),
                    consent_token: None,
                    state: Some("tampered".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::StateMismatch));
        assert_eq!(fix.oauth.exchange_calls(), 0);
        assert!(!fix.manager.status(&key).await.unwrap().connected);

        // The attempt was consumed; the pair can start over immediately.
        assert!(fix.manager.start_login(&key).await.is_ok());
    }

    #[tokio::test]
    async fn completing_without_a_pending_attempt_is_refused() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        let err = fix
            .manager
            .complete_login(&key, LoginCallback::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::SessionNotFound));
    }

    #[tokio::test]
    async fn concurrent_start_login_reaches_upstream_once() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PartnerConsent, "U1");
        fix.manager
            .register_credential(consent_credential("U1"))
            .await
            .unwrap();
        fix.consent
            .set_generate_delay(std::time::Duration::from_millis(50));

        let (a, b) = tokio::join!(
            fix.manager.start_login(&key),
            fix.manager.start_login(&key)
        );
        let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let busy = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(BrokerError::LoginInProgress)))
            .count();
        assert_eq!(oks, 1);
        assert_eq!(busy, 1);
        assert_eq!(fix.consent.generate_calls(), 1);
    }

    #[tokio::test]
    async fn second_start_login_while_pending_is_told_to_retry() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        assert!(matches!(
            fix.manager.start_login(&key).await.unwrap_err(),
            BrokerError::LoginInProgress
        ));
    }

    #[tokio::test]
    async fn stale_pending_attempt_is_displaced() {
        let fix = fixture_with_policy(SessionPolicy {
            login_attempt_ttl: Duration::zero(),
            ..SessionPolicy::default()
        });
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        // The first attempt is instantly stale under this policy.
        assert!(fix.manager.start_login(&key).await.is_ok());
    }

    #[tokio::test]
    async fn totp_login_completes_synchronously() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        let StartLogin::Connected { session } = fix.manager.start_login(&key).await.unwrap()
        else {
            panic!("expected immediate connect");
        };
        assert!(session.connected);
        assert_eq!(fix.totp.login_calls(), 1);
        assert!(fix.manager.status(&key).await.unwrap().connected);
    }

    #[tokio::test]
    async fn disconnect_scenario_stays_disconnected() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        assert!(fix.manager.status(&key).await.unwrap().connected);

        fix.manager.disconnect(&key).await.unwrap();
        assert!(!fix.manager.status(&key).await.unwrap().connected);

        // No silent reconnect: even the self-healing driver must refuse
        // until someone explicitly logs in again.
        let err = fix.manager.ensure_valid(&key).await.unwrap_err();
        assert!(matches!(err, BrokerError::ReauthRequired { .. }));
        assert_eq!(fix.totp.login_calls(), 1);

        // Tokens are retained on the durable record for diagnostics.
        let row = fix.sessions.get(&key).await.unwrap().unwrap();
        assert!(!row.connected);
        assert!(!row.access_token.is_empty());
    }

    #[tokio::test]
    async fn restore_round_trips_tokens_after_restart() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        let saved = fix.sessions.get(&key).await.unwrap().unwrap();

        let manager2 = restarted(&fix);
        let report = manager2.resync().await.unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.expired, 0);

        let status = manager2.status(&key).await.unwrap();
        assert!(status.connected);
        assert_eq!(status.last_connected_at, saved.last_connected_at);
        // Restore produced the tokens, not a handle; nothing hit upstream.
        assert_eq!(fix.totp.login_calls(), 1);
        let row = fix.sessions.get(&key).await.unwrap().unwrap();
        assert_eq!(row, saved);
    }

    #[tokio::test]
    async fn restored_totp_session_relogs_in_on_first_use() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();

        let manager2 = restarted(&fix);
        manager2.resync().await.unwrap();
        // The restored entry has no live handle, so first use heals.
        let handle = manager2.ensure_valid(&key).await.unwrap();
        assert_eq!(fix.totp.login_calls(), 2);
        assert!(handle.execute(BrokerOp::Orders).await.is_ok());
    }

    #[tokio::test]
    async fn restored_oauth_session_serves_calls_without_relogin() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        oauth_login(&fix, &key).await;

        let manager2 = restarted(&fix);
        manager2.resync().await.unwrap();
        let handle = manager2.ensure_valid(&key).await.unwrap();
        assert!(handle.execute(BrokerOp::Positions).await.is_ok());
        assert_eq!(fix.oauth.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn over_ttl_sessions_are_evicted_not_restored() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();

        // Restart under a zero-length window: the stored session is now
        // older than the policy allows.
        let manager2 = restarted_with_policy(
            &fix,
            SessionPolicy {
                restore_ttl: Duration::zero(),
                ..SessionPolicy::default()
            },
        );
        let report = manager2.resync().await.unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(report.expired, 1);

        let status = manager2.status(&key).await.unwrap();
        assert!(!status.connected);
        assert!(!fix.sessions.get(&key).await.unwrap().unwrap().connected);
        // Eviction is pure bookkeeping; upstream saw nothing.
        assert_eq!(fix.totp.login_calls(), 1);
    }

    #[tokio::test]
    async fn status_applies_ttl_lazily_without_network() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();

        let manager2 = restarted_with_policy(
            &fix,
            SessionPolicy {
                restore_ttl: Duration::zero(),
                ..SessionPolicy::default()
            },
        );
        // No resync: the status query itself runs the lazy eviction.
        let status = manager2.status(&key).await.unwrap();
        assert!(!status.connected);
        assert!(!fix.sessions.get(&key).await.unwrap().unwrap().connected);
        assert_eq!(fix.totp.login_calls(), 1);
    }

    #[tokio::test]
    async fn self_heal_relogs_in_exactly_once() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();

        fix.manager.invalidate(&key).await;
        let handle = fix.manager.ensure_valid(&key).await.unwrap();
        assert_eq!(fix.totp.login_calls(), 2);
        assert!(handle.execute(BrokerOp::Orders).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_self_heal_collapses_to_one_relogin() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        fix.manager.invalidate(&key).await;

        let (a, b) = tokio::join!(
            fix.manager.ensure_valid(&key),
            fix.manager.ensure_valid(&key)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fix.totp.login_calls(), 2);
    }

    #[tokio::test]
    async fn oauth_never_self_heals() {
        let fix = fixture();
        let key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        oauth_login(&fix, &key).await;

        fix.manager.invalidate(&key).await;
        let err = fix.manager.ensure_valid(&key).await.unwrap_err();
        let BrokerError::ReauthRequired { connect_url } = err else {
            panic!("expected ReauthRequired, got {err:?}");
        };
        assert_eq!(
            connect_url.as_deref(),
            Some("/api/v1/login/redirect-oauth?user_id=U1")
        );
        // No stale-token exchange was attempted.
        assert_eq!(fix.oauth.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_pairs_are_reported_as_not_found() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PartnerConsent, "ghost");
        assert!(matches!(
            fix.manager.status(&key).await.unwrap_err(),
            BrokerError::SessionNotFound
        ));
        assert!(matches!(
            fix.manager.disconnect(&key).await.unwrap_err(),
            BrokerError::SessionNotFound
        ));
        assert!(matches!(
            fix.manager.start_login(&key).await.unwrap_err(),
            BrokerError::SessionNotFound
        ));
    }

    #[tokio::test]
    async fn direct_consent_mode_connects_immediately() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PartnerConsent, "U9");
        let mut cred = consent_credential("U9");
        cred.api_key = None;
        cred.api_secret = None;
        cred.client_id = Some("CL9".into());
        cred.direct_access_token = Some("direct".into());
        fix.manager.register_credential(cred).await.unwrap();

        let StartLogin::Connected { session } = fix.manager.start_login(&key).await.unwrap()
        else {
            panic!("expected immediate connect");
        };
        assert!(session.connected);
        assert_eq!(fix.consent.generate_calls(), 0);
        assert_eq!(fix.consent.consume_calls(), 0);
    }

    #[tokio::test]
    async fn totp_preview_reports_code_and_window() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        let preview = fix.manager.totp_preview(&key).await.unwrap();
        assert_eq!(preview.code.len(), 6);
        assert!(preview.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(preview.period, 30);
        assert!((1..=30).contains(&preview.remaining));

        let oauth_key = SessionKey::new(Broker::RedirectOauth, "U1");
        fix.manager
            .register_credential(oauth_credential("U1"))
            .await
            .unwrap();
        assert!(matches!(
            fix.manager.totp_preview(&oauth_key).await.unwrap_err(),
            BrokerError::InvalidCredential { .. }
        ));
    }

    #[tokio::test]
    async fn list_sessions_reflects_durable_records() {
        let fix = fixture();
        let key = SessionKey::new(Broker::PasswordTotp, "C1");
        fix.manager
            .register_credential(totp_credential("C1"))
            .await
            .unwrap();
        fix.manager.start_login(&key).await.unwrap();
        fix.manager.disconnect(&key).await.unwrap();

        let listed = fix.manager.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].connected);
    }
}
