use super::BrokerHandle;
use crate::domain_model::*;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One cached session: the persistable tokens plus, when the protocol needs
/// one, the live client handle that never touches the repository.
#[derive(Clone)]
pub struct CachedSession {
    pub tokens: SessionTokens,
    pub handle: Option<Arc<dyn BrokerHandle>>,
    /// Set on restored entries whose protocol requires a live handle: the
    /// next use must relogin instead of pretending the handle survived the
    /// restart.
    pub handle_missing: bool,
}

impl CachedSession {
    pub fn tokens_only(tokens: SessionTokens) -> Self {
        Self {
            tokens,
            handle: None,
            handle_missing: false,
        }
    }

    pub fn with_handle(tokens: SessionTokens, handle: Arc<dyn BrokerHandle>) -> Self {
        Self {
            tokens,
            handle: Some(handle),
            handle_missing: false,
        }
    }
}

/// Process-local mirror of active sessions. Purely in-memory; also hands out
/// the per-key mutex that serializes multi-step logins for one pair.
pub trait SessionCache: Send + Sync {
    fn get(&self, key: &SessionKey) -> Option<CachedSession>;

    fn put(&self, entry: CachedSession);

    fn invalidate(&self, key: &SessionKey);

    /// The login-attempt lock for this pair. Callers hold the guard across
    /// the whole begin/complete exchange; at most one per pair exists.
    fn login_lock(&self, key: &SessionKey) -> Arc<Mutex<()>>;
}
