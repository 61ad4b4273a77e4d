use crate::domain_model::*;
use crate::domain_port::BrokerHandle;
use serde::Serialize;
use std::sync::Arc;

/// Service-level error taxonomy. Driver errors are classified into this
/// exactly once, at the driver boundary; raw upstream text only survives in
/// the `cause` fields.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid credential: {cause}")]
    InvalidCredential { cause: String },
    #[error("unknown broker: {0}")]
    UnknownBroker(String),
    #[error("state mismatch; restart login")]
    StateMismatch,
    #[error("login already in progress; retry shortly")]
    LoginInProgress,
    #[error("upstream unavailable: {cause}")]
    UpstreamUnavailable { cause: String },
    #[error("authentication rejected: {cause}")]
    AuthRejected { cause: String },
    #[error("re-authentication required")]
    ReauthRequired {
        /// Local login path the caller can follow to resume the flow.
        connect_url: Option<String>,
    },
    #[error("session not found")]
    SessionNotFound,
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// What `start_login` hands back: either a browser target for the
/// human-driven leg, or the finished session when the protocol completes
/// synchronously.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartLogin {
    Redirect { redirect_url: String },
    Connected { session: SessionStatus },
}

/// Protocol-specific payload delivered by the redirect callback.
#[derive(Debug, Clone, Default)]
pub struct LoginCallback {
    pub request_token: Option<String>,
    pub consent_token: Option<String>,
    pub state: Option<String>,
}

/// Current TOTP code for display, with its window bounds.
#[derive(Debug, Clone, Serialize)]
pub struct TotpPreview {
    pub code: String,
    pub period: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResyncReport {
    pub restored: usize,
    pub expired: usize,
}

/// The one component the rest of the application talks to: drives the
/// register → connect → use → expire → reconnect → disconnect lifecycle
/// across all broker protocols.
#[async_trait::async_trait]
pub trait SessionManager: Send + Sync {
    /// Validate and upsert a credential. Idempotent.
    async fn register_credential(&self, credential: Credential) -> Result<(), BrokerError>;

    /// Begin a login for a registered pair. At most one login may be in
    /// flight per pair; a concurrent attempt is told to retry shortly.
    async fn start_login(&self, key: &SessionKey) -> Result<StartLogin, BrokerError>;

    /// Complete a pending login with the callback payload.
    async fn complete_login(
        &self,
        key: &SessionKey,
        callback: LoginCallback,
    ) -> Result<SessionStatus, BrokerError>;

    /// Connection state, answered from cache or a repository-backed restore.
    /// Never performs network I/O.
    async fn status(&self, key: &SessionKey) -> Result<SessionStatus, BrokerError>;

    /// Return a usable handle, transparently re-authenticating when the
    /// protocol allows it; otherwise fail with `ReauthRequired`.
    async fn ensure_valid(&self, key: &SessionKey) -> Result<Arc<dyn BrokerHandle>, BrokerError>;

    /// Drop the cached entry so the next `ensure_valid` starts from scratch.
    async fn invalidate(&self, key: &SessionKey);

    async fn disconnect(&self, key: &SessionKey) -> Result<(), BrokerError>;

    /// Reload connected durable sessions into the cache, eagerly flipping
    /// over-TTL records to disconnected in the same pass.
    async fn resync(&self) -> Result<ResyncReport, BrokerError>;

    async fn list_sessions(&self) -> Result<Vec<SessionStatus>, BrokerError>;

    /// Current TOTP code for a password-totp credential, for display.
    async fn totp_preview(&self, key: &SessionKey) -> Result<TotpPreview, BrokerError>;
}
