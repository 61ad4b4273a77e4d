use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// How an upstream call failed, before any protocol driver has interpreted
/// it. Drivers classify these into the service error taxonomy; the raw
/// message only survives as a diagnostic cause.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UpstreamErrorKind {
    /// Non-2xx HTTP response.
    Status(u16),
    /// Connect/read failure below HTTP.
    Transport,
    /// The caller-supplied deadline elapsed.
    Timeout,
    /// 2xx response whose body did not carry what the protocol promised.
    Payload,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream error ({kind:?}, code {code:?}): {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    /// Broker-reported error code, when the body carried one.
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Status(status),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Transport,
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Timeout,
            code: None,
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Payload,
            code: None,
            message: message.into(),
        }
    }
}

/// The broker data calls the facade forwards.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BrokerOp {
    Orders,
    Positions,
    Trades,
}

impl BrokerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerOp::Orders => "orders",
            BrokerOp::Positions => "positions",
            BrokerOp::Trades => "trades",
        }
    }
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BrokerOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orders" => Ok(BrokerOp::Orders),
            "positions" => Ok(BrokerOp::Positions),
            "trades" => Ok(BrokerOp::Trades),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// An authenticated client for one broker session. For token-based brokers
/// this is cheap to rebuild from stored tokens; for the password+TOTP broker
/// the upstream library binds behavior to the instance, so the handle must be
/// reused and can never be serialized.
#[async_trait::async_trait]
pub trait BrokerHandle: Send + Sync {
    async fn execute(&self, op: BrokerOp) -> Result<serde_json::Value, UpstreamError>;
}

/// Result of the redirect-OAuth request-token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct OauthExchange {
    pub access_token: String,
    /// Broker-side user id reported alongside the token.
    pub broker_user_id: Option<String>,
}

/// Upstream side of the redirect-OAuth flow.
#[async_trait::async_trait]
pub trait OauthGateway: Send + Sync {
    /// Browser target for the human-driven leg. No network.
    fn login_url(&self, api_key: &str, state: &str) -> String;

    /// Exchange the one-time request token delivered by the callback.
    async fn exchange_request_token(
        &self,
        api_key: &str,
        api_secret: &str,
        request_token: &str,
    ) -> Result<OauthExchange, UpstreamError>;

    /// Token-backed data client; reconstructable at will.
    fn data_handle(&self, api_key: &str, access_token: &str) -> Arc<dyn BrokerHandle>;
}

/// What consume-consent reports back.
#[derive(Debug, Clone)]
pub struct ConsentGrant {
    pub client_id: String,
    pub access_token: String,
}

/// Upstream side of the partner-consent flow.
#[async_trait::async_trait]
pub trait ConsentGateway: Send + Sync {
    async fn generate_consent(
        &self,
        partner_id: &str,
        partner_secret: &str,
    ) -> Result<String, UpstreamError>;

    /// Browser target embedding the consent id. No network.
    fn consent_login_url(&self, consent_id: &str) -> String;

    async fn consume_consent(
        &self,
        partner_id: &str,
        partner_secret: &str,
        token_id: &str,
    ) -> Result<ConsentGrant, UpstreamError>;

    fn data_handle(&self, client_id: &str, access_token: &str) -> Arc<dyn BrokerHandle>;
}

/// Successful password+TOTP login. Carries the live handle along with the
/// tokens because later calls must go through this same instance.
pub struct TotpLogin {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub feed_token: Option<String>,
    pub handle: Arc<dyn BrokerHandle>,
}

/// Upstream side of the password+TOTP flow.
#[async_trait::async_trait]
pub trait TotpGateway: Send + Sync {
    async fn generate_session(
        &self,
        api_key: &str,
        client_code: &str,
        password: &str,
        totp_code: &str,
    ) -> Result<TotpLogin, UpstreamError>;
}
