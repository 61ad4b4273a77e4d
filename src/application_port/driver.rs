use super::{BrokerError, LoginCallback};
use crate::domain_model::*;
use crate::domain_port::{BrokerHandle, UpstreamError, UpstreamErrorKind};
use std::sync::Arc;

/// State the manager must keep between `begin_login` and `complete_login`
/// for redirect-driven protocols.
#[derive(Debug, Clone, Default)]
pub struct IssuedLogin {
    /// Opaque value the callback must echo back.
    pub state: Option<String>,
    /// Consent id issued by generate-consent, needed again at completion.
    pub consent_id: Option<String>,
}

/// What `begin_login` produced.
pub enum LoginHandoff {
    /// Human-driven leg: send the user to `url`, keep `issued` until the
    /// callback arrives.
    Redirect { url: String, issued: IssuedLogin },
    /// The protocol completes server-side; call `complete_login` now.
    Ready,
}

/// A finished login. `handle` is set by protocols whose upstream client is
/// stateful; token-based protocols leave it empty and rebuild on demand.
pub struct LoginOutcome {
    pub tokens: SessionTokens,
    pub handle: Option<Arc<dyn BrokerHandle>>,
}

/// One implementation per broker protocol. Drivers own every protocol
/// detail: how to turn a credential into a session, how to rebuild a data
/// client from stored tokens, and how to recognize their upstream's way of
/// saying "this session is dead".
#[async_trait::async_trait]
pub trait ProtocolDriver: Send + Sync {
    fn broker(&self) -> Broker;

    /// True when the driver can redo the whole login from stored secrets,
    /// with no human in the loop.
    fn can_self_heal(&self) -> bool;

    async fn begin_login(&self, credential: &Credential) -> Result<LoginHandoff, BrokerError>;

    async fn complete_login(
        &self,
        credential: &Credential,
        issued: &IssuedLogin,
        callback: &LoginCallback,
    ) -> Result<LoginOutcome, BrokerError>;

    /// Whether this upstream error means the session is no longer
    /// authenticated (as opposed to a transient fault).
    fn is_auth_error(&self, err: &UpstreamError) -> bool;

    /// Rebuild a data handle from persisted tokens. `None` when the
    /// protocol's handle cannot be reconstructed without a full relogin.
    fn rebuild_handle(
        &self,
        credential: &Credential,
        tokens: &SessionTokens,
    ) -> Option<Arc<dyn BrokerHandle>>;
}

/// Map an upstream failure into the service taxonomy. `is_auth` is the
/// owning driver's verdict; everything non-auth splits into retryable
/// upstream faults versus a rejection of the attempt itself.
pub fn classify_upstream(is_auth: bool, err: &UpstreamError) -> BrokerError {
    if is_auth {
        return BrokerError::AuthRejected {
            cause: err.message.clone(),
        };
    }
    match err.kind {
        UpstreamErrorKind::Transport | UpstreamErrorKind::Timeout | UpstreamErrorKind::Payload => {
            BrokerError::UpstreamUnavailable {
                cause: err.message.clone(),
            }
        }
        UpstreamErrorKind::Status(status) if status >= 500 => BrokerError::UpstreamUnavailable {
            cause: err.message.clone(),
        },
        UpstreamErrorKind::Status(_) => BrokerError::AuthRejected {
            cause: err.message.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_verdict_wins_over_kind() {
        let err = UpstreamError::status(500, "token expired").with_code("AG8001");
        assert!(matches!(
            classify_upstream(true, &err),
            BrokerError::AuthRejected { .. }
        ));
    }

    #[test]
    fn five_xx_and_transport_are_retryable() {
        for err in [
            UpstreamError::status(503, "maintenance"),
            UpstreamError::transport("connection refused"),
            UpstreamError::timeout("deadline elapsed"),
            UpstreamError::payload("consentId missing"),
        ] {
            assert!(matches!(
                classify_upstream(false, &err),
                BrokerError::UpstreamUnavailable { .. }
            ));
        }
    }

    #[test]
    fn plain_four_xx_rejects_the_attempt() {
        let err = UpstreamError::status(400, "expired consent");
        assert!(matches!(
            classify_upstream(false, &err),
            BrokerError::AuthRejected { .. }
        ));
    }
}
