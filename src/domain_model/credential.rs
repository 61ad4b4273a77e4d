use super::{Broker, ExternalUserId, SessionKey};
use serde::{Deserialize, Serialize};

/// Registered API credentials for one (broker, external_user_id) pair.
///
/// Which fields are meaningful depends on the broker's protocol; the
/// combination is checked at registration time so a bad registration never
/// reaches a login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub broker: Broker,
    pub external_user_id: ExternalUserId,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub client_id: Option<String>,
    pub direct_access_token: Option<String>,
    pub totp_seed: Option<String>,
    pub login_password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CredentialFieldError(pub String);

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl Credential {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            broker: self.broker,
            external_user_id: self.external_user_id.clone(),
        }
    }

    /// Partner-consent registrations carry either a ready-to-use token pair
    /// (direct mode) or partner credentials for the consent exchange.
    pub fn has_direct_token(&self) -> bool {
        present(&self.client_id) && present(&self.direct_access_token)
    }

    pub fn validate(&self) -> Result<(), CredentialFieldError> {
        if self.external_user_id.0.trim().is_empty() {
            return Err(CredentialFieldError("external_user_id required".into()));
        }
        match self.broker {
            Broker::RedirectOauth => {
                if !present(&self.api_key) || !present(&self.api_secret) {
                    return Err(CredentialFieldError(
                        "redirect-oauth requires api_key and api_secret".into(),
                    ));
                }
            }
            Broker::PartnerConsent => {
                let consent_mode = present(&self.api_key) && present(&self.api_secret);
                if !self.has_direct_token() && !consent_mode {
                    return Err(CredentialFieldError(
                        "partner-consent requires client_id and direct_access_token, \
                         or api_key and api_secret for the consent exchange"
                            .into(),
                    ));
                }
            }
            Broker::PasswordTotp => {
                if !present(&self.api_key)
                    || !present(&self.login_password)
                    || !present(&self.totp_seed)
                {
                    return Err(CredentialFieldError(
                        "password-totp requires api_key, login_password and totp_seed".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
