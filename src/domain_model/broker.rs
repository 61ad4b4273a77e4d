use serde::{Deserialize, Serialize};
use std::fmt;

/// One external brokerage, identified by the authentication protocol it
/// speaks. The wire name doubles as the path segment in the HTTP API.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Broker {
    #[serde(rename = "redirect-oauth")]
    RedirectOauth,
    #[serde(rename = "partner-consent")]
    PartnerConsent,
    #[serde(rename = "password-totp")]
    PasswordTotp,
}

impl Broker {
    pub const ALL: [Broker; 3] = [
        Broker::RedirectOauth,
        Broker::PartnerConsent,
        Broker::PasswordTotp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Broker::RedirectOauth => "redirect-oauth",
            Broker::PartnerConsent => "partner-consent",
            Broker::PasswordTotp => "password-totp",
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown broker: {0}")]
pub struct UnknownBrokerName(pub String);

impl std::str::FromStr for Broker {
    type Err = UnknownBrokerName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redirect-oauth" => Ok(Broker::RedirectOauth),
            "partner-consent" => Ok(Broker::PartnerConsent),
            "password-totp" => Ok(Broker::PasswordTotp),
            other => Err(UnknownBrokerName(other.to_string())),
        }
    }
}

/// Broker-side account identifier (or a locally chosen alias).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ExternalUserId(pub String);

impl fmt::Display for ExternalUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExternalUserId {
    fn from(s: &str) -> Self {
        ExternalUserId(s.to_string())
    }
}

/// Composite key every store is indexed by.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SessionKey {
    pub broker: Broker,
    pub external_user_id: ExternalUserId,
}

impl SessionKey {
    pub fn new(broker: Broker, external_user_id: impl Into<ExternalUserId>) -> Self {
        Self {
            broker,
            external_user_id: external_user_id.into(),
        }
    }
}

impl From<String> for ExternalUserId {
    fn from(s: String) -> Self {
        ExternalUserId(s)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.broker, self.external_user_id)
    }
}
