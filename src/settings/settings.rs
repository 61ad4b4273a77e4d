use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub log: Log,
    pub storage: Storage,
    pub upstream: Upstream,
    pub session: Session,
    pub brokers: Brokers,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub cert_path: String,
    pub key_path: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub backend: String, // "memory" or "mysql"
    pub mysql_dsn: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Upstream {
    pub backend: String, // "fake" or "real"
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    /// Hours a durable session stays eligible for restore after its last
    /// successful connect. A policy default, not a broker guarantee.
    pub ttl_hours: i64,
    /// Seconds an unfinished login attempt may linger before a new one may
    /// displace it.
    pub login_attempt_ttl_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct Brokers {
    pub redirect_oauth: RedirectOauth,
    pub partner_consent: PartnerConsent,
    pub password_totp: PasswordTotp,
}

#[derive(Debug, Deserialize)]
pub struct RedirectOauth {
    pub login_base_url: String,
    pub api_base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PartnerConsent {
    pub auth_base_url: String,
    pub api_base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordTotp {
    pub api_base_url: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
