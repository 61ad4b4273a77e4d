use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_http::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::settings::Settings;
use sqlx::{MySql, Pool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Server {
    pub session_manager: Arc<dyn SessionManager>,
    pub broker_api: Arc<dyn BrokerApi>,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.upstream.timeout_secs);

        let oauth: Arc<dyn OauthGateway>;
        let consent: Arc<dyn ConsentGateway>;
        let totp: Arc<dyn TotpGateway>;
        match settings.upstream.backend.as_str() {
            "fake" => {
                oauth = Arc::new(FakeOauthGateway::new());
                consent = Arc::new(FakeConsentGateway::new());
                totp = Arc::new(FakeTotpGateway::new());
            }
            "real" => {
                oauth = Arc::new(HttpOauthGateway::new(
                    settings.brokers.redirect_oauth.login_base_url.clone(),
                    settings.brokers.redirect_oauth.api_base_url.clone(),
                    timeout,
                ));
                consent = Arc::new(HttpConsentGateway::new(
                    settings.brokers.partner_consent.auth_base_url.clone(),
                    settings.brokers.partner_consent.api_base_url.clone(),
                    timeout,
                ));
                totp = Arc::new(HttpTotpGateway::new(
                    settings.brokers.password_totp.api_base_url.clone(),
                    timeout,
                ));
            }
            other => return Err(anyhow::anyhow!("Unknown upstream backend: {}", other)),
        }

        let drivers: Vec<Arc<dyn ProtocolDriver>> = vec![
            Arc::new(RedirectOauthDriver::new(oauth)),
            Arc::new(PartnerConsentDriver::new(consent)),
            Arc::new(PasswordTotpDriver::new(totp)),
        ];

        let credentials: Arc<dyn CredentialRepo>;
        let sessions: Arc<dyn SessionRepo>;
        let pool: Option<Pool<MySql>>;
        match settings.storage.backend.as_str() {
            "memory" => {
                credentials = Arc::new(MemoryCredentialRepo::new());
                sessions = Arc::new(MemorySessionRepo::new());
                pool = None;
            }
            "mysql" => {
                let dsn = settings.storage.mysql_dsn.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("storage.mysql_dsn is required for the mysql backend")
                })?;
                let mysql_pool = Pool::<MySql>::connect(dsn).await?;
                credentials = Arc::new(MySqlCredentialRepo::new(mysql_pool.clone()));
                sessions = Arc::new(MySqlSessionRepo::new(mysql_pool.clone()));
                pool = Some(mysql_pool);
            }
            other => return Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }

        let policy = SessionPolicy {
            restore_ttl: chrono::Duration::hours(settings.session.ttl_hours),
            login_attempt_ttl: chrono::Duration::seconds(settings.session.login_attempt_ttl_secs),
        };

        let session_manager: Arc<dyn SessionManager> = Arc::new(RealSessionManager::new(
            credentials,
            sessions,
            Arc::new(MemorySessionCache::new()),
            drivers.clone(),
            policy,
        ));

        // Repopulate the cache from whatever survived the last shutdown.
        let report = session_manager.resync().await?;
        info!(
            restored = report.restored,
            expired = report.expired,
            "startup session restore"
        );

        let broker_api: Arc<dyn BrokerApi> =
            Arc::new(RealBrokerApi::new(session_manager.clone(), drivers));

        info!("server started");

        Ok(Self {
            session_manager,
            broker_api,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
