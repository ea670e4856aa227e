use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::registration::mailer::{LogMailer, Mailer};
use crate::registration::repo::{InMemoryUserStore, PgUserStore, UserStore};
use crate::registration::services::Registrar;
use crate::token::TokenCodec;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registrar: Registrar,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                info!("using postgres user store");
                Arc::new(PgUserStore::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users live in memory and vanish on restart");
                Arc::new(InMemoryUserStore::new())
            }
        };

        let codec = TokenCodec::new(config.confirmation.secret.as_bytes())
            .context("build confirmation token codec")?;
        let mailer = Arc::new(LogMailer::new(config.mail.from.clone())) as Arc<dyn Mailer>;

        Ok(Self::from_parts(config, Registrar::new(users, codec), mailer))
    }

    pub fn from_parts(config: Arc<AppConfig>, registrar: Registrar, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            config,
            registrar,
            mailer,
        }
    }

    /// State over the given in-memory store and mailer, exposing tokens in
    /// `/register` responses.
    #[cfg(test)]
    pub fn fake(users: Arc<InMemoryUserStore>, mailer: Arc<dyn Mailer>) -> Self {
        let config = AppConfig::from_lookup(|key| match key {
            "CONFIRMATION_SECRET" => Some("test-secret-0123456789".into()),
            "PUBLIC_BASE_URL" => Some("http://test.local".into()),
            "CONFIRMATION_EXPOSE_TOKEN" => Some("true".into()),
            _ => None,
        })
        .expect("test config");
        let codec = TokenCodec::new(config.confirmation.secret.as_bytes()).expect("codec");

        Self::from_parts(Arc::new(config), Registrar::new(users, codec), mailer)
    }
}
