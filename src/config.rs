use std::{fmt, net::SocketAddr, time::Duration};

use anyhow::Context;

const MIN_SECRET_LEN: usize = 16;

#[derive(Clone)]
pub struct ConfirmationConfig {
    pub secret: String,
    pub max_age_secs: u64,
    pub base_url: String,
    pub expose_token: bool,
}

impl ConfirmationConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for ConfirmationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationConfig")
            .field("secret", &"<redacted>")
            .field("max_age_secs", &self.max_age_secs)
            .field("base_url", &self.base_url)
            .field("expose_token", &self.expose_token)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: Option<String>,
    pub confirmation: ConfirmationConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let secret = lookup("CONFIRMATION_SECRET").context("CONFIRMATION_SECRET is not set")?;
        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("CONFIRMATION_SECRET must be at least {MIN_SECRET_LEN} bytes");
        }

        let confirmation = ConfirmationConfig {
            secret,
            max_age_secs: lookup("CONFIRMATION_MAX_AGE_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
            base_url: lookup("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:8080".into()),
            expose_token: lookup("CONFIRMATION_EXPOSE_TOKEN")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };
        let mail = MailConfig {
            from: lookup("MAIL_FROM").unwrap_or_else(|| "no-reply@localhost".into()),
        };
        let server = ServerConfig {
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: lookup("APP_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
        };
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        Ok(Self {
            server,
            database_url,
            confirmation,
            mail,
        })
    }
}
