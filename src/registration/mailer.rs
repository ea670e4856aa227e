use async_trait::async_trait;
use tracing::info;

use crate::token::{ConfirmationToken, Identity};

pub const CONFIRMATION_SUBJECT: &str = "Confirm your registration";

/// Outbound mail transport. Delivery guarantees are the transport's
/// business; callers do not retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &Identity, confirmation_url: &str) -> anyhow::Result<()>;
}

/// Link the user follows to confirm, e.g. `https://app.example/confirm?token=...`.
pub fn confirmation_url(base_url: &str, token: &ConfirmationToken) -> String {
    // tokens are base64url + '.', nothing to escape
    format!("{}/confirm?token={}", base_url.trim_end_matches('/'), token)
}

pub fn confirmation_body(confirmation_url: &str) -> String {
    format!("Follow the link to confirm your registration: {confirmation_url}")
}

/// Writes the message to the log instead of a mail server.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &Identity, confirmation_url: &str) -> anyhow::Result<()> {
        info!(
            from = %self.from,
            to = %to,
            subject = CONFIRMATION_SUBJECT,
            body = %confirmation_body(confirmation_url),
            "confirmation mail"
        );
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingMailer;

#[cfg(test)]
mod recording {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::Mailer;
    use crate::token::Identity;

    /// Keeps every (recipient, url) pair it was asked to send.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }

        /// Sends happen on spawned tasks; give them a moment to land.
        pub async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
            for _ in 0..200 {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.sent()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &Identity, confirmation_url: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .map_err(|_| anyhow::anyhow!("mailer lock poisoned"))?
                .push((to.to_string(), confirmation_url.to_string()));
            Ok(())
        }
    }
}
