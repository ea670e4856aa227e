use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::registration::error::{ConfirmationError, RegistrationError, ResendError};
use crate::registration::repo::UserStore;
use crate::token::{ConfirmationToken, Identity, TokenCodec};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Registration state machine: `Unregistered -> Pending -> Active`.
///
/// Pending is a record with `active = false`. Failed confirmations never
/// touch the store.
#[derive(Clone)]
pub struct Registrar {
    users: Arc<dyn UserStore>,
    codec: TokenCodec,
}

impl Registrar {
    pub fn new(users: Arc<dyn UserStore>, codec: TokenCodec) -> Self {
        Self { users, codec }
    }

    /// Create a pending record and mint its confirmation token.
    ///
    /// The record is written before the token is signed. If signing fails
    /// the record stays pending and [`Registrar::resend`] recovers it.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn register(
        &self,
        identity: &Identity,
        credential: &str,
    ) -> Result<ConfirmationToken, RegistrationError> {
        if self.users.exists(identity).await? {
            warn!("identity already registered");
            return Err(RegistrationError::AlreadyRegistered);
        }

        // create() is the authoritative check; exists() above can race.
        if let Err(e) = self.users.create(identity, credential).await {
            let err = RegistrationError::from(e);
            if matches!(err, RegistrationError::AlreadyRegistered) {
                warn!("identity registered concurrently");
            }
            return Err(err);
        }

        let token = self.codec.generate(identity).map_err(|e| {
            error!(error = %e, "confirmation token signing failed; record left pending");
            RegistrationError::Internal(e)
        })?;

        info!("user registered, confirmation pending");
        Ok(token)
    }

    /// Verify `token` and activate the matching record. Idempotent.
    #[instrument(skip_all)]
    pub async fn confirm(
        &self,
        token: &str,
        max_age: Duration,
    ) -> Result<Identity, ConfirmationError> {
        let identity = self.codec.verify(token, max_age).map_err(|e| {
            warn!(reason = %e, "confirmation token rejected");
            ConfirmationError::InvalidToken(e)
        })?;

        if !self.users.set_active(&identity).await? {
            warn!(identity = %identity, "confirmed identity has no user record");
            return Err(ConfirmationError::UnknownIdentity);
        }

        info!(identity = %identity, "user activated");
        Ok(identity)
    }

    /// Issue a fresh token for a record that is still pending.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn resend(&self, identity: &Identity) -> Result<ConfirmationToken, ResendError> {
        match self.users.get(identity).await? {
            None => Err(ResendError::UnknownIdentity),
            Some(user) if user.active => Err(ResendError::AlreadyActive),
            Some(_) => {
                let token = self
                    .codec
                    .generate(identity)
                    .map_err(ResendError::Internal)?;
                info!("confirmation token reissued");
                Ok(token)
            }
        }
    }
}
