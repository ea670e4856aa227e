mod clock;
mod codec;
mod error;

pub use clock::{Clock, SystemClock};
pub use codec::{
    ConfirmationToken, Identity, InvalidIdentity, TokenCodec, EMAIL_CONFIRMATION, MAX_IDENTITY_LEN,
};
pub use error::TokenError;

#[cfg(test)]
pub use clock::ManualClock;
