use thiserror::Error;

/// Why a confirmation token was rejected.
///
/// The variants are for server-side logs; callers facing end users should
/// collapse them into a single message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a well-formed envelope")]
    MalformedToken,

    #[error("token signature does not match")]
    SignatureMismatch,

    #[error("token was issued for a different purpose")]
    PurposeMismatch,

    #[error("token has expired")]
    Expired,
}
