use std::{fmt, sync::Arc, time::Duration};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use super::{Clock, SystemClock, TokenError};

/// Purpose tag carried by registration confirmation tokens.
pub const EMAIL_CONFIRMATION: &str = "email-confirmation";

/// Longest accepted identity in bytes (RFC 5321 address limit). Keeps
/// token length bounded.
pub const MAX_IDENTITY_LEN: usize = 254;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("identity must be non-empty and at most 254 bytes")]
pub struct InvalidIdentity;

/// Unique registrant key, usually a normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let value = value.into();
        if value.trim().is_empty() || value.len() > MAX_IDENTITY_LEN {
            return Err(InvalidIdentity);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, URL-safe, signed token. Only [`TokenCodec`] can read it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed part of a token.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    purpose: String,
    sub: String,
    iat: i64, // issued at (unix seconds)
}

/// Stateless HMAC-SHA256 token codec.
///
/// Wire format: `base64url(envelope_json) "." base64url(mac)`, unpadded. The
/// MAC covers the exact envelope bytes that travel in the token, so there is
/// no canonicalization step on verify.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: &[u8], clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("token secret must not be empty");
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
        Ok(Self { mac, clock })
    }

    /// Mint an email-confirmation token for `identity`.
    pub fn generate(&self, identity: &Identity) -> anyhow::Result<ConfirmationToken> {
        self.generate_for(EMAIL_CONFIRMATION, identity)
    }

    /// Check an email-confirmation token and recover its identity.
    pub fn verify(&self, token: &str, max_age: Duration) -> Result<Identity, TokenError> {
        self.verify_for(EMAIL_CONFIRMATION, token, max_age)
    }

    pub fn generate_for(
        &self,
        purpose: &str,
        identity: &Identity,
    ) -> anyhow::Result<ConfirmationToken> {
        let envelope = Envelope {
            purpose: purpose.to_owned(),
            sub: identity.as_str().to_owned(),
            iat: self.clock.now().unix_timestamp(),
        };
        let body = serde_json::to_vec(&envelope)?;
        let signature = self.sign(&body);
        debug!(purpose, iat = envelope.iat, "confirmation token signed");
        Ok(ConfirmationToken(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(signature)
        )))
    }

    pub fn verify_for(
        &self,
        purpose: &str,
        token: &str,
        max_age: Duration,
    ) -> Result<Identity, TokenError> {
        let (body_b64, sig_b64) = token.split_once('.').ok_or(TokenError::MalformedToken)?;
        if body_b64.is_empty() || sig_b64.is_empty() || sig_b64.contains('.') {
            return Err(TokenError::MalformedToken);
        }
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| TokenError::MalformedToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::MalformedToken)?;

        // verify_slice compares in constant time
        let mut mac = self.mac.clone();
        mac.update(&body);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::SignatureMismatch)?;

        let envelope: Envelope =
            serde_json::from_slice(&body).map_err(|_| TokenError::MalformedToken)?;
        if envelope.purpose != purpose {
            return Err(TokenError::PurposeMismatch);
        }

        // A future iat means clock skew or a token from elsewhere; both count as expired.
        let age = self.clock.now().unix_timestamp() - envelope.iat;
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if age < 0 || age > max_age {
            return Err(TokenError::Expired);
        }

        let identity = Identity::new(envelope.sub).map_err(|_| TokenError::MalformedToken)?;
        debug!(purpose, age, "confirmation token verified");
        Ok(identity)
    }

    fn sign(&self, body: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::ManualClock;

    const SECRET: &[u8] = b"test-secret-of-reasonable-length";
    const HOUR: Duration = Duration::from_secs(3600);

    fn codec_at(unix: i64) -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(unix));
        let codec = TokenCodec::with_clock(SECRET, clock.clone()).expect("codec");
        (codec, clock)
    }

    fn identity(s: &str) -> Identity {
        Identity::new(s).expect("identity")
    }

    #[test]
    fn verify_returns_identity_right_after_generate() {
        let (codec, _) = codec_at(1_700_000_000);
        for email in ["alice@x.com", "o'brien+tag@example.org", "\"quoted\"@x.io", "юзер@почта.рф"] {
            let token = codec.generate(&identity(email)).expect("generate");
            assert_eq!(codec.verify(token.as_str(), HOUR), Ok(identity(email)));
        }
    }

    #[test]
    fn token_is_url_safe() {
        let (codec, _) = codec_at(1_700_000_000);
        let token = codec.generate(&identity("alice@x.com")).expect("generate");
        assert!(token
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn any_single_altered_byte_is_rejected() {
        let (codec, _) = codec_at(1_700_000_000);
        let token = codec
            .generate(&identity("alice@x.com"))
            .expect("generate")
            .into_string();

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).expect("ascii");
            let err = codec.verify(&tampered, HOUR).unwrap_err();
            assert!(
                matches!(err, TokenError::SignatureMismatch | TokenError::MalformedToken),
                "byte {i}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn expiry_boundary() {
        let (codec, clock) = codec_at(1_700_000_000);
        let token = codec.generate(&identity("alice@x.com")).expect("generate");
        let max_age = Duration::from_secs(600);

        clock.advance_secs(599);
        assert!(codec.verify(token.as_str(), max_age).is_ok());

        clock.advance_secs(1);
        assert!(codec.verify(token.as_str(), max_age).is_ok());

        clock.advance_secs(1);
        assert_eq!(codec.verify(token.as_str(), max_age), Err(TokenError::Expired));
    }

    #[test]
    fn token_from_the_future_is_expired() {
        let (issuer, _) = codec_at(1_700_000_100);
        let (verifier, _) = codec_at(1_700_000_000);
        let token = issuer.generate(&identity("alice@x.com")).expect("generate");
        assert_eq!(verifier.verify(token.as_str(), HOUR), Err(TokenError::Expired));
    }

    #[test]
    fn rotated_secret_is_signature_mismatch() {
        let (codec, _) = codec_at(1_700_000_000);
        let rotated = TokenCodec::with_clock(
            b"another-secret-entirely-000000",
            Arc::new(ManualClock::at(1_700_000_000)),
        )
        .expect("codec");
        let token = codec.generate(&identity("alice@x.com")).expect("generate");
        assert_eq!(
            rotated.verify(token.as_str(), HOUR),
            Err(TokenError::SignatureMismatch)
        );
    }

    #[test]
    fn other_purpose_is_purpose_mismatch() {
        let (codec, _) = codec_at(1_700_000_000);
        let token = codec
            .generate_for("password-reset", &identity("alice@x.com"))
            .expect("generate");
        assert_eq!(
            codec.verify(token.as_str(), HOUR),
            Err(TokenError::PurposeMismatch)
        );
        assert_eq!(
            codec.verify_for("password-reset", token.as_str(), HOUR),
            Ok(identity("alice@x.com"))
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let (codec, _) = codec_at(1_700_000_000);
        for input in ["", "no-dot-here", "a.b.c", "!!!.???", ".", "e30."] {
            assert_eq!(
                codec.verify(input, HOUR),
                Err(TokenError::MalformedToken),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn signed_but_not_an_envelope_is_malformed() {
        let (codec, _) = codec_at(1_700_000_000);
        let body = br#"{"hello":"world"}"#;
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(body),
            URL_SAFE_NO_PAD.encode(codec.sign(body))
        );
        assert_eq!(codec.verify(&token, HOUR), Err(TokenError::MalformedToken));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenCodec::new(b"").is_err());
    }

    #[test]
    fn identity_length_is_capped() {
        let local = "a".repeat(MAX_IDENTITY_LEN - "@x.io".len());
        let longest = identity(&format!("{local}@x.io"));
        assert_eq!(Identity::new(format!("a{local}@x.io")), Err(InvalidIdentity));

        let (codec, _) = codec_at(1_700_000_000);
        let token = codec.generate(&longest).expect("generate");
        assert!(token.as_str().len() < 1024, "token len {}", token.as_str().len());
        assert_eq!(codec.verify(token.as_str(), HOUR), Ok(longest));
    }

    #[test]
    fn signed_oversized_identity_is_malformed() {
        let (codec, _) = codec_at(1_700_000_000);
        let envelope = Envelope {
            purpose: EMAIL_CONFIRMATION.to_owned(),
            sub: "a".repeat(MAX_IDENTITY_LEN + 1),
            iat: 1_700_000_000,
        };
        let body = serde_json::to_vec(&envelope).unwrap();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(codec.sign(&body))
        );
        assert_eq!(codec.verify(&token, HOUR), Err(TokenError::MalformedToken));
    }

    #[test]
    fn identity_rejects_blank() {
        assert_eq!(Identity::new("   "), Err(InvalidIdentity));
        assert!(Identity::new("a@b.c").is_ok());
    }
}
