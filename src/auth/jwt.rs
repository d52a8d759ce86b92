/// Access Token Codec
///
/// Issues and validates short-lived HS256 JWTs. Validation needs only the
/// signing secret and the clock, never the database.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::clock::Clock;
use crate::configuration::AuthSettings;
use crate::error::{AppError, TokenError};

const ALGORITHM: Algorithm = Algorithm::HS256;
const ALGORITHM_NAME: &str = "HS256";

/// Only the header field checked before signature verification
#[derive(serde::Deserialize)]
struct RawHeader {
    alg: String,
}

/// Reject any header that does not name HS256, including names such as
/// `none` that `jsonwebtoken` cannot even represent
fn check_algorithm(token: &str) -> Result<(), TokenError> {
    let encoded = token.split('.').next().ok_or(TokenError::Malformed)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| TokenError::Malformed)?;
    let header: RawHeader = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

    if header.alg != ALGORITHM_NAME {
        return Err(TokenError::UnsupportedAlgorithm);
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl AccessTokenCodec {
    /// # Arguments
    /// * `secret` - server-held HMAC key
    /// * `ttl_seconds` - lifetime of issued tokens
    /// * `clock` - source of `iat` and of "now" during validation
    pub fn new(secret: &[u8], ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds,
            clock,
        }
    }

    pub fn from_settings(settings: &AuthSettings, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            settings.access_token_secret.as_bytes(),
            settings.access_token_expiry,
            clock,
        )
    }

    /// Issue a token asserting `user_id`
    ///
    /// # Errors
    /// Returns `AppError::Internal` if signing fails
    pub fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let claims = Claims::new(user_id, self.clock.now(), self.ttl_seconds);

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Validate a token and return the user it asserts
    ///
    /// # Errors
    /// - `InvalidSignature` if the MAC does not verify
    /// - `UnsupportedAlgorithm` if the header names anything but HS256
    /// - `Expired` if the injected clock is past `exp`
    /// - `Malformed` for anything that does not parse
    pub fn validate(&self, token: &str) -> Result<Uuid, TokenError> {
        check_algorithm(token)?;

        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let error = match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        TokenError::UnsupportedAlgorithm
                    }
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Malformed,
                };
                tracing::debug!(error = %e, "Access token rejected");
                error
            })?;

        if claims.is_expired_at(self.clock.now()) {
            return Err(TokenError::Expired);
        }

        claims.user_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, Utc};

    const SECRET: &[u8] = b"test-secret-key-at-least-32-characters-long";

    fn codec_with_clock() -> (AccessTokenCodec, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        (AccessTokenCodec::new(SECRET, 900, clock.clone()), clock)
    }

    /// Replace one character of the given dot-separated segment
    fn tamper(token: &str, segment: usize) -> String {
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let target = &mut parts[segment];
        let mid = target.len() / 2;
        let original = target.as_bytes()[mid];
        let replacement = if original == b'A' { 'B' } else { 'A' };
        target.replace_range(mid..mid + 1, &replacement.to_string());
        parts.join(".")
    }

    #[test]
    fn test_issue_and_validate() {
        let (codec, _) = codec_with_clock();
        let user_id = Uuid::new_v4();

        let token = codec.issue(user_id).expect("Failed to generate token");
        assert_eq!(codec.validate(&token), Ok(user_id));
    }

    #[test]
    fn test_expired_after_ttl() {
        let (codec, clock) = codec_with_clock();
        let token = codec.issue(Uuid::new_v4()).unwrap();

        clock.advance(Duration::seconds(900));
        assert!(codec.validate(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(codec.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (codec, _) = codec_with_clock();
        assert_eq!(codec.validate("invalid.token.here"), Err(TokenError::Malformed));
        assert_eq!(codec.validate(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_tampered_signature() {
        let (codec, _) = codec_with_clock();
        let token = codec.issue(Uuid::new_v4()).unwrap();

        assert_eq!(codec.validate(&tamper(&token, 2)), Err(TokenError::InvalidSignature));
        assert_eq!(
            codec.validate(&format!("{}X", token)),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_payload() {
        let (codec, _) = codec_with_clock();
        let token = codec.issue(Uuid::new_v4()).unwrap();

        assert_eq!(codec.validate(&tamper(&token, 1)), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_key() {
        let (codec, clock) = codec_with_clock();
        let other = AccessTokenCodec::new(b"another-secret-key-also-32-characters-long", 900, clock);
        let token = codec.issue(Uuid::new_v4()).unwrap();

        assert_eq!(other.validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let (codec, clock) = codec_with_clock();
        let claims = Claims::new(Uuid::new_v4(), clock.now(), 900);
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(codec.validate(&token), Err(TokenError::UnsupportedAlgorithm));

        let encode_part = |json: serde_json::Value| general_purpose::URL_SAFE_NO_PAD.encode(json.to_string());
        let unsigned = format!(
            "{}.{}.",
            encode_part(serde_json::json!({ "alg": "none", "typ": "JWT" })),
            encode_part(serde_json::to_value(&claims).unwrap()),
        );
        assert_eq!(codec.validate(&unsigned), Err(TokenError::UnsupportedAlgorithm));
    }

    #[test]
    fn test_non_uuid_subject_is_malformed() {
        let (codec, clock) = codec_with_clock();
        let mut claims = Claims::new(Uuid::new_v4(), clock.now(), 900);
        claims.sub = "not-a-uuid".to_string();
        let token = encode(&Header::new(ALGORITHM), &claims, &EncodingKey::from_secret(SECRET)).unwrap();

        assert_eq!(codec.validate(&token), Err(TokenError::Malformed));
    }
}
