//! Access token encoding/verification and refresh id generation.
//!
//! The codec holds the signing keys for the process. Tokens are always
//! signed with the current key; verification also accepts the previous key
//! until its grace window closes, so signing keys can be rotated without
//! invalidating outstanding access tokens.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use time::OffsetDateTime;

use super::jwt::{AccessTokenClaims, JwtError, SigningKeyPair};
use crate::types::SessionClaims;

/// Random bytes in a refresh token id (256 bits).
const REFRESH_ID_BYTES: usize = 32;

/// Encoded length of a refresh token id.
pub const REFRESH_ID_LEN: usize = 43;

/// Previous signing key and the end of its verification window.
struct RetiringKey {
    key: SigningKeyPair,
    accepted_until: OffsetDateTime,
}

/// Stateless token codec.
///
/// Thread-safe (`Send + Sync`); share it behind an `Arc`.
pub struct TokenCodec {
    issuer: String,
    current: SigningKeyPair,
    previous: Option<RetiringKey>,
}

impl TokenCodec {
    /// Creates a codec that signs and verifies with a single key.
    #[must_use]
    pub fn new(issuer: impl Into<String>, current: SigningKeyPair) -> Self {
        Self {
            issuer: issuer.into(),
            current,
            previous: None,
        }
    }

    /// Also accepts tokens signed by `previous` for `grace` from now.
    #[must_use]
    pub fn with_previous_key(mut self, previous: SigningKeyPair, grace: Duration) -> Self {
        self.previous = Some(RetiringKey {
            key: previous,
            accepted_until: OffsetDateTime::now_utc() + grace,
        });
        self
    }

    /// Returns the issuer written to and required in tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the current signing key ID.
    #[must_use]
    pub fn current_kid(&self) -> &str {
        &self.current.kid
    }

    /// Signs a new access token for `user_id` in session `family_id`.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn issue_access_token(
        &self,
        user_id: &str,
        family_id: &str,
        claims: &SessionClaims,
        ttl: Duration,
    ) -> Result<(String, AccessTokenClaims), JwtError> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| JwtError::signing("access token TTL out of range"))?;
        let claims = AccessTokenClaims::mint(&self.issuer, user_id, family_id, claims, ttl_secs);

        let mut header = Header::new(self.current.algorithm.into());
        header.kid = Some(self.current.kid.clone());

        let token = encode(&header, &claims, &self.current.encoding_key)
            .map_err(|e| JwtError::signing(e.to_string()))?;
        Ok((token, claims))
    }

    /// Verifies signature, issuer and expiry of an access token.
    ///
    /// Pure: never consults the token store.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, expired, signed by an
    /// unknown or retired key, or fails signature validation.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let header = decode_header(token)?;

        match header.kid.as_deref() {
            Some(kid) if kid == self.current.kid => self.decode_with(&self.current, token),
            Some(kid) => {
                let previous = self
                    .accepted_previous()
                    .filter(|p| p.kid == kid)
                    .ok_or_else(|| JwtError::unknown_key(kid))?;
                self.decode_with(previous, token)
            }
            None => match self.decode_with(&self.current, token) {
                Err(JwtError::InvalidSignature | JwtError::Malformed { .. }) => {
                    match self.accepted_previous() {
                        Some(previous) => self.decode_with(previous, token),
                        None => Err(JwtError::InvalidSignature),
                    }
                }
                other => other,
            },
        }
    }

    fn accepted_previous(&self) -> Option<&SigningKeyPair> {
        self.previous
            .as_ref()
            .filter(|p| OffsetDateTime::now_utc() < p.accepted_until)
            .map(|p| &p.key)
    }

    fn decode_with(
        &self,
        key: &SigningKeyPair,
        token: &str,
    ) -> Result<AccessTokenClaims, JwtError> {
        let mut validation = Validation::new(key.algorithm.into());
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        decode::<AccessTokenClaims>(token, &key.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }
}

/// Generates a cryptographically secure refresh token id.
///
/// Returns a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_refresh_id() -> String {
    let mut bytes = [0u8; REFRESH_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Returns `true` if `token` has the shape of a generated refresh id.
#[must_use]
pub fn is_well_formed_refresh_id(token: &str) -> bool {
    token.len() == REFRESH_ID_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::jwt::SigningAlgorithm;

    const ISSUER: &str = "https://auth.example.com";

    fn hmac_key(kid: &str, secret: &str) -> SigningKeyPair {
        SigningKeyPair::from_secret(kid, SigningAlgorithm::HS256, secret.as_bytes()).unwrap()
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(ISSUER, hmac_key("k1", "current-secret-current-secret-000"))
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec();
        let claims = SessionClaims::with_role("admin");
        let (token, issued) = codec
            .issue_access_token("alice", "fam-1", &claims, Duration::from_secs(900))
            .unwrap();

        let verified = codec.verify_access_token(&token).unwrap();
        assert_eq!(verified, issued);
        assert_eq!(verified.sub, "alice");
        assert_eq!(verified.sid, "fam-1");
        assert_eq!(verified.role.as_deref(), Some("admin"));
        assert_eq!(verified.exp - verified.iat, 900);
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let claims =
            AccessTokenClaims::mint(ISSUER, "alice", "fam", &SessionClaims::default(), -3600);
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let token = encode(&header, &claims, &codec.current.encoding_key).unwrap();

        assert!(matches!(
            codec.verify_access_token(&token),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let signer = TokenCodec::new(
            "https://other.example.com",
            hmac_key("k1", "current-secret-current-secret-000"),
        );
        let (token, _) = signer
            .issue_access_token("alice", "fam", &SessionClaims::default(), Duration::from_secs(60))
            .unwrap();

        let err = codec().verify_access_token(&token).unwrap_err();
        assert!(matches!(err, JwtError::InvalidClaims { .. }));
    }

    #[test]
    fn test_garbage_is_a_token_fault() {
        let err = codec().verify_access_token("not-a-jwt").unwrap_err();
        assert!(err.is_token_fault());
    }

    #[test]
    fn test_previous_key_accepted_during_grace() {
        let old = TokenCodec::new(ISSUER, hmac_key("k0", "previous-secret-previous-secret-0"));
        let (old_token, _) = old
            .issue_access_token("alice", "fam", &SessionClaims::default(), Duration::from_secs(60))
            .unwrap();

        let rotated = codec().with_previous_key(
            hmac_key("k0", "previous-secret-previous-secret-0"),
            Duration::from_secs(600),
        );
        assert_eq!(rotated.verify_access_token(&old_token).unwrap().sub, "alice");

        // New tokens are always signed with the current key
        let (new_token, _) = rotated
            .issue_access_token("bob", "fam2", &SessionClaims::default(), Duration::from_secs(60))
            .unwrap();
        let header = decode_header(&new_token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k1"));
    }

    #[test]
    fn test_previous_key_rejected_after_grace() {
        let old = TokenCodec::new(ISSUER, hmac_key("k0", "previous-secret-previous-secret-0"));
        let (old_token, _) = old
            .issue_access_token("alice", "fam", &SessionClaims::default(), Duration::from_secs(60))
            .unwrap();

        let rotated = codec().with_previous_key(
            hmac_key("k0", "previous-secret-previous-secret-0"),
            Duration::ZERO,
        );
        assert!(matches!(
            rotated.verify_access_token(&old_token),
            Err(JwtError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let stranger = TokenCodec::new(ISSUER, hmac_key("k9", "stranger-secret-stranger-secret-9"));
        let (token, _) = stranger
            .issue_access_token(
                "mallory",
                "fam",
                &SessionClaims::default(),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(matches!(
            codec().verify_access_token(&token),
            Err(JwtError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_forged_signature_with_current_kid_rejected() {
        let forger = TokenCodec::new(ISSUER, hmac_key("k1", "forged-secret-forged-secret-forged"));
        let (token, _) = forger
            .issue_access_token(
                "mallory",
                "fam",
                &SessionClaims::default(),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(matches!(
            codec().verify_access_token(&token),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_es384_issue_and_verify() {
        let codec = TokenCodec::new(ISSUER, SigningKeyPair::generate_ec().unwrap());
        let (token, _) = codec
            .issue_access_token("alice", "fam", &SessionClaims::default(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(codec.verify_access_token(&token).unwrap().sub, "alice");
    }

    #[test]
    fn test_generate_refresh_id() {
        let id = generate_refresh_id();
        assert_eq!(id.len(), REFRESH_ID_LEN);
        assert!(is_well_formed_refresh_id(&id));
    }

    #[test]
    fn test_generate_refresh_id_uniqueness() {
        let ids: Vec<String> = (0..100).map(|_| generate_refresh_id()).collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn test_malformed_refresh_ids() {
        assert!(!is_well_formed_refresh_id(""));
        assert!(!is_well_formed_refresh_id("short"));
        assert!(!is_well_formed_refresh_id(&"a".repeat(44)));
        assert!(!is_well_formed_refresh_id(&format!("{}=", "a".repeat(42))));
        assert!(!is_well_formed_refresh_id(&format!("{}/", "a".repeat(42))));
    }
}
