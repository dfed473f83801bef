//!
//! PKCE code generation (RFC 7636, S256).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Verifier/challenge pair for one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceCodes {
    /** secret kept locally and sent on code exchange */
    pub code_verifier: String,
    /** `base64url_nopad(sha256(code_verifier))`, sent on the authorize URL */
    pub code_challenge: String,
}

/* --- constants ------------------------------------------------------------------------------- */

/** random bytes behind the verifier; hex encoding doubles the length to 128 chars */
const VERIFIER_BYTES: usize = 64;

/** random bytes behind the state nonce */
const STATE_BYTES: usize = 32;

/* --- start of code -------------------------------------------------------------------------- */

impl PkceCodes {
    /// Fresh random verifier and its S256 challenge
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = random_hex(VERIFIER_BYTES);
        let code_challenge = code_challenge(&code_verifier);
        Self { code_verifier, code_challenge }
    }
}

/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random CSRF state nonce for the authorize URL
#[must_use]
pub fn generate_state() -> String {
    random_hex(STATE_BYTES)
}

/// Lowercase hex of `len` cryptographically random bytes
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_is_rfc_compliant() {
        let codes = PkceCodes::generate();
        assert_eq!(codes.code_verifier.len(), 128);
        assert!(codes.code_verifier.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let codes = PkceCodes::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(codes.code_verifier.as_bytes()));
        assert_eq!(codes.code_challenge, expected);
        assert!(!codes.code_challenge.contains('='));
    }

    #[test]
    fn test_known_challenge_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_codes_are_unique() {
        assert_ne!(PkceCodes::generate(), PkceCodes::generate());
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_state_length() {
        assert_eq!(generate_state().len(), 64);
    }
}
