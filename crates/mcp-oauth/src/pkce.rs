use crate::types::PkceChallenge;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a PKCE verifier/challenge pair (RFC 7636, S256 method).
pub fn generate_pkce_challenge() -> PkceChallenge {
    let code_verifier = generate_code_verifier();
    let code_challenge = challenge_for_verifier(&code_verifier);

    PkceChallenge {
        code_verifier,
        code_challenge,
        code_challenge_method: "S256".to_string(),
    }
}

/// 32 random bytes, base64url-encoded without padding: 43 URL-safe
/// characters, inside RFC 7636's 43-128 bound.
fn generate_code_verifier() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// `code_challenge = BASE64URL-ENCODE(SHA256(ASCII(code_verifier)))`
pub fn challenge_for_verifier(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pkce_challenge() {
        let challenge = generate_pkce_challenge();

        assert_eq!(challenge.code_verifier.len(), 43);
        assert_eq!(challenge.code_challenge.len(), 43);
        assert_eq!(challenge.code_challenge_method, "S256");

        for c in challenge.code_verifier.chars() {
            assert!(c.is_alphanumeric() || c == '-' || c == '_');
        }
    }

    #[test]
    fn test_challenge_is_deterministic_in_verifier() {
        let challenge = generate_pkce_challenge();
        assert_eq!(
            challenge_for_verifier(&challenge.code_verifier),
            challenge.code_challenge
        );
        assert_ne!(
            challenge_for_verifier("some-other-verifier"),
            challenge.code_challenge
        );
    }

    #[test]
    fn test_verifiers_are_unique() {
        let a = generate_pkce_challenge();
        let b = generate_pkce_challenge();
        assert_ne!(a.code_verifier, b.code_verifier);
    }
}
