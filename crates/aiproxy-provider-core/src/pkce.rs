use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// PKCE verifier/challenge pair: 96 bytes of entropy, base64url without
/// padding, S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 96];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut bytes);
        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Opaque `state` parameter for an authorization round-trip.
pub fn random_state() -> String {
    let mut bytes = [0u8; 32];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_s256_of_the_verifier() {
        let pair = PkcePair::from_verifier("test-verifier".to_string());
        let digest = Sha256::digest(b"test-verifier");
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn generated_pairs_are_unique_and_unpadded() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert!(!a.verifier.contains('='));
        assert!(!a.challenge.contains('='));
        // 96 bytes of entropy → 128 base64url chars.
        assert_eq!(a.verifier.len(), 128);
    }
}
