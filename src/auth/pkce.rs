//! PKCE (Proof Key for Code Exchange) utilities for OAuth2
//!
//! Implements RFC 7636 for secure authorization code exchange.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind the code verifier (encodes to 43 characters)
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind the state token (encodes to 22 characters)
const STATE_BYTES: usize = 16;

/// Challenge method sent with the authorization request
pub const CHALLENGE_METHOD: &str = "S256";

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically random code verifier
///
/// 32 bytes from the OS entropy source, Base64URL encoded without padding.
pub fn generate_code_verifier() -> String {
    random_url_safe(VERIFIER_BYTES)
}

/// Generate a code challenge from the code verifier
///
/// Uses S256 method: BASE64URL(SHA256(code_verifier))
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an anti-forgery state token, independent of the verifier
pub fn generate_state() -> String {
    random_url_safe(STATE_BYTES)
}

/// Single-use PKCE material for one connect attempt
///
/// The verifier never leaves the process except in the token exchange.
#[derive(Clone)]
pub struct Session {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl Session {
    /// Generate fresh verifier, challenge and state
    pub fn new() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: generate_state(),
        }
    }

    /// Exact, case-sensitive comparison against the session state
    pub fn state_matches(&self, returned: &str) -> bool {
        self.state == returned
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .field("state", &self.state)
            .finish()
    }
}
