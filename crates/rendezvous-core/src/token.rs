//! Server token generation and token fingerprints.
//!
//! The server token is a diagnostic value only. It is echoed to clients on
//! registration and never validated against anything.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Number of leading characters kept by [`fingerprint`].
pub const FINGERPRINT_LEN: usize = 8;

/// Random per-process token.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerToken(String);

impl ServerToken {
    /// Generate 16 random bytes, base64url-encoded without padding.
    pub fn generate() -> Self {
        let random_bytes: [u8; 16] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// Use a fixed token value.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The full token, as sent in `registered`.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Truncated form for logs and status reports.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

// Debug output must not leak the full token into logs.
impl fmt::Debug for ServerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerToken({}…)", self.fingerprint())
    }
}

/// First [`FINGERPRINT_LEN`] characters of `token` (fewer if it is shorter).
pub fn fingerprint(token: &str) -> String {
    token.chars().take(FINGERPRINT_LEN).collect()
}
