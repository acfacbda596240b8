use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes in each session token (96 bits).
pub const TOKEN_BYTES: usize = 12;

/// Session key pair identifying a player across reconnects.
///
/// `public` is the handle other clients see; `private` must accompany every
/// message the owning client sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: String,
    pub private: String,
}

impl KeyPair {
    /// Draw a fresh pair of independent random tokens. Uniqueness against
    /// previously issued pairs is the caller's job.
    pub fn generate() -> Self {
        Self {
            private: generate_token(),
            public: generate_token(),
        }
    }
}

/// Hex-encoded random token of [`TOKEN_BYTES`] bytes.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
