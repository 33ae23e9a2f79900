// ABOUTME: Signing secret wrapper that never prints its contents.
// ABOUTME: Generates a random hex key when no secret is configured.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;

/// Minimum accepted length for a configured signing secret.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// 32 random bytes from the OS, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Secret(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
