//! Session secret

use std::fmt;

use crate::error::CryptoError;

/// Secret key length for every supported mode
pub const KEY_LEN: usize = 32;

/// Symmetric session secret established at negotiation
///
/// Never printed: `Debug` is redacted and there is no `Serialize`. The bytes
/// are cleared when the key is dropped.
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            // must not be elided
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}
