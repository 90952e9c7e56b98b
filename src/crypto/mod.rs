//! Encryption modes
//!
//! An [`EncryptionMode`] turns one codec payload into the authenticated
//! ciphertext that follows the packet header. Modes are looked up by the name
//! the voice server advertises, chosen once per session by
//! [`EncryptionRegistry::negotiate`], and then owned by that session alone:
//! every mode keeps reusable scratch buffers and must never be shared.

pub mod key;
pub mod xsalsa20;

use bytes::BytesMut;

use crate::error::{CryptoError, SessionError};

pub use key::{SecretKey, KEY_LEN};
pub use xsalsa20::{XSalsa20Poly1305LiteMode, XSalsa20Poly1305Mode, XSalsa20Poly1305SuffixMode};

/// Poly1305 authentication tag length
pub const TAG_LEN: usize = 16;

/// Authenticated-encryption transform applied to every outgoing frame
pub trait EncryptionMode: Send {
    /// Name advertised by the voice server
    fn name(&self) -> &'static str;

    /// Seal `payload` and append it to `output`.
    ///
    /// `output` must already hold the packet header; its first 12 bytes are
    /// the synchronization value. On success exactly `payload.len() + TAG_LEN`
    /// bytes of ciphertext are appended (followed by the nonce trailer for the
    /// modes that carry one) and `true` is returned. On failure `output` is
    /// left untouched.
    fn seal(&mut self, payload: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool;

    /// Authenticate and decrypt a full packet, appending the plaintext to
    /// `output`. Returns `false` and writes nothing if authentication fails.
    fn open(&mut self, packet: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool;

    /// Bytes `seal` appends beyond the payload itself
    fn overhead(&self) -> usize {
        TAG_LEN
    }
}

type ModeConstructor = fn() -> Box<dyn EncryptionMode>;

/// Maps mode names to constructors
pub struct EncryptionRegistry {
    modes: Vec<(&'static str, ModeConstructor)>,
}

impl EncryptionRegistry {
    pub fn empty() -> Self {
        Self { modes: Vec::new() }
    }

    pub fn register(&mut self, name: &'static str, constructor: ModeConstructor) {
        self.modes.retain(|(existing, _)| *existing != name);
        self.modes.push((name, constructor));
    }

    pub fn supports(&self, name: &str) -> bool {
        self.modes.iter().any(|(n, _)| *n == name)
    }

    /// Names of all registered modes, in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.modes.iter().map(|(n, _)| *n).collect()
    }

    /// Construct a fresh instance of `name`
    pub fn create(&self, name: &str) -> Result<Box<dyn EncryptionMode>, CryptoError> {
        self.modes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, constructor)| constructor())
            .ok_or_else(|| CryptoError::UnsupportedMode(name.to_string()))
    }

    /// Pick the first mode in `preference` that the server `offered` and we
    /// know how to build.
    pub fn negotiate(
        &self,
        offered: &[String],
        preference: &[String],
    ) -> Result<Box<dyn EncryptionMode>, SessionError> {
        preference
            .iter()
            .filter(|name| offered.iter().any(|o| o == *name))
            .find_map(|name| self.create(name).ok())
            .ok_or_else(|| SessionError::NoCommonEncryptionMode(offered.to_vec()))
    }
}

impl Default for EncryptionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(XSalsa20Poly1305Mode::NAME, || {
            Box::new(XSalsa20Poly1305Mode::new())
        });
        registry.register(XSalsa20Poly1305SuffixMode::NAME, || {
            Box::new(XSalsa20Poly1305SuffixMode::new())
        });
        registry.register(XSalsa20Poly1305LiteMode::NAME, || {
            Box::new(XSalsa20Poly1305LiteMode::new())
        });
        registry
    }
}
