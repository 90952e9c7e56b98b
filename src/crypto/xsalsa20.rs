//! XSalsa20-Poly1305 encryption modes
//!
//! All three modes share the NaCl `crypto_secretbox` layout: a 32-byte zero
//! prefix ahead of the plaintext, and a sealed box whose first 16 bytes are
//! dropped, leaving `tag || ciphertext`. They differ only in where the 24-byte
//! nonce comes from:
//!
//! | mode                        | nonce                         | trailer        |
//! |-----------------------------|-------------------------------|----------------|
//! | `xsalsa20_poly1305`         | RTP header + 12 zero bytes    | none           |
//! | `xsalsa20_poly1305_suffix`  | 24 random bytes               | 24-byte nonce  |
//! | `xsalsa20_poly1305_lite`    | 4-byte counter + 20 zero bytes| 4-byte counter |

use bytes::{BufMut, BytesMut};
use crypto_secretbox::aead::generic_array::GenericArray;
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use rand::RngCore;

use super::{EncryptionMode, SecretKey, TAG_LEN};
use crate::codec::opus::MAX_FRAME_SIZE;
use crate::protocol::rtp::HEADER_LEN;

/// Zero prefix the secretbox construction requires ahead of the plaintext
const ZERO_BYTES: usize = 32;

/// Leading bytes of the sealed box that are always zero and never sent
const BOX_ZERO_BYTES: usize = 16;

/// Extended nonce length
pub const NONCE_LEN: usize = 24;

/// Lite mode trailer length
pub const LITE_NONCE_LEN: usize = 4;

const SCRATCH_LEN: usize = MAX_FRAME_SIZE + ZERO_BYTES;

/// Reusable plaintext/ciphertext work areas
///
/// Both buffers are cleared on every call. Not safe to share: one instance
/// belongs to one encryption mode, which belongs to one connection.
struct SecretBox {
    message: Vec<u8>,
    cipher: Vec<u8>,
}

impl SecretBox {
    fn new() -> Self {
        Self {
            message: vec![0u8; SCRATCH_LEN],
            cipher: vec![0u8; SCRATCH_LEN],
        }
    }

    fn clear(&mut self) {
        self.message.fill(0);
        self.cipher.fill(0);
    }

    /// Seal `payload`, returning `tag || ciphertext`
    fn seal(&mut self, payload: &[u8], nonce: &[u8; NONCE_LEN], key: &SecretKey) -> Option<&[u8]> {
        self.clear();
        if payload.len() > MAX_FRAME_SIZE {
            return None;
        }

        let end = ZERO_BYTES + payload.len();
        self.message[ZERO_BYTES..end].copy_from_slice(payload);
        self.cipher[ZERO_BYTES..end].copy_from_slice(&self.message[ZERO_BYTES..end]);

        let aead = XSalsa20Poly1305::new_from_slice(key.as_bytes()).ok()?;
        let tag = aead
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce[..]),
                b"",
                &mut self.cipher[ZERO_BYTES..end],
            )
            .ok()?;
        self.cipher[BOX_ZERO_BYTES..ZERO_BYTES].copy_from_slice(&tag);

        Some(&self.cipher[BOX_ZERO_BYTES..end])
    }

    /// Open a `tag || ciphertext` box, returning the plaintext
    fn open(&mut self, sealed: &[u8], nonce: &[u8; NONCE_LEN], key: &SecretKey) -> Option<&[u8]> {
        self.clear();
        if sealed.len() < TAG_LEN || sealed.len() - TAG_LEN > MAX_FRAME_SIZE {
            return None;
        }

        let end = BOX_ZERO_BYTES + sealed.len();
        self.cipher[BOX_ZERO_BYTES..end].copy_from_slice(sealed);
        self.message[ZERO_BYTES..end].copy_from_slice(&self.cipher[ZERO_BYTES..end]);

        let aead = XSalsa20Poly1305::new_from_slice(key.as_bytes()).ok()?;
        aead.decrypt_in_place_detached(
            GenericArray::from_slice(&nonce[..]),
            b"",
            &mut self.message[ZERO_BYTES..end],
            GenericArray::from_slice(&self.cipher[BOX_ZERO_BYTES..ZERO_BYTES]),
        )
        .ok()?;

        Some(&self.message[ZERO_BYTES..end])
    }
}

fn header_nonce(header: &[u8]) -> Option<[u8; NONCE_LEN]> {
    let header = header.get(..HEADER_LEN)?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..HEADER_LEN].copy_from_slice(header);
    Some(nonce)
}

/// Nonce derived from the packet header
pub struct XSalsa20Poly1305Mode {
    scratch: SecretBox,
}

impl XSalsa20Poly1305Mode {
    pub const NAME: &'static str = "xsalsa20_poly1305";

    pub fn new() -> Self {
        Self {
            scratch: SecretBox::new(),
        }
    }
}

impl Default for XSalsa20Poly1305Mode {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionMode for XSalsa20Poly1305Mode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn seal(&mut self, payload: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        let Some(nonce) = header_nonce(&output[..]) else {
            return false;
        };

        match self.scratch.seal(payload, &nonce, key) {
            Some(sealed) => {
                output.put_slice(sealed);
                true
            }
            None => false,
        }
    }

    fn open(&mut self, packet: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        let Some(nonce) = header_nonce(packet) else {
            return false;
        };

        match self.scratch.open(&packet[HEADER_LEN..], &nonce, key) {
            Some(plain) => {
                output.put_slice(plain);
                true
            }
            None => false,
        }
    }
}

/// Random nonce appended to the packet
pub struct XSalsa20Poly1305SuffixMode {
    scratch: SecretBox,
}

impl XSalsa20Poly1305SuffixMode {
    pub const NAME: &'static str = "xsalsa20_poly1305_suffix";

    pub fn new() -> Self {
        Self {
            scratch: SecretBox::new(),
        }
    }
}

impl Default for XSalsa20Poly1305SuffixMode {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionMode for XSalsa20Poly1305SuffixMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn overhead(&self) -> usize {
        TAG_LEN + NONCE_LEN
    }

    fn seal(&mut self, payload: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        if output.len() < HEADER_LEN {
            return false;
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        match self.scratch.seal(payload, &nonce, key) {
            Some(sealed) => {
                output.put_slice(sealed);
                output.put_slice(&nonce);
                true
            }
            None => false,
        }
    }

    fn open(&mut self, packet: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        if packet.len() < HEADER_LEN + TAG_LEN + NONCE_LEN {
            return false;
        }

        let split = packet.len() - NONCE_LEN;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&packet[split..]);

        match self.scratch.open(&packet[HEADER_LEN..split], &nonce, key) {
            Some(plain) => {
                output.put_slice(plain);
                true
            }
            None => false,
        }
    }
}

/// Incrementing 32-bit nonce appended to the packet
pub struct XSalsa20Poly1305LiteMode {
    scratch: SecretBox,
    counter: u32,
}

impl XSalsa20Poly1305LiteMode {
    pub const NAME: &'static str = "xsalsa20_poly1305_lite";

    pub fn new() -> Self {
        Self {
            scratch: SecretBox::new(),
            counter: 0,
        }
    }
}

impl Default for XSalsa20Poly1305LiteMode {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionMode for XSalsa20Poly1305LiteMode {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn overhead(&self) -> usize {
        TAG_LEN + LITE_NONCE_LEN
    }

    fn seal(&mut self, payload: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        if output.len() < HEADER_LEN {
            return false;
        }

        let counter = self.counter.to_be_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..LITE_NONCE_LEN].copy_from_slice(&counter);

        match self.scratch.seal(payload, &nonce, key) {
            Some(sealed) => {
                output.put_slice(sealed);
                output.put_slice(&counter);
                self.counter = self.counter.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    fn open(&mut self, packet: &[u8], output: &mut BytesMut, key: &SecretKey) -> bool {
        if packet.len() < HEADER_LEN + TAG_LEN + LITE_NONCE_LEN {
            return false;
        }

        let split = packet.len() - LITE_NONCE_LEN;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..LITE_NONCE_LEN].copy_from_slice(&packet[split..]);

        match self.scratch.open(&packet[HEADER_LEN..split], &nonce, key) {
            Some(plain) => {
                output.put_slice(plain);
                true
            }
            None => false,
        }
    }
}
