//! Record protection.
//!
//! A [`Transform`] protects and unprotects record payloads in place. The
//! record layer owns one transform per epoch (handed over on
//! [`epoch_add`](crate::RecordLayer::epoch_add)) and never touches payload
//! bytes itself; an epoch without a transform passes payloads through
//! unchanged.

use crate::record::RecordHeader;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Record authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AuthError;

/// Per-epoch record protection.
///
/// Both operations work in place on the payload region of a single
/// record; the header fields and sequence number are authenticated as
/// associated data. A transform is handed to the record layer on
/// [`epoch_add`](crate::RecordLayer::epoch_add) and must not be touched
/// by the caller afterwards; it is dropped when the epoch window slides
/// past its epoch.
pub trait Transform {
    /// Worst-case ciphertext expansion for plaintexts up to `max_plain`
    /// bytes.
    fn expansion(&self, max_plain: usize) -> usize;

    /// Protect `payload[..plain_len]` in place and return the ciphertext
    /// length.
    ///
    /// `payload` holds at least `plain_len + expansion(plain_len)` bytes.
    fn encrypt(&mut self, seq: u64, head: &RecordHeader, payload: &mut [u8], plain_len: usize)
        -> usize;

    /// Unprotect `payload` in place and return the plaintext length.
    ///
    /// The plaintext occupies the prefix of `payload` on success.
    ///
    /// # Errors
    ///
    /// * [`AuthError`] if the record fails authentication.
    fn decrypt(
        &mut self,
        seq: u64,
        head: &RecordHeader,
        payload: &mut [u8],
    ) -> Result<usize, AuthError>;
}

/// The identity transform: no protection, no expansion.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity;

impl Transform for Identity {
    fn expansion(&self, _max_plain: usize) -> usize {
        0
    }

    fn encrypt(
        &mut self,
        _seq: u64,
        _head: &RecordHeader,
        _payload: &mut [u8],
        plain_len: usize,
    ) -> usize {
        plain_len
    }

    fn decrypt(
        &mut self,
        _seq: u64,
        _head: &RecordHeader,
        payload: &mut [u8],
    ) -> Result<usize, AuthError> {
        Ok(payload.len())
    }
}

/// Single-byte XOR obfuscation.
///
/// # Warning
///
/// ⚠️ This is not encryption ⚠️
///
/// It exists to make transformed bytes visibly different from plaintext
/// in tests and diagnostics, nothing more.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Xor {
    key: u8,
}

impl Xor {
    /// Create an obfuscator with the given key byte.
    pub const fn new(key: u8) -> Self {
        Self { key }
    }
}

impl Transform for Xor {
    fn expansion(&self, _max_plain: usize) -> usize {
        0
    }

    fn encrypt(
        &mut self,
        _seq: u64,
        _head: &RecordHeader,
        payload: &mut [u8],
        plain_len: usize,
    ) -> usize {
        for byte in payload[..plain_len].iter_mut() {
            *byte ^= self.key;
        }
        plain_len
    }

    fn decrypt(
        &mut self,
        _seq: u64,
        _head: &RecordHeader,
        payload: &mut [u8],
    ) -> Result<usize, AuthError> {
        for byte in payload.iter_mut() {
            *byte ^= self.key;
        }
        Ok(payload.len())
    }
}

/// HMAC-SHA256 record authentication.
///
/// Appends a tag over the record sequence number, header fields, and
/// payload. The payload itself is not encrypted; this transform provides
/// integrity only, in the shape of a MAC-then-encrypt suite with a null
/// cipher.
pub struct HmacSha256 {
    mac: Hmac<Sha256>,
}

impl HmacSha256 {
    /// Tag length appended to each record.
    pub const TAG_LEN: usize = 32;

    /// Create a transform keyed with `key`.
    pub fn new(key: &[u8]) -> Self {
        // new_from_slice accepts any key length, unwrap will never panic
        Self {
            mac: Hmac::<Sha256>::new_from_slice(key).unwrap(),
        }
    }

    fn tag(&self, seq: u64, head: &RecordHeader, payload: &[u8]) -> [u8; Self::TAG_LEN] {
        let mut mac: Hmac<Sha256> = self.mac.clone();
        mac.update(&seq.to_be_bytes());
        mac.update(&[u8::from(head.ctype)]);
        mac.update(&head.version.to_be_bytes());
        mac.update(&head.epoch.to_be_bytes());
        mac.update(payload);
        mac.finalize().into_bytes().into()
    }
}

impl core::fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
        write!(f, "HmacSha256 {{ ... }}")
    }
}

impl Transform for HmacSha256 {
    fn expansion(&self, _max_plain: usize) -> usize {
        Self::TAG_LEN
    }

    fn encrypt(
        &mut self,
        seq: u64,
        head: &RecordHeader,
        payload: &mut [u8],
        plain_len: usize,
    ) -> usize {
        let tag: [u8; Self::TAG_LEN] = self.tag(seq, head, &payload[..plain_len]);
        payload[plain_len..plain_len + Self::TAG_LEN].copy_from_slice(&tag);
        plain_len + Self::TAG_LEN
    }

    fn decrypt(
        &mut self,
        seq: u64,
        head: &RecordHeader,
        payload: &mut [u8],
    ) -> Result<usize, AuthError> {
        let plain_len: usize = payload.len().checked_sub(Self::TAG_LEN).ok_or(AuthError)?;
        let expected: [u8; Self::TAG_LEN] = self.tag(seq, head, &payload[..plain_len]);
        if bool::from(expected[..].ct_eq(&payload[plain_len..])) {
            Ok(plain_len)
        } else {
            Err(AuthError)
        }
    }
}
