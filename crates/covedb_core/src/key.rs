//! Store encryption key handling.
//!
//! Keys are validated and carried by configurations; the cipher itself is
//! owned by the storage engine. The key is automatically zeroized when
//! dropped.

use crate::error::{CoreError, CoreResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a store encryption key in bytes.
pub const KEY_SIZE: usize = 64;

/// Encryption key for a store file.
///
/// Construction copies the caller's bytes, so later mutation of the source
/// buffer never reaches a configuration holding the key.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the slice is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_length_accepted() {
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes()[0], 7);
    }

    #[test]
    fn wrong_lengths_rejected() {
        for len in [0, KEY_SIZE - 1, KEY_SIZE + 1] {
            let result = EncryptionKey::from_bytes(&vec![0u8; len]);
            assert!(
                matches!(result, Err(CoreError::InvalidArgument { .. })),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn copies_defensively() {
        let mut source = [1u8; KEY_SIZE];
        let key = EncryptionKey::from_bytes(&source).unwrap();
        source.fill(0xFF);
        assert_eq!(key.as_bytes()[0], 1);
    }

    #[test]
    fn debug_redacts_bytes() {
        let key = EncryptionKey::from_bytes(&[3u8; KEY_SIZE]).unwrap();
        let text = format!("{key:?}");
        assert!(text.contains("REDACTED"));
        assert!(!text.contains('3'));
    }
}
