//! Authenticated encryption for cached session bytes (§4.7).

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;

use obs_error::{ErrorKind, ObsError};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts the plaintext JSON a [`crate::SessionCache`] stores.
///
/// `decrypt` returns `None` rather than an error on any failure — a bad key
/// (rotation), tampering, or truncated input are all indistinguishable from
/// "no usable session" at the cache layer (§4.7).
pub trait Cipher: Send + Sync {
    /// Encrypts `plaintext`, returning ciphertext the cipher can later decrypt.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ObsError>;
    /// Decrypts data previously returned by `encrypt`. `None` on any failure.
    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Authenticated (GCM-class) encryption with a random nonce per call, stored
/// alongside the ciphertext.
pub struct ChaChaCipher {
    cipher: ChaCha20Poly1305,
}

impl ChaChaCipher {
    /// Builds a cipher from a 256-bit key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }
}

impl Cipher for ChaChaCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ObsError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ObsError::new(ErrorKind::Internal, "session encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.append(&mut ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher.decrypt(nonce, ciphertext).ok()
    }
}

/// Pass-through cipher for development: stores plaintext verbatim. Never
/// select this in production configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ObsError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        Some(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn chacha_round_trips() {
        let cipher = ChaChaCipher::new(&key(7));
        let ciphertext = cipher.encrypt(b"hello world").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"hello world");
    }

    #[test]
    fn chacha_two_encryptions_use_different_nonces() {
        let cipher = ChaChaCipher::new(&key(7));
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn chacha_rejects_wrong_key() {
        let encrypted = ChaChaCipher::new(&key(1)).encrypt(b"secret").unwrap();
        assert!(ChaChaCipher::new(&key(2)).decrypt(&encrypted).is_none());
    }

    #[test]
    fn chacha_rejects_truncated_input() {
        let cipher = ChaChaCipher::new(&key(9));
        assert!(cipher.decrypt(&[0u8; 4]).is_none());
    }

    #[test]
    fn noop_cipher_round_trips_without_transforming() {
        let cipher = NoopCipher;
        let ciphertext = cipher.encrypt(b"plain").unwrap();
        assert_eq!(ciphertext, b"plain");
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"plain");
    }
}
