//! Record-level authenticated encryption derived from a shared pre-key.
//!
//! Key derivation: `salt = SHA-512(pre_key)`, then `PBKDF2-HMAC-SHA256(pre_key,
//! salt, 10 iterations)` produces 64 bytes; the first 32 form the AES-256-GCM
//! key, the next 12 form a *fixed* nonce reused for every record.
//!
//! The iteration count is deliberately low — this derives a symmetric cipher
//! from a pre-shared key, not a password, so the usual PBKDF2 hardening
//! against brute force does not apply here.
//!
//! # Known hazard: fixed nonce
//!
//! AES-GCM requires a unique (key, nonce) pair per encryption. Reusing one
//! nonce across every record on a pipeline breaks GCM's confidentiality and
//! authenticity guarantees once enough records have been exchanged under the
//! same key. This module keeps the fixed-nonce scheme so it stays wire
//! compatible with the derivation described above; callers that need genuine
//! per-record security should rotate `rpc_key` per connection and keep
//! connection lifetimes short. See `DESIGN.md` for the rationale.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256, Sha512};

use crate::error::RpcError;

const PBKDF2_ITERATIONS: u32 = 10;
const DERIVED_LEN: usize = 64;
const NONCE_LEN: usize = 12;

/// Per-pipeline AEAD state, derived once from the shared pre-key.
pub struct Cipher {
    cipher: Aes256Gcm,
    nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derive cipher state from a shared pre-key.
    ///
    /// Returns `None` if `pre_key` is empty, meaning the pipeline should
    /// carry records in the clear.
    #[must_use]
    pub fn derive(pre_key: &str) -> Option<Self> {
        if pre_key.is_empty() {
            return None;
        }

        let salt = Sha512::digest(pre_key.as_bytes());
        let mut derived = [0u8; DERIVED_LEN];
        pbkdf2_hmac::<Sha256>(pre_key.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut derived);

        let (key_bytes, nonce_bytes) = derived.split_at(32);
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let mut nonce = [0u8; NONCE_LEN];
        if let Some(bytes) = nonce_bytes.get(..NONCE_LEN) {
            nonce.copy_from_slice(bytes);
        }

        Some(Self {
            cipher: Aes256Gcm::new(key),
            nonce,
        })
    }

    /// Encrypt one record.
    ///
    /// # Errors
    /// Returns [`RpcError::Framing`] if the underlying AEAD implementation
    /// refuses the input (it does not for any input this codec produces).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RpcError> {
        self.cipher
            .encrypt(Nonce::from_slice(&self.nonce), plaintext)
            .map_err(|e| RpcError::framing(format!("encryption failed: {e}")))
    }

    /// Decrypt one record.
    ///
    /// # Errors
    /// Returns [`RpcError::Framing`] if authentication fails, which is fatal
    /// to the pipeline: the byte stream can no longer be trusted.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, RpcError> {
        self.cipher
            .decrypt(Nonce::from_slice(&self.nonce), ciphertext)
            .map_err(|_| RpcError::framing("AEAD authentication failed"))
    }
}
