use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};

use super::format::{NONCE_LEN, SALT_LEN};
use crate::errors::CoreError;

/// Argon2id cost parameters, stored in each snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// KiB of memory.
    pub memory_cost: u32,
    /// Iterations.
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 65_536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Lowest costs a snapshot header accepts. For tests and throwaway exports.
    pub fn minimal() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// 256-bit AES key for one snapshot.
pub struct SnapshotKey([u8; 32]);

impl SnapshotKey {
    /// Derive the key from `password` and the snapshot's salt with Argon2id.
    pub fn derive(password: &str, salt: &[u8; SALT_LEN], kdf: &KdfParams) -> Result<Self, CoreError> {
        if password.is_empty() {
            return Err(CoreError::ValidationError(
                "A password is required to encrypt or decrypt a snapshot".into(),
            ));
        }
        let params = Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
            .map_err(|e| CoreError::Encryption(format!("Invalid Argon2 params: {e}")))?;

        let mut key = [0u8; 32];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| CoreError::Encryption(format!("Argon2 key derivation failed: {e}")))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm, CoreError> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| CoreError::Encryption(format!("Failed to create cipher: {e}")))
    }

    /// AES-256-GCM seal. The 16-byte tag covers both `plaintext` and `aad`.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.cipher()?
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|e| CoreError::Encryption(format!("Encryption failed: {e}")))
    }

    /// Open a sealed payload. A wrong password or any tampering yields
    /// `CoreError::Decryption`.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })?)
    }
}

impl Drop for SnapshotKey {
    fn drop(&mut self) {
        self.0 = [0u8; 32];
    }
}

/// Fresh random bytes from the OS.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CoreError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out)
        .map_err(|e| CoreError::Encryption(format!("OS randomness unavailable: {e}")))?;
    Ok(out)
}
