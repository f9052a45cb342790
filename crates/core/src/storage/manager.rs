use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::encryption::{random_bytes, KdfParams, SnapshotKey};
use super::format::{self, SnapshotHeader};
use crate::errors::CoreError;
use crate::models::ledger::UserLedger;

/// A user's partition as written to an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub exported_at: DateTime<Utc>,
    pub ledger: UserLedger,
}

impl LedgerSnapshot {
    pub fn new(ledger: UserLedger) -> Self {
        Self {
            exported_at: Utc::now(),
            ledger,
        }
    }
}

/// Encrypted export and import of ledger snapshots.
///
/// Flow: snapshot → bincode → AES-256-GCM under an Argon2id key → BLDG bytes.
pub struct SnapshotArchive;

impl SnapshotArchive {
    pub fn seal(snapshot: &LedgerSnapshot, password: &str) -> Result<Vec<u8>, CoreError> {
        Self::seal_with(snapshot, password, KdfParams::default())
    }

    pub fn seal_with(
        snapshot: &LedgerSnapshot,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Vec<u8>, CoreError> {
        format::check_kdf(&kdf)?;
        let plaintext = bincode::serialize(snapshot)?;

        let salt = random_bytes()?;
        let nonce = random_bytes()?;
        let key = SnapshotKey::derive(password, &salt, &kdf)?;

        // AES-GCM appends a 16-byte tag, so the payload length is known up front.
        let header = SnapshotHeader {
            version: format::CURRENT_VERSION,
            kdf,
            salt,
            nonce,
            payload_len: (plaintext.len() + 16) as u64,
        };
        let aad = header.encode();
        let ciphertext = key.seal(&nonce, &plaintext, &aad)?;

        let mut out = Vec::with_capacity(aad.len() + ciphertext.len());
        out.extend_from_slice(&aad);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(data: &[u8], password: &str) -> Result<LedgerSnapshot, CoreError> {
        let (header, payload) = SnapshotHeader::decode(data)?;
        let key = SnapshotKey::derive(password, &header.salt, &header.kdf)?;
        let plaintext = key.open(&header.nonce, payload, &header.encode())?;
        bincode::deserialize(&plaintext)
            .map_err(|e| CoreError::Deserialization(format!("Failed to decode ledger snapshot: {e}")))
    }

    pub fn seal_to_file(
        snapshot: &LedgerSnapshot,
        path: impl AsRef<Path>,
        password: &str,
    ) -> Result<(), CoreError> {
        let bytes = Self::seal(snapshot, password)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn open_file(path: impl AsRef<Path>, password: &str) -> Result<LedgerSnapshot, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::open(&bytes, password)
    }

    /// Plain, human-readable export. Not encrypted.
    pub fn to_json(snapshot: &LedgerSnapshot) -> Result<String, CoreError> {
        serde_json::to_string_pretty(snapshot)
            .map_err(|e| CoreError::Serialization(format!("Failed to encode ledger snapshot: {e}")))
    }
}
