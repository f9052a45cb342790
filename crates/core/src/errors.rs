use thiserror::Error;

/// Unified error type for the entire budget-ledger-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Ledger / Business Logic ─────────────────────────────────────
    /// Malformed input, rejected before the ledger is touched.
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// The referenced row does not exist or belongs to another user.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The row was removed or changed underneath an in-flight operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An invariant check failed; the unit was aborted and nothing was committed.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    // ── Exchange Rates / Network ────────────────────────────────────
    #[error("Exchange rate {from}/{to} unavailable: {reason}")]
    ExternalRateUnavailable {
        from: String,
        to: String,
        reason: String,
    },

    #[error("API error ({provider}): {message}")]
    Api { provider: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    // ── Snapshot Storage ────────────────────────────────────────────
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u16),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: wrong password or corrupted snapshot")]
    Decryption,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Validation and not-found errors carry a message meant for the caller.
    /// Everything else is an internal failure.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CoreError::ValidationError(_) | CoreError::NotFound { .. }
        )
    }

    /// Message safe to show to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            "Something went wrong, please try again later".to_string()
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors embed the full URL; keep query strings (API keys) out of logs.
        let msg = e.to_string();
        let sanitized = match msg.find('?') {
            Some(idx) => format!("{}?<query redacted>", &msg[..idx]),
            None => msg,
        };
        CoreError::Network(sanitized)
    }
}

impl From<aes_gcm::Error> for CoreError {
    fn from(_: aes_gcm::Error) -> Self {
        CoreError::Decryption
    }
}

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CoreError::Internal(format!("lock poisoned: {e}"))
    }
}
