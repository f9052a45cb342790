use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::CurrencyCode;

/// Per-user preferences, stored inside the user's ledger partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Base currency every `amount` in the ledger is expressed in.
    pub currency: CurrencyCode,
    pub updated_at: DateTime<Utc>,
}

impl UserSettings {
    pub fn new(currency: CurrencyCode) -> Self {
        Self {
            currency,
            updated_at: Utc::now(),
        }
    }
}
