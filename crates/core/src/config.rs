use std::time::Duration;

use crate::models::money::CurrencyCode;

/// Engine-wide configuration. Per-user preferences live in
/// [`UserSettings`](crate::models::settings::UserSettings) instead.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Base currency for users who never picked one.
    pub default_currency: CurrencyCode,

    /// How long a "current" exchange rate stays valid in the cache.
    /// Historical rates never expire.
    pub current_rate_ttl: Duration,

    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,

    /// Round converted amounts to 2 decimal places.
    pub round_converted_amounts: bool,
}

const ENV_DEFAULT_CURRENCY: &str = "LEDGER_DEFAULT_CURRENCY";
const ENV_RATE_TTL_SECS: &str = "LEDGER_RATE_TTL_SECS";
const ENV_RATE_TIMEOUT_SECS: &str = "LEDGER_RATE_TIMEOUT_SECS";

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_currency: CurrencyCode::kes(),
            current_rate_ttl: Duration::from_secs(60 * 60),
            provider_timeout: Duration::from_secs(10),
            round_converted_amounts: true,
        }
    }
}

impl LedgerConfig {
    /// Build a config from `LEDGER_*` environment variables.
    /// Unset variables keep their defaults; unparsable ones are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ENV_DEFAULT_CURRENCY) {
            match CurrencyCode::parse(&raw) {
                Ok(code) => config.default_currency = code,
                Err(e) => log::warn!("Ignoring {ENV_DEFAULT_CURRENCY}={raw:?}: {e}"),
            }
        }
        if let Some(secs) = read_secs(ENV_RATE_TTL_SECS) {
            config.current_rate_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read_secs(ENV_RATE_TIMEOUT_SECS) {
            if secs == 0 {
                log::warn!("Ignoring {ENV_RATE_TIMEOUT_SECS}=0: provider calls must be bounded");
            } else {
                config.provider_timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    pub fn with_default_currency(mut self, currency: CurrencyCode) -> Self {
        self.default_currency = currency;
        self
    }

    pub fn with_current_rate_ttl(mut self, ttl: Duration) -> Self {
        self.current_rate_ttl = ttl;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }
}

fn read_secs(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(e) => {
            log::warn!("Ignoring {var}={raw:?}: {e}");
            None
        }
    }
}
