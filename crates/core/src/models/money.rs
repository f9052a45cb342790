use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// ISO-4217 style currency code: exactly 3 uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a currency code (trimmed, uppercased).
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim().to_uppercase();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CoreError::ValidationError(format!(
                "Invalid currency code '{raw}': must be exactly 3 ASCII letters (e.g., KES, USD, EUR)"
            )));
        }
        Ok(Self(trimmed))
    }

    pub fn kes() -> Self {
        Self("KES".to_string())
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// An amount tagged with the currency it is denominated in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: CurrencyCode,
}

impl Money {
    pub fn new(amount: f64, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Resolve which currency an amount is denominated in.
    ///
    /// Order: the explicitly recorded currency, then the user's settings
    /// currency, then the engine default. This is the only place the
    /// fallback chain is spelled out.
    pub fn resolve_currency(
        recorded: Option<&CurrencyCode>,
        settings: Option<&CurrencyCode>,
        default: &CurrencyCode,
    ) -> CurrencyCode {
        recorded.or(settings).unwrap_or(default).clone()
    }

    /// Convert with a known rate (`1 self.currency = rate target`).
    #[must_use]
    pub fn convert(&self, rate: f64, target: &CurrencyCode, round: bool) -> Money {
        if &self.currency == target {
            return self.clone();
        }
        let raw = self.amount * rate;
        let amount = if round { round_cents(raw) } else { raw };
        Money::new(amount, target.clone())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

/// Round to 2 decimal places.
#[must_use]
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reject NaN, infinities and anything `<= 0`.
pub(crate) fn ensure_positive(value: f64, field: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::ValidationError(format!(
            "{field} must be a positive, finite number (got {value})"
        )));
    }
    Ok(())
}
