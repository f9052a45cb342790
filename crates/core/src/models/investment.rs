use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::{ensure_positive, CurrencyCode};
use crate::errors::CoreError;

const MAX_NAME_LEN: usize = 100;
const MAX_NOTES_LEN: usize = 500;

/// A tracked investment position.
///
/// Amounts without a suffix are in the investment's native `currency`;
/// `_base` amounts are normalized into the user's base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Opaque id from the category taxonomy.
    pub category_id: String,
    pub currency: CurrencyCode,
    pub initial_amount: f64,
    pub initial_exchange_rate: f64,
    /// Snapshot of `initial_amount * initial_exchange_rate` at creation.
    pub initial_amount_base: f64,
    pub current_amount: f64,
    pub current_exchange_rate: f64,
    /// Always `current_amount * current_exchange_rate`.
    pub current_value_base: f64,
    /// Cumulative native contributions (initial + capital additions).
    pub total_invested: f64,
    pub date_invested: DateTime<FixedOffset>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Investment {
    /// Set the current position and re-derive the normalized value.
    pub(crate) fn set_current(&mut self, amount: f64, exchange_rate: f64) {
        self.current_amount = amount;
        self.current_exchange_rate = exchange_rate;
        self.current_value_base = amount * exchange_rate;
    }

    /// Gain of the whole position in base currency since creation.
    #[must_use]
    pub fn gain_base(&self) -> f64 {
        self.current_value_base - self.initial_amount_base
    }

    #[must_use]
    pub fn snapshot(&self) -> ValuationSnapshot {
        ValuationSnapshot {
            amount: self.current_amount,
            exchange_rate: self.current_exchange_rate,
            value_base: self.current_value_base,
        }
    }
}

/// Current position of an investment at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub amount: f64,
    pub exchange_rate: f64,
    pub value_base: f64,
}

/// Kind of change recorded by an [`InvestmentUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Market revaluation. `total_invested` is untouched.
    ValueUpdate,
    /// New money put in. Adds to `total_invested` and to the history bucket.
    CapitalAddition,
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateType::ValueUpdate => write!(f, "value_update"),
            UpdateType::CapitalAddition => write!(f, "capital_addition"),
        }
    }
}

/// Append-only audit row, one per valuation or capital addition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentUpdate {
    pub id: Uuid,
    pub investment_id: Uuid,
    pub update_type: UpdateType,
    pub previous_amount: f64,
    pub new_amount: f64,
    pub previous_exchange_rate: f64,
    pub new_exchange_rate: f64,
    pub previous_value_base: f64,
    pub new_value_base: f64,
    #[serde(default)]
    pub additional_capital: Option<f64>,
    pub gain_loss_native: f64,
    pub gain_loss_base: f64,
    pub percentage_change_native: f64,
    pub percentage_change_base: f64,
    pub update_date: DateTime<FixedOffset>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InvestmentUpdate {
    /// Build the audit row for moving from `previous` to `next`.
    pub fn between(
        investment_id: Uuid,
        update_type: UpdateType,
        previous: ValuationSnapshot,
        next: ValuationSnapshot,
        additional_capital: Option<f64>,
        update_date: DateTime<FixedOffset>,
        notes: Option<String>,
    ) -> Self {
        let gain_loss_native = next.amount - previous.amount;
        let gain_loss_base = next.value_base - previous.value_base;
        Self {
            id: Uuid::new_v4(),
            investment_id,
            update_type,
            previous_amount: previous.amount,
            new_amount: next.amount,
            previous_exchange_rate: previous.exchange_rate,
            new_exchange_rate: next.exchange_rate,
            previous_value_base: previous.value_base,
            new_value_base: next.value_base,
            additional_capital,
            gain_loss_native,
            gain_loss_base,
            percentage_change_native: percentage_change(gain_loss_native, previous.amount),
            percentage_change_base: percentage_change(gain_loss_base, previous.value_base),
            update_date,
            notes,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn previous(&self) -> ValuationSnapshot {
        ValuationSnapshot {
            amount: self.previous_amount,
            exchange_rate: self.previous_exchange_rate,
            value_base: self.previous_value_base,
        }
    }
}

/// `gain / previous * 100`, or 0 when there is nothing to compare against.
#[must_use]
pub fn percentage_change(gain: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        gain / previous * 100.0
    } else {
        0.0
    }
}

/// Caller-supplied fields for a new investment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvestment {
    pub name: String,
    pub category_id: String,
    pub currency: CurrencyCode,
    pub initial_amount: f64,
    /// Native → base rate. Looked up for `date_invested` when omitted.
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    /// Current native value if it already moved. Defaults to `initial_amount`.
    #[serde(default)]
    pub current_amount: Option<f64>,
    /// Current rate if it already moved. Defaults to the initial rate.
    #[serde(default)]
    pub current_exchange_rate: Option<f64>,
    pub date_invested: DateTime<FixedOffset>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewInvestment {
    pub fn new(
        name: impl Into<String>,
        category_id: impl Into<String>,
        currency: CurrencyCode,
        initial_amount: f64,
        date_invested: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            name: name.into(),
            category_id: category_id.into(),
            currency,
            initial_amount,
            exchange_rate: None,
            current_amount: None,
            current_exchange_rate: None,
            date_invested,
            notes: None,
        }
    }

    pub fn with_exchange_rate(mut self, rate: f64) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    pub fn with_current(mut self, amount: f64, exchange_rate: f64) -> Self {
        self.current_amount = Some(amount);
        self.current_exchange_rate = Some(exchange_rate);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(CoreError::ValidationError(format!(
                "Investment name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        if self.category_id.trim().is_empty() {
            return Err(CoreError::ValidationError("Investment category is required".into()));
        }
        ensure_positive(self.initial_amount, "Initial amount")?;
        if let Some(rate) = self.exchange_rate {
            ensure_positive(rate, "Exchange rate")?;
        }
        if let Some(amount) = self.current_amount {
            ensure_positive(amount, "Current amount")?;
        }
        if let Some(rate) = self.current_exchange_rate {
            ensure_positive(rate, "Current exchange rate")?;
        }
        validate_notes(self.notes.as_deref())
    }
}

/// Caller-supplied fields for a valuation change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentValueUpdate {
    pub update_type: UpdateType,
    /// New total native amount of the position.
    pub new_amount: f64,
    /// Native → base rate. Looked up for `update_date` when omitted.
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    /// Required for `CapitalAddition`, ignored otherwise.
    #[serde(default)]
    pub additional_capital: Option<f64>,
    pub update_date: DateTime<FixedOffset>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InvestmentValueUpdate {
    pub fn value_update(new_amount: f64, update_date: DateTime<FixedOffset>) -> Self {
        Self {
            update_type: UpdateType::ValueUpdate,
            new_amount,
            exchange_rate: None,
            additional_capital: None,
            update_date,
            notes: None,
        }
    }

    pub fn capital_addition(
        additional_capital: f64,
        new_amount: f64,
        update_date: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            update_type: UpdateType::CapitalAddition,
            new_amount,
            exchange_rate: None,
            additional_capital: Some(additional_capital),
            update_date,
            notes: None,
        }
    }

    pub fn with_exchange_rate(mut self, rate: f64) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        ensure_positive(self.new_amount, "New amount")?;
        if let Some(rate) = self.exchange_rate {
            ensure_positive(rate, "Exchange rate")?;
        }
        match (self.update_type, self.additional_capital) {
            (UpdateType::CapitalAddition, Some(capital)) => {
                ensure_positive(capital, "Additional capital")?
            }
            (UpdateType::CapitalAddition, None) => {
                return Err(CoreError::ValidationError(
                    "A capital addition needs the additional capital amount".into(),
                ))
            }
            (UpdateType::ValueUpdate, _) => {}
        }
        validate_notes(self.notes.as_deref())
    }
}

fn validate_notes(notes: Option<&str>) -> Result<(), CoreError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(CoreError::ValidationError(format!(
            "Notes must be at most {MAX_NOTES_LEN} characters"
        ))),
        _ => Ok(()),
    }
}
