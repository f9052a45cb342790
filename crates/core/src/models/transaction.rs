use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::history::CalendarDay;
use super::money::{ensure_positive, CurrencyCode, Money};
use crate::errors::CoreError;

const MAX_CATEGORY_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 500;

/// Which rollup bucket a ledger entry contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Savings,
    /// Capital moved into an investment. Only written by the valuation engine.
    Investment,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Income => write!(f, "income"),
            TransactionType::Expense => write!(f, "expense"),
            TransactionType::Savings => write!(f, "savings"),
            TransactionType::Investment => write!(f, "investment"),
        }
    }
}

/// A monetary event in the user's ledger.
///
/// `amount` is always expressed in the user's current base currency.
/// `original_amount` / `original_currency` keep what was entered so the
/// row can be re-normalized when the base currency changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub amount: f64,
    pub original_amount: f64,
    /// `None` on rows recorded before entry currencies were tracked; such
    /// rows are assumed to be in the base currency that was active then.
    #[serde(default)]
    pub original_currency: Option<CurrencyCode>,
    pub transaction_type: TransactionType,
    pub category: String,
    /// When it happened, in the user's local offset.
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub description: String,
    /// Set on the synthetic rows written for investment contributions.
    #[serde(default)]
    pub investment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// The local calendar day this entry rolls up into.
    #[must_use]
    pub fn calendar_day(&self) -> CalendarDay {
        CalendarDay::from_local(&self.date)
    }

    /// The entered amount, with the currency resolved through the fallback policy.
    #[must_use]
    pub fn original_money(&self, prior_base: &CurrencyCode) -> Money {
        Money::new(
            self.original_amount,
            Money::resolve_currency(self.original_currency.as_ref(), Some(prior_base), prior_base),
        )
    }

    /// `true` for rows owned by an investment.
    #[must_use]
    pub fn is_investment_contribution(&self) -> bool {
        self.investment_id.is_some()
    }
}

/// Caller-supplied fields for creating or editing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub amount: f64,
    /// Currency the amount was entered in. `None` means the base currency.
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    pub transaction_type: TransactionType,
    pub category: String,
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TransactionInput {
    pub fn new(
        transaction_type: TransactionType,
        amount: f64,
        category: impl Into<String>,
        date: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            amount,
            currency: None,
            transaction_type,
            category: category.into(),
            date,
            description: None,
        }
    }

    pub fn with_currency(mut self, currency: CurrencyCode) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Reject malformed input before anything touches the ledger.
    pub fn validate(&self) -> Result<(), CoreError> {
        ensure_positive(self.amount, "Transaction amount")?;
        if self.transaction_type == TransactionType::Investment {
            return Err(CoreError::ValidationError(
                "Investment contributions are recorded through the investments API".into(),
            ));
        }
        let category = self.category.trim();
        if category.is_empty() {
            return Err(CoreError::ValidationError("Category is required".into()));
        }
        if category.chars().count() > MAX_CATEGORY_LEN {
            return Err(CoreError::ValidationError(format!(
                "Category must be at most {MAX_CATEGORY_LEN} characters"
            )));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(CoreError::ValidationError(format!(
                    "Description must be at most {MAX_DESCRIPTION_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

/// The fields a ledger write stores once the amount has been normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub amount: f64,
    pub original: Money,
    pub transaction_type: TransactionType,
    pub category: String,
    pub date: DateTime<FixedOffset>,
    pub description: String,
    pub investment_id: Option<Uuid>,
}

impl NormalizedEntry {
    pub(crate) fn into_transaction(self, user_id: &str, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            amount: self.amount,
            original_amount: self.original.amount,
            original_currency: Some(self.original.currency),
            transaction_type: self.transaction_type,
            category: self.category,
            date: self.date,
            description: self.description,
            investment_id: self.investment_id,
            created_at: now,
            updated_at: now,
        }
    }
}
