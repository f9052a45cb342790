use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::history::{
    BucketTotals, CalendarDay, CumulativeSavings, MonthHistory, MonthKey, YearHistory,
};
use super::investment::{Investment, InvestmentUpdate};
use super::money::{CurrencyCode, Money};
use super::settings::UserSettings;
use super::transaction::{NormalizedEntry, Transaction, TransactionType};
use crate::errors::CoreError;

/// Everything stored for one user. One partition is the unit an atomic
/// write operates on; users never share rows.
///
/// Ledger rows (transactions, investments, audit rows) are written through
/// the ledger methods below. History rows are written only through the
/// `upsert_*` primitives, which the rollup engine alone calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLedger {
    pub user_id: String,

    #[serde(default)]
    settings: Option<UserSettings>,

    /// Sorted by `date`, insertion order kept for equal dates.
    transactions: Vec<Transaction>,

    /// Sorted by (year, month, day).
    month_history: Vec<MonthHistory>,

    /// Sorted by (year, month).
    year_history: Vec<YearHistory>,

    #[serde(default)]
    cumulative_savings: Option<CumulativeSavings>,

    investments: Vec<Investment>,

    /// Append-only, in the order updates were applied.
    investment_updates: Vec<InvestmentUpdate>,
}

impl UserLedger {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    #[must_use]
    pub fn settings(&self) -> Option<&UserSettings> {
        self.settings.as_ref()
    }

    /// Base currency, resolved through the settings → default fallback.
    #[must_use]
    pub fn base_currency(&self, default: &CurrencyCode) -> CurrencyCode {
        Money::resolve_currency(None, self.settings.as_ref().map(|s| &s.currency), default)
    }

    /// All transactions, oldest first.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    #[must_use]
    pub fn month_history(&self) -> &[MonthHistory] {
        &self.month_history
    }

    #[must_use]
    pub fn year_history(&self) -> &[YearHistory] {
        &self.year_history
    }

    #[must_use]
    pub fn cumulative_savings(&self) -> Option<&CumulativeSavings> {
        self.cumulative_savings.as_ref()
    }

    #[must_use]
    pub fn investments(&self) -> &[Investment] {
        &self.investments
    }

    #[must_use]
    pub fn investment_updates(&self) -> &[InvestmentUpdate] {
        &self.investment_updates
    }

    pub fn find_transaction(&self, id: Uuid) -> Result<&Transaction, CoreError> {
        self.transactions
            .iter()
            .find(|t| t.id == id && t.user_id == self.user_id)
            .ok_or_else(|| CoreError::not_found("Transaction", id))
    }

    pub fn find_investment(&self, id: Uuid) -> Result<&Investment, CoreError> {
        self.investments
            .iter()
            .find(|i| i.id == id && i.user_id == self.user_id)
            .ok_or_else(|| CoreError::not_found("Investment", id))
    }

    #[must_use]
    pub fn month_row(&self, day: CalendarDay) -> Option<&MonthHistory> {
        self.month_history
            .binary_search_by_key(&day, MonthHistory::key)
            .ok()
            .map(|idx| &self.month_history[idx])
    }

    #[must_use]
    pub fn year_row(&self, key: MonthKey) -> Option<&YearHistory> {
        self.year_history
            .binary_search_by_key(&key, YearHistory::key)
            .ok()
            .map(|idx| &self.year_history[idx])
    }

    /// MonthHistory rows with `from <= day <= to`, using binary search on the sorted rows.
    #[must_use]
    pub fn month_rows_between(&self, from: CalendarDay, to: CalendarDay) -> &[MonthHistory] {
        if from > to {
            return &[];
        }
        let start = self
            .month_history
            .partition_point(|row| row.key() < from);
        let end = self.month_history.partition_point(|row| row.key() <= to);
        &self.month_history[start..end]
    }

    /// MonthHistory rows strictly before `day`.
    #[must_use]
    pub fn month_rows_before(&self, day: CalendarDay) -> &[MonthHistory] {
        let end = self.month_history.partition_point(|row| row.key() < day);
        &self.month_history[..end]
    }

    // ── Settings ────────────────────────────────────────────────────

    pub(crate) fn set_currency(&mut self, currency: CurrencyCode) {
        self.settings = Some(UserSettings::new(currency));
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Append a new transaction and return it.
    pub(crate) fn append_transaction(
        &mut self,
        entry: NormalizedEntry,
        now: DateTime<Utc>,
    ) -> Transaction {
        let transaction = entry.into_transaction(&self.user_id, now);
        self.insert_sorted(transaction.clone());
        transaction
    }

    /// Replace the fields of an existing transaction. Returns `(old, new)`.
    pub(crate) fn edit_transaction(
        &mut self,
        id: Uuid,
        entry: NormalizedEntry,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, Transaction), CoreError> {
        let old = self.remove_transaction(id)?;
        let new = Transaction {
            id: old.id,
            user_id: old.user_id.clone(),
            amount: entry.amount,
            original_amount: entry.original.amount,
            original_currency: Some(entry.original.currency),
            transaction_type: entry.transaction_type,
            category: entry.category,
            date: entry.date,
            description: entry.description,
            investment_id: old.investment_id,
            created_at: old.created_at,
            updated_at: now,
        };
        self.insert_sorted(new.clone());
        Ok((old, new))
    }

    /// Remove a transaction and return what was stored.
    pub(crate) fn delete_transaction(&mut self, id: Uuid) -> Result<Transaction, CoreError> {
        self.remove_transaction(id)
    }

    /// Index of every transaction by id. Valid until rows are added or removed.
    pub(crate) fn transaction_positions(&self) -> HashMap<Uuid, usize> {
        self.transactions
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.id, idx))
            .collect()
    }

    /// Overwrite the normalized amount and provenance of a transaction in place.
    /// The date is untouched, so ordering and `positions` stay valid.
    pub(crate) fn renormalize_transaction(
        &mut self,
        positions: &HashMap<Uuid, usize>,
        id: Uuid,
        amount: f64,
        original: Money,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let transaction = positions
            .get(&id)
            .and_then(|&idx| self.transactions.get_mut(idx))
            .filter(|t| t.id == id)
            .ok_or_else(|| {
                CoreError::InvalidState(format!("Transaction {id} vanished during rebuild"))
            })?;
        transaction.amount = amount;
        transaction.original_amount = original.amount;
        transaction.original_currency = Some(original.currency);
        transaction.updated_at = now;
        Ok(())
    }

    fn remove_transaction(&mut self, id: Uuid) -> Result<Transaction, CoreError> {
        let idx = self
            .transactions
            .iter()
            .position(|t| t.id == id && t.user_id == self.user_id)
            .ok_or_else(|| CoreError::not_found("Transaction", id))?;
        Ok(self.transactions.remove(idx))
    }

    /// Insert after every row with the same or earlier date (stable for ties).
    fn insert_sorted(&mut self, transaction: Transaction) {
        let pos = self
            .transactions
            .partition_point(|t| t.date <= transaction.date);
        self.transactions.insert(pos, transaction);
    }

    // ── Investments ─────────────────────────────────────────────────

    pub(crate) fn record_investment(&mut self, investment: Investment) -> Investment {
        self.investments.push(investment.clone());
        investment
    }

    /// Apply a valuation change and append its audit row.
    /// Returns `(old, new, audit)`.
    ///
    /// The audit row must describe a move *from* the position currently
    /// stored, and must continue the audit chain of this investment.
    pub(crate) fn apply_investment_value_update(
        &mut self,
        investment_id: Uuid,
        audit: InvestmentUpdate,
        total_invested_delta: f64,
        now: DateTime<Utc>,
    ) -> Result<(Investment, Investment, InvestmentUpdate), CoreError> {
        let idx = self
            .investments
            .iter()
            .position(|i| i.id == investment_id)
            .ok_or_else(|| {
                CoreError::InvalidState(format!(
                    "Investment {investment_id} was deleted before its update was applied"
                ))
            })?;

        let old = self.investments[idx].clone();
        if audit.investment_id != investment_id || audit.previous() != old.snapshot() {
            return Err(CoreError::ConsistencyViolation(format!(
                "Update for investment {investment_id} starts from {:?} but the stored position is {:?}",
                audit.previous(),
                old.snapshot()
            )));
        }
        if let Some(last) = self
            .investment_updates
            .iter()
            .rev()
            .find(|u| u.investment_id == investment_id)
        {
            if last.new_amount != audit.previous_amount {
                return Err(CoreError::ConsistencyViolation(format!(
                    "Audit chain gap on investment {investment_id}: last update ended at {}, next starts at {}",
                    last.new_amount, audit.previous_amount
                )));
            }
        }

        let investment = &mut self.investments[idx];
        investment.set_current(audit.new_amount, audit.new_exchange_rate);
        investment.total_invested += total_invested_delta;
        investment.last_updated = now;
        let new = investment.clone();

        self.investment_updates.push(audit.clone());
        Ok((old, new, audit))
    }

    pub(crate) fn investment_positions(&self) -> HashMap<Uuid, usize> {
        self.investments
            .iter()
            .enumerate()
            .map(|(idx, i)| (i.id, idx))
            .collect()
    }

    /// Re-derive the normalized figures of an investment for a new base currency.
    pub(crate) fn renormalize_investment(
        &mut self,
        positions: &HashMap<Uuid, usize>,
        investment_id: Uuid,
        initial_exchange_rate: f64,
        current_exchange_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let investment = positions
            .get(&investment_id)
            .and_then(|&idx| self.investments.get_mut(idx))
            .filter(|i| i.id == investment_id)
            .ok_or_else(|| {
                CoreError::InvalidState(format!("Investment {investment_id} vanished during rebuild"))
            })?;
        investment.initial_exchange_rate = initial_exchange_rate;
        investment.initial_amount_base = investment.initial_amount * initial_exchange_rate;
        let amount = investment.current_amount;
        investment.set_current(amount, current_exchange_rate);
        investment.last_updated = now;
        Ok(())
    }

    /// Remove an investment with its audit rows. Returns both.
    pub(crate) fn delete_investment(
        &mut self,
        investment_id: Uuid,
    ) -> Result<(Investment, Vec<InvestmentUpdate>), CoreError> {
        let idx = self
            .investments
            .iter()
            .position(|i| i.id == investment_id && i.user_id == self.user_id)
            .ok_or_else(|| CoreError::not_found("Investment", investment_id))?;
        let investment = self.investments.remove(idx);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.investment_updates)
            .into_iter()
            .partition(|u| u.investment_id == investment_id);
        self.investment_updates = kept;
        Ok((investment, removed))
    }

    // ── Aggregate primitives (rollup engine only) ───────────────────

    /// Increment-or-insert the daily row for `day`.
    pub(crate) fn upsert_month_delta(
        &mut self,
        day: CalendarDay,
        bucket: TransactionType,
        signed_amount: f64,
    ) {
        match self
            .month_history
            .binary_search_by_key(&day, MonthHistory::key)
        {
            Ok(idx) => self.month_history[idx].totals.add(bucket, signed_amount),
            Err(idx) => self.month_history.insert(
                idx,
                MonthHistory {
                    user_id: self.user_id.clone(),
                    day: day.day,
                    month: day.month,
                    year: day.year,
                    totals: BucketTotals::seeded(bucket, signed_amount),
                },
            ),
        }
    }

    /// Increment-or-insert the monthly row for `key`.
    pub(crate) fn upsert_year_delta(
        &mut self,
        key: MonthKey,
        bucket: TransactionType,
        signed_amount: f64,
    ) {
        match self
            .year_history
            .binary_search_by_key(&key, YearHistory::key)
        {
            Ok(idx) => self.year_history[idx].totals.add(bucket, signed_amount),
            Err(idx) => self.year_history.insert(
                idx,
                YearHistory {
                    user_id: self.user_id.clone(),
                    month: key.month,
                    year: key.year,
                    totals: BucketTotals::seeded(bucket, signed_amount),
                },
            ),
        }
    }

    /// Increment-or-insert the user's all-time savings row.
    pub(crate) fn upsert_cumulative_delta(&mut self, signed_amount: f64, now: DateTime<Utc>) {
        match &mut self.cumulative_savings {
            Some(row) => {
                row.total_savings += signed_amount;
                row.updated_at = now;
            }
            None => {
                self.cumulative_savings = Some(CumulativeSavings {
                    user_id: self.user_id.clone(),
                    total_savings: signed_amount,
                    updated_at: now,
                })
            }
        }
    }

    pub(crate) fn reset_cumulative_savings(&mut self, now: DateTime<Utc>) {
        self.cumulative_savings = Some(CumulativeSavings {
            user_id: self.user_id.clone(),
            total_savings: 0.0,
            updated_at: now,
        });
    }

    pub(crate) fn restore_cumulative_savings(&mut self, row: CumulativeSavings) {
        self.cumulative_savings = Some(row);
    }

    /// Delete every MonthHistory, YearHistory and CumulativeSavings row.
    pub(crate) fn clear_aggregates(&mut self) {
        self.month_history.clear();
        self.year_history.clear();
        self.cumulative_savings = None;
    }
}

/// Whether a user's ledger is being rebuilt into a new base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildState {
    Stable,
    /// Other writes for the user wait until the rebuild commits or aborts.
    Rebuilding,
}
