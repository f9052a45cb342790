use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::history::CalendarDay;
use crate::models::ledger::UserLedger;
use crate::models::transaction::{NormalizedEntry, Transaction, TransactionType};

/// Keeps MonthHistory, YearHistory and CumulativeSavings in step with the
/// ledger.
///
/// Every ledger change is turned into signed deltas on the affected history
/// rows. Nothing is recomputed from scratch except by [`RollupService::replay`].
/// All methods operate on a partition inside one atomic store unit, so a
/// failure anywhere leaves neither the ledger nor the history changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupService;

impl RollupService {
    pub fn new() -> Self {
        Self
    }

    // ── Delta primitive ─────────────────────────────────────────────

    /// Add `signed_amount` to `bucket` for the local calendar day of `date`.
    ///
    /// Touches the daily row, the monthly row and, for savings, the
    /// cumulative savings row. Missing rows are created.
    pub fn apply_delta(
        &self,
        ledger: &mut UserLedger,
        date: &DateTime<FixedOffset>,
        bucket: TransactionType,
        signed_amount: f64,
        now: DateTime<Utc>,
    ) {
        let day = CalendarDay::from_local(date);
        log::debug!(
            "Rollup delta {signed_amount:+} on {bucket} for {} at {day}",
            ledger.user_id
        );
        ledger.upsert_month_delta(day, bucket, signed_amount);
        ledger.upsert_year_delta(day.month_key(), bucket, signed_amount);
        if bucket == TransactionType::Savings {
            ledger.upsert_cumulative_delta(signed_amount, now);
        }
    }

    fn apply_transaction(&self, ledger: &mut UserLedger, tx: &Transaction, now: DateTime<Utc>) {
        self.apply_delta(ledger, &tx.date, tx.transaction_type, tx.amount, now);
    }

    fn reverse_transaction(&self, ledger: &mut UserLedger, tx: &Transaction, now: DateTime<Utc>) {
        self.apply_delta(ledger, &tx.date, tx.transaction_type, -tx.amount, now);
    }

    // ── Ledger changes ──────────────────────────────────────────────

    /// Persist a new entry and roll it up.
    pub fn record(
        &self,
        ledger: &mut UserLedger,
        entry: NormalizedEntry,
        now: DateTime<Utc>,
    ) -> Transaction {
        let tx = ledger.append_transaction(entry, now);
        self.apply_transaction(ledger, &tx, now);
        tx
    }

    /// Replace a stored transaction: reverse the old contribution, persist
    /// the new fields, then apply the new contribution.
    ///
    /// When day, type and amount are unchanged the history is left alone.
    /// Returns the updated transaction.
    pub fn correct(
        &self,
        ledger: &mut UserLedger,
        id: Uuid,
        entry: NormalizedEntry,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CoreError> {
        let existing = ledger.find_transaction(id)?;
        ensure_user_owned(existing)?;

        let (old, new) = ledger.edit_transaction(id, entry, now)?;
        let unchanged = old.calendar_day() == new.calendar_day()
            && old.transaction_type == new.transaction_type
            && old.amount.to_bits() == new.amount.to_bits();

        if !unchanged {
            self.reverse_transaction(ledger, &old, now);
            self.apply_transaction(ledger, &new, now);
        }
        Ok(new)
    }

    /// Reverse a transaction's contribution and remove it.
    pub fn remove(
        &self,
        ledger: &mut UserLedger,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CoreError> {
        ensure_user_owned(ledger.find_transaction(id)?)?;
        self.remove_unchecked(ledger, id, now)
    }

    /// Remove without the ownership check. Used for investment contributions.
    pub(crate) fn remove_unchecked(
        &self,
        ledger: &mut UserLedger,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CoreError> {
        let tx = ledger.delete_transaction(id)?;
        self.reverse_transaction(ledger, &tx, now);
        Ok(tx)
    }

    /// Remove every user-entered transaction, reversing each one, then
    /// reset cumulative savings to zero. Investment contributions stay.
    /// Returns how many rows were removed.
    pub fn remove_all(&self, ledger: &mut UserLedger, now: DateTime<Utc>) -> usize {
        let ids: Vec<Uuid> = ledger
            .transactions()
            .iter()
            .filter(|t| !t.is_investment_contribution())
            .map(|t| t.id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if let Ok(tx) = ledger.delete_transaction(id) {
                self.reverse_transaction(ledger, &tx, now);
                removed += 1;
            }
        }
        ledger.reset_cumulative_savings(now);
        removed
    }

    /// Drop every history row and rebuild them from the stored ledger,
    /// oldest transaction first.
    ///
    /// The cumulative savings row keeps its `updated_at` when the replayed
    /// total equals the stored one.
    pub fn replay(&self, ledger: &mut UserLedger, now: DateTime<Utc>) {
        let previous = ledger.cumulative_savings().cloned();
        ledger.clear_aggregates();
        let transactions = ledger.transactions().to_vec();
        for tx in &transactions {
            self.apply_transaction(ledger, tx, now);
        }
        if ledger.cumulative_savings().is_none() {
            ledger.reset_cumulative_savings(now);
        }

        if let Some(previous) = previous {
            let unchanged = ledger
                .cumulative_savings()
                .is_some_and(|row| row.total_savings.to_bits() == previous.total_savings.to_bits());
            if unchanged {
                ledger.restore_cumulative_savings(previous);
            }
        }
    }
}

fn ensure_user_owned(tx: &Transaction) -> Result<(), CoreError> {
    match tx.investment_id {
        Some(investment_id) => Err(CoreError::ValidationError(format!(
            "Transaction {} belongs to investment {investment_id}; change it through the investment",
            tx.id
        ))),
        None => Ok(()),
    }
}

