use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use super::rollup_service::RollupService;
use crate::errors::CoreError;
use crate::models::investment::{
    Investment, InvestmentUpdate, InvestmentValueUpdate, NewInvestment, UpdateType,
    ValuationSnapshot,
};
use crate::models::ledger::UserLedger;
use crate::models::money::Money;
use crate::models::transaction::{NormalizedEntry, Transaction, TransactionType};

/// Tracks investment positions, their audit trail, and the capital they
/// pull into the `investment` history bucket.
///
/// Rates are resolved by the caller before the store unit starts; this
/// service only does arithmetic on the partition it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvestmentService {
    rollup: RollupService,
}

impl InvestmentService {
    pub fn new(rollup: RollupService) -> Self {
        Self { rollup }
    }

    /// Record a new investment and its initial contribution.
    ///
    /// `exchange_rate` is the native → base rate at `date_invested`.
    pub fn create(
        &self,
        ledger: &mut UserLedger,
        input: NewInvestment,
        exchange_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<Investment, CoreError> {
        input.validate()?;

        let current_amount = input.current_amount.unwrap_or(input.initial_amount);
        let current_exchange_rate = input.current_exchange_rate.unwrap_or(exchange_rate);
        let investment = Investment {
            id: Uuid::new_v4(),
            user_id: ledger.user_id.clone(),
            name: input.name.trim().to_string(),
            category_id: input.category_id,
            currency: input.currency,
            initial_amount: input.initial_amount,
            initial_exchange_rate: exchange_rate,
            initial_amount_base: input.initial_amount * exchange_rate,
            current_amount,
            current_exchange_rate,
            current_value_base: current_amount * current_exchange_rate,
            total_invested: input.initial_amount,
            date_invested: input.date_invested,
            last_updated: now,
            notes: input.notes,
            created_at: now,
        };

        let investment = ledger.record_investment(investment);
        self.contribute(
            ledger,
            &investment,
            investment.initial_amount,
            exchange_rate,
            investment.date_invested,
            now,
        );
        log::debug!(
            "Created investment {} ({} {}) for {}",
            investment.id,
            investment.initial_amount,
            investment.currency,
            ledger.user_id
        );
        Ok(investment)
    }

    /// Apply a valuation change to the position currently stored.
    ///
    /// `expected` is the investment as the caller read it before resolving
    /// rates. The audit row starts from the stored position, so updates that
    /// overlapped while their rates were looked up chain in commit order.
    /// Fails with `InvalidState` if the investment was deleted meanwhile and
    /// with `ConsistencyViolation` if its currency no longer matches the one
    /// the rate was resolved for.
    pub fn update_value(
        &self,
        ledger: &mut UserLedger,
        expected: &Investment,
        update: InvestmentValueUpdate,
        exchange_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(Investment, InvestmentUpdate), CoreError> {
        update.validate()?;

        let stored = ledger.find_investment(expected.id).map_err(|_| {
            CoreError::InvalidState(format!(
                "Investment {} was deleted before its update was applied",
                expected.id
            ))
        })?;
        if stored.currency != expected.currency {
            return Err(CoreError::ConsistencyViolation(format!(
                "Investment {} is held in {} but its update was priced from {}",
                expected.id, stored.currency, expected.currency
            )));
        }
        let previous = stored.snapshot();

        let next = ValuationSnapshot {
            amount: update.new_amount,
            exchange_rate,
            value_base: update.new_amount * exchange_rate,
        };
        let (capital, total_invested_delta) = match update.update_type {
            UpdateType::CapitalAddition => {
                let capital = update.additional_capital.unwrap_or_default();
                (Some(capital), capital)
            }
            UpdateType::ValueUpdate => (None, 0.0),
        };
        let audit = InvestmentUpdate::between(
            expected.id,
            update.update_type,
            previous,
            next,
            capital,
            update.update_date,
            update.notes,
        );

        let (_, investment, audit) =
            ledger.apply_investment_value_update(expected.id, audit, total_invested_delta, now)?;

        if let Some(capital) = capital {
            self.contribute(
                ledger,
                &investment,
                capital,
                exchange_rate,
                update.update_date,
                now,
            );
        }
        Ok((investment, audit))
    }

    /// Remove an investment, its audit trail and every contribution it
    /// made to the history.
    pub fn delete(
        &self,
        ledger: &mut UserLedger,
        investment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Investment, CoreError> {
        let contributions: Vec<Uuid> = ledger
            .transactions()
            .iter()
            .filter(|t| t.investment_id == Some(investment_id))
            .map(|t| t.id)
            .collect();

        let (investment, updates) = ledger.delete_investment(investment_id)?;
        for id in contributions {
            self.rollup.remove_unchecked(ledger, id, now)?;
        }
        log::info!(
            "Deleted investment {investment_id} with {} audit rows for {}",
            updates.len(),
            ledger.user_id
        );
        Ok(investment)
    }

    /// Write the synthetic ledger row for capital moved into `investment`
    /// and roll it into the `investment` bucket.
    fn contribute(
        &self,
        ledger: &mut UserLedger,
        investment: &Investment,
        native_amount: f64,
        exchange_rate: f64,
        date: DateTime<FixedOffset>,
        now: DateTime<Utc>,
    ) -> Transaction {
        let entry = NormalizedEntry {
            amount: native_amount * exchange_rate,
            original: Money::new(native_amount, investment.currency.clone()),
            transaction_type: TransactionType::Investment,
            category: investment.category_id.clone(),
            date,
            description: investment.name.clone(),
            investment_id: Some(investment.id),
        };
        self.rollup.record(ledger, entry, now)
    }
}
