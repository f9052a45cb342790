use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rate_service::RateService;
use super::rollup_service::RollupService;
use crate::errors::CoreError;
use crate::models::ledger::UserLedger;
use crate::models::money::{CurrencyCode, Money};

/// Re-normalized figures for one transaction.
#[derive(Debug, Clone, PartialEq)]
struct TransactionRate {
    id: Uuid,
    amount: f64,
    original: Money,
}

/// Re-normalized rates for one investment.
#[derive(Debug, Clone, Copy, PartialEq)]
struct InvestmentRate {
    id: Uuid,
    initial_exchange_rate: f64,
    current_exchange_rate: f64,
}

/// Everything a rebuild will write, resolved before the store unit starts
/// so no network call happens while the partition is being rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildPlan {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    transactions: Vec<TransactionRate>,
    investments: Vec<InvestmentRate>,
    fallback_rates: usize,
}

impl RebuildPlan {
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn investment_count(&self) -> usize {
        self.investments.len()
    }
}

/// Outcome of a completed base-currency rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub transactions: usize,
    pub investments: usize,
    /// Lookups that fell back to 1.0 because no rate was available.
    pub fallback_rates: usize,
}

/// Rebuilds a user's ledger in a new base currency.
///
/// Two phases:
/// 1. [`RebuildService::plan`] resolves every rate against a snapshot.
/// 2. [`RebuildService::apply`] runs inside one atomic store unit:
///    re-normalize transactions and investments, drop all history rows,
///    replay the ledger oldest first, then switch the settings currency.
///
/// The caller holds the user's exclusive gate across both phases, so no
/// other write can slip in between them.
#[derive(Debug, Clone, Copy)]
pub struct RebuildService {
    rollup: RollupService,
    round_converted_amounts: bool,
}

impl RebuildService {
    pub fn new(rollup: RollupService, round_converted_amounts: bool) -> Self {
        Self {
            rollup,
            round_converted_amounts,
        }
    }

    pub async fn plan(
        &self,
        rates: &RateService,
        snapshot: &UserLedger,
        default_currency: &CurrencyCode,
        target: CurrencyCode,
    ) -> RebuildPlan {
        let from = snapshot.base_currency(default_currency);
        let mut fallback_rates = 0;

        let mut transactions = Vec::with_capacity(snapshot.transactions().len());
        for tx in snapshot.transactions() {
            let original = tx.original_money(&from);
            let quote = rates
                .rate_as_of(&original.currency, &target, tx.date.date_naive())
                .await;
            // No rate at all: keep the entered figure rather than scale it by a guess.
            let amount = if quote.is_fallback() {
                fallback_rates += 1;
                original.amount
            } else {
                // Investment contributions are recorded unrounded, so they keep
                // matching the position's `initial_amount_base`.
                let round = self.round_converted_amounts && !tx.is_investment_contribution();
                original.convert(quote.rate, &target, round).amount
            };
            transactions.push(TransactionRate {
                id: tx.id,
                amount,
                original,
            });
        }

        let mut investments = Vec::with_capacity(snapshot.investments().len());
        for investment in snapshot.investments() {
            let initial = rates
                .rate_as_of(
                    &investment.currency,
                    &target,
                    investment.date_invested.date_naive(),
                )
                .await;
            let current = rates.get_rate(&investment.currency, &target).await;
            fallback_rates += usize::from(initial.is_fallback()) + usize::from(current.is_fallback());
            investments.push(InvestmentRate {
                id: investment.id,
                initial_exchange_rate: initial.rate,
                current_exchange_rate: current.rate,
            });
        }

        RebuildPlan {
            from,
            to: target,
            transactions,
            investments,
            fallback_rates,
        }
    }

    pub fn apply(
        &self,
        ledger: &mut UserLedger,
        plan: &RebuildPlan,
        now: DateTime<Utc>,
    ) -> Result<RebuildReport, CoreError> {
        if ledger.transactions().len() != plan.transactions.len()
            || ledger.investments().len() != plan.investments.len()
        {
            return Err(CoreError::InvalidState(format!(
                "Ledger of {} changed while its rebuild was being planned",
                ledger.user_id
            )));
        }

        let positions = ledger.transaction_positions();
        for tx in &plan.transactions {
            ledger.renormalize_transaction(&positions, tx.id, tx.amount, tx.original.clone(), now)?;
        }
        let positions = ledger.investment_positions();
        for investment in &plan.investments {
            ledger.renormalize_investment(
                &positions,
                investment.id,
                investment.initial_exchange_rate,
                investment.current_exchange_rate,
                now,
            )?;
        }

        self.rollup.replay(ledger, now);
        ledger.set_currency(plan.to.clone());

        Ok(RebuildReport {
            from: plan.from.clone(),
            to: plan.to.clone(),
            transactions: plan.transactions.len(),
            investments: plan.investments.len(),
            fallback_rates: plan.fallback_rates,
        })
    }
}
