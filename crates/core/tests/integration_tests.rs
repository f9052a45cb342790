// ═══════════════════════════════════════════════════════════════════
// Integration Tests — BudgetLedger end to end
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use std::sync::Arc;
use std::time::Duration;

use budget_ledger_core::config::LedgerConfig;
use budget_ledger_core::errors::CoreError;
use budget_ledger_core::models::history::Timeframe;
use budget_ledger_core::models::investment::{InvestmentValueUpdate, NewInvestment};
use budget_ledger_core::models::ledger::RebuildState;
use budget_ledger_core::models::money::CurrencyCode;
use budget_ledger_core::models::transaction::{TransactionInput, TransactionType};
use budget_ledger_core::providers::registry::RateProviderRegistry;
use budget_ledger_core::providers::traits::ExchangeRateProvider;
use budget_ledger_core::storage::encryption::KdfParams;
use budget_ledger_core::store::memory::MemoryStore;
use budget_ledger_core::BudgetLedger;

const ALICE: &str = "alice";
const BOB: &str = "bob";

// ═══════════════════════════════════════════════════════════════════
// Test Helpers
// ═══════════════════════════════════════════════════════════════════

/// Answers every pair with the same rate after a delay.
struct SlowFlatProvider {
    rate: f64,
    delay: Duration,
}

#[async_trait]
impl ExchangeRateProvider for SlowFlatProvider {
    fn name(&self) -> &str {
        "SlowFlat"
    }

    async fn current_rate(&self, _: &CurrencyCode, _: &CurrencyCode) -> Result<f64, CoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.rate)
    }

    async fn historical_rate(
        &self,
        _: &CurrencyCode,
        _: &CurrencyCode,
        _: NaiveDate,
    ) -> Result<f64, CoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.rate)
    }
}

/// KES ledger with no rate providers: only seeded rates are known.
fn offline_ledger() -> BudgetLedger {
    BudgetLedger::with_parts(
        MemoryStore::new(),
        RateProviderRegistry::new(),
        LedgerConfig::default(),
    )
}

fn slow_ledger(rate: f64, delay: Duration) -> Arc<BudgetLedger> {
    let mut registry = RateProviderRegistry::new();
    registry.register(Arc::new(SlowFlatProvider { rate, delay }));
    Arc::new(BudgetLedger::with_parts(
        MemoryStore::new(),
        registry,
        LedgerConfig::default().with_provider_timeout(Duration::from_secs(5)),
    ))
}

fn at(offset_hours: i32, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(offset_hours * 3600)
        .unwrap()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
}

fn nairobi(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
    at(3, y, m, d, 12, 0)
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn usd() -> CurrencyCode {
    CurrencyCode::usd()
}

fn kes() -> CurrencyCode {
    CurrencyCode::kes()
}

fn entry(kind: TransactionType, amount: f64, date: DateTime<FixedOffset>) -> TransactionInput {
    TransactionInput::new(kind, amount, "General", date)
}

/// (income, expense, savings, investment) of one local day.
fn day_totals(ledger: &BudgetLedger, user: &str, y: i32, m: u32, d: u32) -> (f64, f64, f64, f64) {
    let points = ledger.history(user, Timeframe::Month, y, Some(m)).unwrap();
    let p = &points[(d - 1) as usize];
    (p.income, p.expense, p.savings, p.investment)
}

fn month_totals(ledger: &BudgetLedger, user: &str, y: i32, m: u32) -> (f64, f64, f64, f64) {
    let points = ledger.history(user, Timeframe::Year, y, None).unwrap();
    let p = &points[(m - 1) as usize];
    (p.income, p.expense, p.savings, p.investment)
}

// ═══════════════════════════════════════════════════════════════════
// Transactions
// ═══════════════════════════════════════════════════════════════════

mod transactions {
    use super::*;

    #[tokio::test]
    async fn create_updates_day_and_month() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1000.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        assert_eq!(tx.amount, 1000.0);
        assert_eq!(tx.original_currency, Some(kes()));
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15), (1000.0, 0.0, 0.0, 0.0));
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3), (1000.0, 0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn edit_income_into_expense() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1000.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        ledger
            .edit_transaction(ALICE, tx.id, entry(TransactionType::Expense, 400.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15), (0.0, 400.0, 0.0, 0.0));
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3), (0.0, 400.0, 0.0, 0.0));
        assert_eq!(ledger.get_transaction(ALICE, tx.id).unwrap().amount, 400.0);
    }

    #[tokio::test]
    async fn edit_unknown_is_not_found() {
        let ledger = offline_ledger();
        let err = ledger
            .edit_transaction(ALICE, uuid::Uuid::new_v4(), entry(TransactionType::Expense, 1.0, nairobi(2024, 3, 15)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_savings_reverses_cumulative() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Savings, 200.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 200.0);

        ledger.delete_transaction(ALICE, tx.id).await.unwrap();

        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 0.0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15).2, 0.0);
    }

    #[tokio::test]
    async fn local_day_is_kept_across_utc_midnight() {
        let ledger = offline_ledger();
        // 23:30 at -05:00 is already April 1st in UTC.
        ledger
            .create_transaction(ALICE, entry(TransactionType::Expense, 50.0, at(-5, 2024, 3, 31, 23, 30)))
            .await
            .unwrap();

        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 31).1, 50.0);
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3).1, 50.0);
        assert_eq!(month_totals(&ledger, ALICE, 2024, 4).1, 0.0);
    }

    #[tokio::test]
    async fn foreign_entry_is_converted_at_its_date() {
        let ledger = offline_ledger();
        ledger
            .seed_rate(&usd(), &kes(), Some(ymd(2024, 3, 15)), 130.0)
            .unwrap();

        let tx = ledger
            .create_transaction(
                ALICE,
                entry(TransactionType::Income, 12.5, nairobi(2024, 3, 15)).with_currency(usd()),
            )
            .await
            .unwrap();

        assert_eq!(tx.amount, 1625.0);
        assert_eq!(tx.original_amount, 12.5);
        assert_eq!(tx.original_currency, Some(usd()));
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15).0, 1625.0);
    }

    #[tokio::test]
    async fn unknown_rate_does_not_block_writes() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(
                ALICE,
                entry(TransactionType::Expense, 10.0, nairobi(2024, 3, 15)).with_currency(usd()),
            )
            .await
            .unwrap();
        assert_eq!(tx.amount, 10.0);
    }

    #[tokio::test]
    async fn invalid_input_writes_nothing() {
        let ledger = offline_ledger();
        let bad = [
            entry(TransactionType::Income, 0.0, nairobi(2024, 3, 15)),
            entry(TransactionType::Income, -5.0, nairobi(2024, 3, 15)),
            entry(TransactionType::Investment, 5.0, nairobi(2024, 3, 15)),
            TransactionInput::new(TransactionType::Expense, 5.0, "   ", nairobi(2024, 3, 15)),
        ];
        for input in bad {
            let err = ledger.create_transaction(ALICE, input).await.unwrap_err();
            assert!(matches!(err, CoreError::ValidationError(_)));
        }
        assert!(ledger.history_periods(ALICE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_all_keeps_investments() {
        let ledger = offline_ledger();
        for (kind, amount) in [
            (TransactionType::Income, 900.0),
            (TransactionType::Expense, 300.0),
            (TransactionType::Savings, 100.0),
        ] {
            ledger
                .create_transaction(ALICE, entry(kind, amount, nairobi(2024, 3, 15)))
                .await
                .unwrap();
        }
        ledger
            .create_investment(ALICE, NewInvestment::new("MMF", "funds", kes(), 500.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        let removed = ledger.delete_all_transactions(ALICE).await.unwrap();

        assert_eq!(removed, 3);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 0.0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15), (0.0, 0.0, 0.0, 500.0));
        assert_eq!(ledger.investments_count(ALICE).unwrap(), 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 10.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        assert!(matches!(
            ledger.get_transaction(BOB, tx.id),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.delete_transaction(BOB, tx.id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(month_totals(&ledger, BOB, 2024, 3).0, 0.0);
    }

    #[tokio::test]
    async fn list_is_newest_first_within_range() {
        let ledger = offline_ledger();
        for day in [3, 20, 9] {
            ledger
                .create_transaction(ALICE, entry(TransactionType::Expense, 1.0, nairobi(2024, 3, day)))
                .await
                .unwrap();
        }
        ledger
            .create_transaction(ALICE, entry(TransactionType::Expense, 1.0, nairobi(2024, 4, 1)))
            .await
            .unwrap();

        let days: Vec<u32> = ledger
            .list_transactions(ALICE, ymd(2024, 3, 1), ymd(2024, 3, 31))
            .unwrap()
            .iter()
            .map(|t| chrono::Datelike::day(&t.date))
            .collect();
        assert_eq!(days, vec![20, 9, 3]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Investments
// ═══════════════════════════════════════════════════════════════════

mod investments {
    use super::*;

    fn t_bill() -> NewInvestment {
        NewInvestment::new("US T-Bill", "bonds", usd(), 100.0, nairobi(2024, 3, 1))
    }

    #[tokio::test]
    async fn capital_addition_scenario() {
        let ledger = offline_ledger();
        let inv = ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();

        let (after, audit) = ledger
            .update_investment_value(
                ALICE,
                inv.id,
                InvestmentValueUpdate::capital_addition(50.0, 150.0, nairobi(2024, 4, 1))
                    .with_exchange_rate(132.0),
            )
            .await
            .unwrap();

        assert_eq!(after.total_invested, 150.0);
        assert_eq!(audit.previous_amount, 100.0);
        assert_eq!(audit.new_amount, 150.0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 1).3, 13_000.0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 4, 1).3, 6_600.0);
        assert_eq!(ledger.investment_updates(ALICE, inv.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_is_looked_up_when_omitted() {
        let ledger = offline_ledger();
        ledger
            .seed_rate(&usd(), &kes(), Some(ymd(2024, 3, 1)), 128.0)
            .unwrap();
        ledger
            .seed_rate(&usd(), &kes(), Some(ymd(2024, 4, 1)), 129.0)
            .unwrap();

        let inv = ledger.create_investment(ALICE, t_bill()).await.unwrap();
        assert_eq!(inv.initial_exchange_rate, 128.0);
        assert_eq!(inv.initial_amount_base, 12_800.0);

        let (after, _) = ledger
            .update_investment_value(ALICE, inv.id, InvestmentValueUpdate::value_update(101.0, nairobi(2024, 4, 1)))
            .await
            .unwrap();
        assert_eq!(after.current_exchange_rate, 129.0);
    }

    #[tokio::test]
    async fn synthetic_rows_are_read_only() {
        let ledger = offline_ledger();
        let inv = ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();
        let synthetic = ledger
            .list_transactions(ALICE, ymd(2024, 3, 1), ymd(2024, 3, 1))
            .unwrap()
            .remove(0);
        assert_eq!(synthetic.investment_id, Some(inv.id));

        assert!(matches!(
            ledger.delete_transaction(ALICE, synthetic.id).await,
            Err(CoreError::ValidationError(_))
        ));
        assert!(matches!(
            ledger
                .edit_transaction(ALICE, synthetic.id, entry(TransactionType::Expense, 1.0, nairobi(2024, 3, 1)))
                .await,
            Err(CoreError::ValidationError(_))
        ));
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 1).3, 13_000.0);
    }

    #[tokio::test]
    async fn delete_removes_contributions() {
        let ledger = offline_ledger();
        let inv = ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();
        ledger.delete_investment(ALICE, inv.id).await.unwrap();

        assert_eq!(ledger.investments_count(ALICE).unwrap(), 0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 1).3, 0.0);
        assert!(matches!(
            ledger.get_investment(ALICE, inv.id),
            Err(CoreError::NotFound { kind: "Investment", .. })
        ));
        assert!(matches!(
            ledger.investment_updates(ALICE, inv.id),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_of_unknown_investment_is_not_found() {
        let ledger = offline_ledger();
        let err = ledger
            .update_investment_value(
                ALICE,
                uuid::Uuid::new_v4(),
                InvestmentValueUpdate::value_update(1.0, nairobi(2024, 4, 1)).with_exchange_rate(1.0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_newest_first_and_stats() {
        let ledger = offline_ledger();
        ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();
        ledger
            .create_investment(
                ALICE,
                NewInvestment::new("MMF", "funds", kes(), 5_000.0, nairobi(2024, 5, 1))
                    .with_current(5_400.0, 1.0),
            )
            .await
            .unwrap();

        let names: Vec<String> = ledger
            .list_investments(ALICE)
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["MMF", "US T-Bill"]);

        let stats = ledger
            .investments_stats(ALICE, ymd(2024, 5, 1), ymd(2024, 5, 31))
            .unwrap();
        assert_eq!(stats.investments_count, 2);
        assert_eq!(stats.invested_this_period, 5_000.0);
        assert_eq!(stats.total_gain_base, 400.0);
    }

    #[tokio::test]
    async fn overlapping_updates_chain_in_commit_order() {
        let ledger = slow_ledger(130.0, Duration::from_millis(300));
        let inv = ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();

        // No rate supplied: this update waits on the slow provider.
        let slow = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .update_investment_value(
                        ALICE,
                        inv.id,
                        InvestmentValueUpdate::capital_addition(50.0, 150.0, nairobi(2024, 4, 2)),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (first, _) = ledger
            .update_investment_value(
                ALICE,
                inv.id,
                InvestmentValueUpdate::capital_addition(20.0, 120.0, nairobi(2024, 4, 1))
                    .with_exchange_rate(130.0),
            )
            .await
            .unwrap();
        assert_eq!(first.current_amount, 120.0);

        let (second, audit) = slow.await.unwrap().unwrap();
        assert_eq!(audit.previous_amount, 120.0);
        assert_eq!(second.current_amount, 150.0);
        assert_eq!(second.total_invested, 170.0);

        let chain: Vec<(f64, f64)> = ledger
            .investment_updates(ALICE, inv.id)
            .unwrap()
            .iter()
            .map(|u| (u.previous_amount, u.new_amount))
            .collect();
        assert_eq!(chain, vec![(100.0, 120.0), (120.0, 150.0)]);
    }

    #[tokio::test]
    async fn update_racing_delete_is_invalid_state() {
        let ledger = slow_ledger(130.0, Duration::from_millis(300));
        let inv = ledger
            .create_investment(ALICE, t_bill().with_exchange_rate(130.0))
            .await
            .unwrap();

        let slow = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .update_investment_value(ALICE, inv.id, InvestmentValueUpdate::value_update(90.0, nairobi(2024, 4, 1)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ledger.delete_investment(ALICE, inv.id).await.unwrap();

        let err = slow.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)), "got {err:?}");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════

mod statistics {
    use super::*;

    async fn seeded() -> BudgetLedger {
        let ledger = offline_ledger();
        let rows = [
            (TransactionType::Income, 5_000.0, "Salary", nairobi(2023, 12, 28)),
            (TransactionType::Savings, 1_000.0, "Goal", nairobi(2023, 12, 29)),
            (TransactionType::Income, 4_000.0, "Salary", nairobi(2024, 1, 5)),
            (TransactionType::Expense, 700.0, "Food", nairobi(2024, 1, 6)),
            (TransactionType::Expense, 300.0, "Food", nairobi(2024, 1, 7)),
            (TransactionType::Expense, 1_500.0, "Rent", nairobi(2024, 1, 8)),
            (TransactionType::Savings, 500.0, "Goal", nairobi(2024, 1, 9)),
        ];
        for (kind, amount, category, date) in rows {
            ledger
                .create_transaction(ALICE, TransactionInput::new(kind, amount, category, date))
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn balance_with_carry_over() {
        let ledger = seeded().await;
        let stats = ledger
            .balance_for_range(ALICE, ymd(2024, 1, 1), ymd(2024, 1, 31))
            .unwrap();
        assert_eq!(stats.income, 4_000.0);
        assert_eq!(stats.expense, 2_500.0);
        assert_eq!(stats.savings, 500.0);
        assert_eq!(stats.balance_before_period, 4_000.0);
    }

    #[tokio::test]
    async fn savings_before_and_cumulative() {
        let ledger = seeded().await;
        assert_eq!(ledger.savings_before(ALICE, ymd(2024, 1, 1)).unwrap(), 1_000.0);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 1_500.0);
        assert_eq!(
            ledger.balance_before(ALICE, ymd(2024, 1, 6)).unwrap().balance_before_period,
            8_000.0
        );
    }

    #[tokio::test]
    async fn expense_categories_largest_first() {
        let ledger = seeded().await;
        let cats = ledger
            .categories_breakdown(ALICE, ymd(2024, 1, 1), ymd(2024, 1, 31), Some(TransactionType::Expense))
            .unwrap();
        let pairs: Vec<(&str, f64)> = cats.iter().map(|c| (c.category.as_str(), c.amount)).collect();
        assert_eq!(pairs, vec![("Rent", 1_500.0), ("Food", 1_000.0)]);
    }

    #[tokio::test]
    async fn periods_and_history() {
        let ledger = seeded().await;
        assert_eq!(ledger.history_periods(ALICE).unwrap(), vec![2024, 2023]);

        let year = ledger.history(ALICE, Timeframe::Year, 2023, None).unwrap();
        assert_eq!(year.len(), 12);
        assert_eq!(year[11].income, 5_000.0);
        assert_eq!(year[11].savings, 1_000.0);

        let month = ledger.history(ALICE, Timeframe::Month, 2024, Some(1)).unwrap();
        assert_eq!(month.len(), 31);
        assert_eq!(month[5].expense, 700.0);
    }

    #[tokio::test]
    async fn empty_user_reads_as_zero() {
        let ledger = offline_ledger();
        let stats = ledger
            .balance_for_range(BOB, ymd(2024, 1, 1), ymd(2024, 12, 31))
            .unwrap();
        assert_eq!(stats.income, 0.0);
        assert_eq!(stats.balance_before_period, 0.0);
        assert_eq!(ledger.cumulative_savings(BOB).unwrap(), 0.0);
        assert!(ledger.history_periods(BOB).unwrap().is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Base-Currency Rebuild
// ═══════════════════════════════════════════════════════════════════

mod rebuild {
    use super::*;

    async fn kes_user(ledger: &BudgetLedger) {
        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 13_000.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        ledger
            .create_transaction(ALICE, entry(TransactionType::Savings, 2_600.0, nairobi(2024, 3, 16)))
            .await
            .unwrap();
        for day in [15, 16] {
            ledger
                .seed_rate(&kes(), &usd(), Some(ymd(2024, 3, day)), 0.0075)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn switch_to_usd_renormalizes_history() {
        let ledger = offline_ledger();
        kes_user(&ledger).await;

        let report = ledger.change_base_currency(ALICE, usd()).await.unwrap();

        assert_eq!(report.from, kes());
        assert_eq!(report.to, usd());
        assert_eq!(report.transactions, 2);
        assert_eq!(report.fallback_rates, 0);
        assert_eq!(ledger.base_currency(ALICE).unwrap(), usd());
        assert_eq!(ledger.settings(ALICE).unwrap().unwrap().currency, usd());
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15).0, 97.5);
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3).2, 19.5);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 19.5);
        assert_eq!(ledger.rebuild_state(ALICE).unwrap(), RebuildState::Stable);
    }

    #[tokio::test]
    async fn rebuild_to_same_currency_is_idempotent() {
        let ledger = offline_ledger();
        kes_user(&ledger).await;
        let before = ledger.history(ALICE, Timeframe::Month, 2024, Some(3)).unwrap();

        ledger.change_base_currency(ALICE, kes()).await.unwrap();
        ledger.change_base_currency(ALICE, kes()).await.unwrap();

        assert_eq!(ledger.history(ALICE, Timeframe::Month, 2024, Some(3)).unwrap(), before);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 2_600.0);
    }

    #[tokio::test]
    async fn round_trip_restores_entered_amounts() {
        let ledger = offline_ledger();
        kes_user(&ledger).await;

        ledger.change_base_currency(ALICE, usd()).await.unwrap();
        ledger.change_base_currency(ALICE, kes()).await.unwrap();

        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15).0, 13_000.0);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 2_600.0);
    }

    #[tokio::test]
    async fn investments_follow_the_new_base() {
        let ledger = offline_ledger();
        ledger
            .create_investment(
                ALICE,
                NewInvestment::new("US T-Bill", "bonds", usd(), 100.0, nairobi(2024, 3, 1))
                    .with_exchange_rate(130.0),
            )
            .await
            .unwrap();

        ledger.change_base_currency(ALICE, usd()).await.unwrap();

        let inv = &ledger.list_investments(ALICE).unwrap()[0];
        assert_eq!(inv.initial_amount_base, 100.0);
        assert_eq!(inv.current_value_base, 100.0);
        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 1).3, 100.0);
    }

    #[tokio::test]
    async fn state_is_rebuilding_while_it_runs() {
        let ledger = slow_ledger(0.01, Duration::from_millis(300));
        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1_000.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();

        let rebuild = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.change_base_currency(ALICE, usd()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ledger.rebuild_state(ALICE).unwrap(), RebuildState::Rebuilding);
        assert_eq!(ledger.rebuild_state(BOB).unwrap(), RebuildState::Stable);

        // Writes wait for the rebuild and land in the new base currency.
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Expense, 5.0, nairobi(2024, 3, 20)))
            .await
            .unwrap();
        rebuild.await.unwrap().unwrap();

        assert_eq!(ledger.rebuild_state(ALICE).unwrap(), RebuildState::Stable);
        assert_eq!(tx.original_currency, Some(usd()));
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3), (10.0, 5.0, 0.0, 0.0));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Export / Import
// ═══════════════════════════════════════════════════════════════════

mod snapshots {
    use super::*;

    const PASSWORD: &str = "hunter2-but-longer";

    #[tokio::test]
    async fn encrypted_export_restores_state() {
        let ledger = offline_ledger();
        let tx = ledger
            .create_transaction(ALICE, entry(TransactionType::Savings, 300.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        let sealed = ledger
            .export_encrypted_with(ALICE, PASSWORD, KdfParams::minimal())
            .unwrap();
        let before = ledger.snapshot(ALICE).unwrap();

        ledger.delete_transaction(ALICE, tx.id).await.unwrap();
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 0.0);

        ledger.import_encrypted(ALICE, &sealed, PASSWORD).await.unwrap();
        assert_eq!(ledger.snapshot(ALICE).unwrap(), before);
        assert_eq!(ledger.cumulative_savings(ALICE).unwrap(), 300.0);
    }

    #[tokio::test]
    async fn import_into_other_user_is_rejected() {
        let ledger = offline_ledger();
        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        let sealed = ledger
            .export_encrypted_with(ALICE, PASSWORD, KdfParams::minimal())
            .unwrap();

        let err = ledger.import_encrypted(BOB, &sealed, PASSWORD).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(ledger.history_periods(BOB).unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_password_leaves_state_alone() {
        let ledger = offline_ledger();
        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        let sealed = ledger
            .export_encrypted_with(ALICE, PASSWORD, KdfParams::minimal())
            .unwrap();
        let before = ledger.snapshot(ALICE).unwrap();

        let err = ledger.import_encrypted(ALICE, &sealed, "wrong").await.unwrap_err();
        assert!(matches!(err, CoreError::Decryption));
        assert_eq!(ledger.snapshot(ALICE).unwrap(), before);
    }

    #[tokio::test]
    async fn json_export_names_the_user() {
        let ledger = offline_ledger();
        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 1.0, nairobi(2024, 3, 15)))
            .await
            .unwrap();
        let json = ledger.export_json(ALICE).unwrap();
        assert!(json.contains("\"user_id\": \"alice\""));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Concurrency & Facade
// ═══════════════════════════════════════════════════════════════════

mod facade {
    use super::*;

    #[tokio::test]
    async fn concurrent_writes_lose_no_increments() {
        let ledger = Arc::new(offline_ledger());
        let mut handles = Vec::new();
        for i in 0..40 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let kind = if i % 2 == 0 {
                    TransactionType::Income
                } else {
                    TransactionType::Expense
                };
                ledger
                    .create_transaction(ALICE, entry(kind, 10.0, nairobi(2024, 3, 15)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(day_totals(&ledger, ALICE, 2024, 3, 15), (200.0, 200.0, 0.0, 0.0));
        assert_eq!(month_totals(&ledger, ALICE, 2024, 3), (200.0, 200.0, 0.0, 0.0));
    }

    #[test]
    fn default_ledger_uses_public_providers() {
        let ledger = BudgetLedger::new();
        assert_eq!(
            ledger.rate_provider_names(),
            vec!["ExchangeRate-API", "Frankfurter"]
        );
        assert_eq!(ledger.config().default_currency, kes());
        assert_eq!(ledger.base_currency(ALICE).unwrap(), kes());
        assert!(ledger.settings(ALICE).unwrap().is_none());
    }

    #[test]
    fn rate_cache_seed_and_clear() {
        let ledger = offline_ledger();
        ledger.seed_rate(&usd(), &kes(), None, 129.0).unwrap();
        ledger
            .seed_rate(&usd(), &kes(), Some(ymd(2024, 1, 2)), 155.0)
            .unwrap();
        assert_eq!(ledger.rate_cache_len(), 2);

        assert!(ledger.seed_rate(&usd(), &kes(), None, f64::NAN).is_err());

        ledger.clear_rate_cache();
        assert_eq!(ledger.rate_cache_len(), 0);
    }

    #[test]
    fn debug_does_not_dump_ledgers() {
        let debug = format!("{:?}", offline_ledger());
        assert!(debug.contains("BudgetLedger"));
    }

    #[tokio::test]
    async fn rebuild_state_does_not_register_users() {
        let ledger = offline_ledger();
        assert_eq!(ledger.rebuild_state("ghost").unwrap(), RebuildState::Stable);
        assert!(format!("{ledger:?}").contains("active_users: 0"));

        ledger
            .create_transaction(ALICE, entry(TransactionType::Income, 10.0, nairobi(2024, 3, 1)))
            .await
            .unwrap();
        assert!(format!("{ledger:?}").contains("active_users: 1"));
    }
}
