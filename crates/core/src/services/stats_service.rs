use chrono::NaiveDate;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::history::{BucketTotals, CalendarDay, MonthKey, Timeframe};
use crate::models::investment::percentage_change;
use crate::models::ledger::UserLedger;
use crate::models::stats::{
    BalanceBefore, BalanceStats, CategoryStat, HistoryPoint, InvestmentStats,
};
use crate::models::transaction::{Transaction, TransactionType};

/// Read-only queries over a user's ledger and history rows.
///
/// Range totals come from MonthHistory, never from scanning transactions.
/// Only the category breakdown and transaction listing read ledger rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsService;

impl StatsService {
    pub fn new() -> Self {
        Self
    }

    /// Income, expense and savings for `from..=to`, plus the balance carried
    /// in from everything before `from`.
    pub fn balance_for_range(
        &self,
        ledger: &UserLedger,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BalanceStats, CoreError> {
        let (from, to) = day_range(from, to)?;
        let totals = sum_rows(ledger.month_rows_between(from, to).iter().map(|r| &r.totals));
        let before = sum_rows(ledger.month_rows_before(from).iter().map(|r| &r.totals));

        Ok(BalanceStats {
            income: totals.income,
            expense: totals.expense,
            savings: totals.savings,
            balance_before_period: before.balance(),
        })
    }

    /// Balance and savings accumulated strictly before `date`.
    pub fn balance_before(&self, ledger: &UserLedger, date: NaiveDate) -> BalanceBefore {
        let before = sum_rows(
            ledger
                .month_rows_before(CalendarDay::from_naive(date))
                .iter()
                .map(|r| &r.totals),
        );
        BalanceBefore {
            balance_before_period: before.balance(),
            savings_before_period: before.savings,
        }
    }

    /// All-time savings total, 0 for a user with no savings row yet.
    pub fn cumulative_savings(&self, ledger: &UserLedger) -> f64 {
        ledger
            .cumulative_savings()
            .map(|row| row.total_savings)
            .unwrap_or_default()
    }

    /// Per (type, category) sums over `from..=to`, largest first.
    pub fn categories_breakdown(
        &self,
        ledger: &UserLedger,
        from: NaiveDate,
        to: NaiveDate,
        transaction_type: Option<TransactionType>,
    ) -> Result<Vec<CategoryStat>, CoreError> {
        let (from, to) = day_range(from, to)?;

        let mut sums: HashMap<(TransactionType, &str), f64> = HashMap::new();
        for tx in ledger.transactions() {
            let day = tx.calendar_day();
            if day < from || day > to {
                continue;
            }
            if transaction_type.is_some_and(|t| t != tx.transaction_type) {
                continue;
            }
            *sums
                .entry((tx.transaction_type, tx.category.as_str()))
                .or_default() += tx.amount;
        }

        let mut stats: Vec<CategoryStat> = sums
            .into_iter()
            .map(|((transaction_type, category), amount)| CategoryStat {
                transaction_type,
                category: category.to_string(),
                amount,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.amount
                .total_cmp(&a.amount)
                .then_with(|| a.category.cmp(&b.category))
        });
        Ok(stats)
    }

    /// Portfolio totals, with the capital contributed within `from..=to`.
    pub fn investments_stats(
        &self,
        ledger: &UserLedger,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<InvestmentStats, CoreError> {
        let (from, to) = day_range(from, to)?;

        let investments = ledger.investments();
        let total_current_value_base: f64 =
            investments.iter().map(|i| i.current_value_base).sum();
        let total_initial_amount_base: f64 =
            investments.iter().map(|i| i.initial_amount_base).sum();
        let total_gain_base = total_current_value_base - total_initial_amount_base;
        let invested_this_period = ledger
            .month_rows_between(from, to)
            .iter()
            .map(|r| r.totals.investment)
            .sum();

        Ok(InvestmentStats {
            total_current_value_base,
            total_initial_amount_base,
            total_gain_base,
            total_gain_percentage: percentage_change(total_gain_base, total_initial_amount_base),
            invested_this_period,
            investments_count: investments.len(),
        })
    }

    /// Chart rows for a year (one per month) or a month (one per day).
    /// Periods with no activity are returned as zero rows.
    pub fn history(
        &self,
        ledger: &UserLedger,
        timeframe: Timeframe,
        year: i32,
        month: Option<u32>,
    ) -> Result<Vec<HistoryPoint>, CoreError> {
        match timeframe {
            Timeframe::Year => Ok((1..=12)
                .map(|month| {
                    let totals = ledger
                        .year_row(MonthKey { year, month })
                        .map(|r| r.totals)
                        .unwrap_or_default();
                    point(year, month, None, &totals)
                })
                .collect()),
            Timeframe::Month => {
                let month = month.filter(|m| (1..=12).contains(m)).ok_or_else(|| {
                    CoreError::ValidationError(
                        "A month between 1 and 12 is required for the monthly history".into(),
                    )
                })?;
                Ok((1..=31)
                    .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                    .map(|date| {
                        let day = CalendarDay::from_naive(date);
                        let totals = ledger
                            .month_row(day)
                            .map(|r| r.totals)
                            .unwrap_or_default();
                        point(year, month, Some(day.day), &totals)
                    })
                    .collect())
            }
        }
    }

    /// Years that have history rows, newest first.
    pub fn history_periods(&self, ledger: &UserLedger) -> Vec<i32> {
        let mut years: Vec<i32> = ledger.year_history().iter().map(|r| r.year).collect();
        years.dedup();
        years.reverse();
        years
    }

    /// Transactions on local days `from..=to`, newest first.
    pub fn transactions_between(
        &self,
        ledger: &UserLedger,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, CoreError> {
        let (from, to) = day_range(from, to)?;
        Ok(ledger
            .transactions()
            .iter()
            .rev()
            .filter(|t| (from..=to).contains(&t.calendar_day()))
            .cloned()
            .collect())
    }
}

fn day_range(from: NaiveDate, to: NaiveDate) -> Result<(CalendarDay, CalendarDay), CoreError> {
    if from > to {
        return Err(CoreError::ValidationError(format!(
            "Start date {from} is after end date {to}"
        )));
    }
    Ok((CalendarDay::from_naive(from), CalendarDay::from_naive(to)))
}

fn sum_rows<'a>(rows: impl Iterator<Item = &'a BucketTotals>) -> BucketTotals {
    rows.fold(BucketTotals::default(), |mut acc, totals| {
        acc.merge(totals);
        acc
    })
}

fn point(year: i32, month: u32, day: Option<u32>, totals: &BucketTotals) -> HistoryPoint {
    HistoryPoint {
        year,
        month,
        day,
        income: totals.income,
        expense: totals.expense,
        savings: totals.savings,
        investment: totals.investment,
    }
}
