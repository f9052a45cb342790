use serde::{Deserialize, Serialize};

use super::transaction::TransactionType;

/// Totals for a date range plus the carried-over balance before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceStats {
    pub income: f64,
    pub expense: f64,
    pub savings: f64,
    /// income − expense − savings over everything strictly before the range.
    pub balance_before_period: f64,
}

/// What was accumulated before a given date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceBefore {
    pub balance_before_period: f64,
    pub savings_before_period: f64,
}

/// Sum of one (type, category) pair over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStat {
    pub transaction_type: TransactionType,
    pub category: String,
    pub amount: f64,
}

/// Portfolio-level investment figures, all in base currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestmentStats {
    pub total_current_value_base: f64,
    pub total_initial_amount_base: f64,
    pub total_gain_base: f64,
    /// 0 when nothing has been invested.
    pub total_gain_percentage: f64,
    /// Capital contributed within the queried range.
    pub invested_this_period: f64,
    pub investments_count: usize,
}

/// One row of a history chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub year: i32,
    pub month: u32,
    /// `None` for per-month (yearly timeframe) rows.
    pub day: Option<u32>,
    pub income: f64,
    pub expense: f64,
    pub savings: f64,
    pub investment: f64,
}
