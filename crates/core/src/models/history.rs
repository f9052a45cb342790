use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::TransactionType;

/// A local calendar date, taken from the wall clock of the offset the
/// event was recorded in. Never shifted to UTC: an expense logged at
/// 23:30 in Nairobi belongs to that day, not the next one in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarDay {
    // Field order gives chronological `Ord`.
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDay {
    pub fn from_local(date: &DateTime<FixedOffset>) -> Self {
        Self::from_naive(date.date_naive())
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    #[must_use]
    pub fn to_naive(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    #[must_use]
    pub fn month_key(self) -> MonthKey {
        MonthKey {
            year: self.year,
            month: self.month,
        }
    }
}

impl std::fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// (year, month) key of a [`YearHistory`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

/// Per-bucket sums held by every history row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub income: f64,
    pub expense: f64,
    pub savings: f64,
    #[serde(default)]
    pub investment: f64,
}

impl BucketTotals {
    /// Totals with a single bucket pre-seeded.
    pub fn seeded(bucket: TransactionType, amount: f64) -> Self {
        let mut totals = Self::default();
        totals.add(bucket, amount);
        totals
    }

    pub fn add(&mut self, bucket: TransactionType, signed_amount: f64) {
        match bucket {
            TransactionType::Income => self.income += signed_amount,
            TransactionType::Expense => self.expense += signed_amount,
            TransactionType::Savings => self.savings += signed_amount,
            TransactionType::Investment => self.investment += signed_amount,
        }
    }

    #[must_use]
    pub fn get(&self, bucket: TransactionType) -> f64 {
        match bucket {
            TransactionType::Income => self.income,
            TransactionType::Expense => self.expense,
            TransactionType::Savings => self.savings,
            TransactionType::Investment => self.investment,
        }
    }

    pub fn merge(&mut self, other: &BucketTotals) {
        self.income += other.income;
        self.expense += other.expense;
        self.savings += other.savings;
        self.investment += other.investment;
    }

    /// Money left over: income minus what went out as expense or savings.
    #[must_use]
    pub fn balance(&self) -> f64 {
        self.income - self.expense - self.savings
    }
}

/// Daily rollup, unique per (user, day, month, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthHistory {
    pub user_id: String,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub totals: BucketTotals,
}

impl MonthHistory {
    #[must_use]
    pub fn key(&self) -> CalendarDay {
        CalendarDay {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }
}

/// Monthly rollup, unique per (user, month, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearHistory {
    pub user_id: String,
    pub month: u32,
    pub year: i32,
    pub totals: BucketTotals,
}

impl YearHistory {
    #[must_use]
    pub fn key(&self) -> MonthKey {
        MonthKey {
            year: self.year,
            month: self.month,
        }
    }
}

/// All-time savings total, one row per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeSavings {
    pub user_id: String,
    pub total_savings: f64,
    pub updated_at: DateTime<Utc>,
}

/// Granularity of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// One row per month of the given year (from YearHistory).
    Year,
    /// One row per day of the given month (from MonthHistory).
    Month,
}
