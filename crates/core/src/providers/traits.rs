use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::CoreError;
use crate::models::money::CurrencyCode;

/// Source of fiat exchange rates.
///
/// Rates are quoted as `1 from = rate to`. Implementations may fail or hang;
/// callers go through [`RateService`](crate::services::rate_service::RateService),
/// which bounds every call and turns failures into a fallback rate.
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Latest available rate.
    async fn current_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<f64, CoreError>;

    /// Rate as of a past date.
    async fn historical_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<f64, CoreError>;
}
