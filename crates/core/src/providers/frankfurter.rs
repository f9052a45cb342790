use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::traits::ExchangeRateProvider;
use crate::errors::CoreError;
use crate::models::money::CurrencyCode;

const BASE_URL: &str = "https://api.frankfurter.dev/v1";
const PROVIDER: &str = "Frankfurter";

/// Frankfurter API provider (European Central Bank reference rates).
///
/// Free, no API key. Endpoints used: `/latest` and `/{date}`.
/// KES is not among the ECB currencies, so for KES-based ledgers this
/// provider only answers pairs of majors and the registry moves on.
pub struct FrankfurterProvider {
    client: Client,
    base_url: String,
}

impl FrankfurterProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the provider at another deployment (Frankfurter is self-hostable).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, url: &str, from: &CurrencyCode, to: &CurrencyCode) -> Result<f64, CoreError> {
        let resp: RatesResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: PROVIDER.into(),
                message: format!("Failed to parse response for {from}/{to}: {e}"),
            })?;

        resp.rates
            .get(to.as_str())
            .copied()
            .ok_or_else(|| CoreError::ExternalRateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("{PROVIDER} returned no rate for {to}"),
            })
    }
}

impl Default for FrankfurterProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ── Frankfurter API response types ──────────────────────────────────

#[derive(Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl ExchangeRateProvider for FrankfurterProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn current_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<f64, CoreError> {
        if from == to {
            return Ok(1.0);
        }
        let url = format!("{}/latest?base={from}&symbols={to}", self.base_url);
        self.fetch(&url, from, to).await
    }

    async fn historical_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        date: NaiveDate,
    ) -> Result<f64, CoreError> {
        if from == to {
            return Ok(1.0);
        }
        let url = format!(
            "{}/{}?base={from}&symbols={to}",
            self.base_url,
            date.format("%Y-%m-%d")
        );
        self.fetch(&url, from, to).await
    }
}
