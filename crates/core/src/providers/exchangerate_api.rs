use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::traits::ExchangeRateProvider;
use crate::errors::CoreError;
use crate::models::money::CurrencyCode;

const BASE_URL: &str = "https://api.exchangerate-api.com/v4";
const PROVIDER: &str = "ExchangeRate-API";

/// exchangerate-api.com open endpoint.
///
/// Covers KES and most other fiat currencies. `/latest/{base}` returns every
/// rate against `base`; `/history/{base}/{date}` the same for a past day.
pub struct ExchangeRateApiProvider {
    client: Client,
    base_url: String,
}

impl ExchangeRateApiProvider {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

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
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(CoreError::Api {
                provider: PROVIDER.into(),
                message: format!("HTTP {} for {from}/{to}", resp.status()),
            });
        }
        let body: RatesResponse = resp.json().await.map_err(|e| CoreError::Api {
            provider: PROVIDER.into(),
            message: format!("Failed to parse response for {from}/{to}: {e}"),
        })?;

        match body.rates.get(to.as_str()).copied() {
            Some(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
            Some(rate) => Err(CoreError::Api {
                provider: PROVIDER.into(),
                message: format!("Invalid rate {rate} for {from}/{to}"),
            }),
            None => Err(CoreError::ExternalRateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("{PROVIDER} returned no rate for {to}"),
            }),
        }
    }
}

impl Default for ExchangeRateApiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl ExchangeRateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn current_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<f64, CoreError> {
        if from == to {
            return Ok(1.0);
        }
        let url = format!("{}/latest/{from}", self.base_url);
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
        let url = format!("{}/history/{from}/{}", self.base_url, date.format("%Y-%m-%d"));
        self.fetch(&url, from, to).await
    }
}
