use chrono::{NaiveDate, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::LedgerConfig;
use crate::errors::CoreError;
use crate::models::money::{CurrencyCode, Money};
use crate::models::rate::{RateCache, RateKey, RateQuote, RateSource};
use crate::providers::registry::RateProviderRegistry;

/// Resolves exchange rates for the ledger.
///
/// Cache strategy:
/// - **Historical dates (< today)**: fetched once, cached forever. Past rates don't change.
/// - **Today / current**: cached for the configured TTL, then refetched lazily.
///
/// Never fails: a provider error or timeout resolves to the most recent
/// known rate for the pair, or to 1.0 when nothing is known, and is logged.
/// A ledger write is never aborted because a rate was unavailable.
pub struct RateService {
    registry: RateProviderRegistry,
    cache: Arc<RwLock<RateCache>>,
    timeout: Duration,
}

impl RateService {
    pub fn new(
        registry: RateProviderRegistry,
        cache: Arc<RwLock<RateCache>>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            timeout,
        }
    }

    /// Service with a fresh cache sized by `config`.
    pub fn from_config(registry: RateProviderRegistry, config: &LedgerConfig) -> Self {
        let cache = Arc::new(RwLock::new(RateCache::new(config.current_rate_ttl)));
        Self::new(registry, cache, config.provider_timeout)
    }

    /// The shared cache, for inspection and manual seeding.
    pub fn cache(&self) -> &Arc<RwLock<RateCache>> {
        &self.cache
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.registry.provider_names()
    }

    /// Current rate `from → to`.
    pub async fn get_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> RateQuote {
        if from == to {
            return RateQuote::identity();
        }
        let key = RateKey::current(from, to);
        if let Some(rate) = self.cached(&key) {
            log::debug!("Rate cache hit for {from}/{to} (current)");
            return RateQuote {
                rate,
                source: RateSource::Cache,
            };
        }
        match self.fetch(&key).await {
            Ok(rate) => {
                self.store(key, rate);
                RateQuote {
                    rate,
                    source: RateSource::Provider,
                }
            }
            Err(e) => self.fallback(from, to, &e),
        }
    }

    /// Rate `from → to` as of `date`.
    ///
    /// Dates from today onwards use the current rate. When no provider has
    /// the historical rate, the current rate is used instead.
    pub async fn rate_as_of(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        date: NaiveDate,
    ) -> RateQuote {
        if from == to {
            return RateQuote::identity();
        }
        if date >= Utc::now().date_naive() {
            return self.get_rate(from, to).await;
        }
        let key = RateKey::historical(from, to, date);
        if let Some(rate) = self.cached(&key) {
            log::debug!("Rate cache hit for {from}/{to} on {date}");
            return RateQuote {
                rate,
                source: RateSource::Cache,
            };
        }
        match self.fetch(&key).await {
            Ok(rate) => {
                self.store(key, rate);
                RateQuote {
                    rate,
                    source: RateSource::Provider,
                }
            }
            Err(e) => {
                log::warn!(
                    "Historical rate {from}/{to} on {date} unavailable ({e}), using current rate"
                );
                self.get_rate(from, to).await
            }
        }
    }

    /// Convert `money` into `to`, using the rate for `date` (or the current rate).
    pub async fn convert(
        &self,
        money: &Money,
        to: &CurrencyCode,
        date: Option<NaiveDate>,
        round: bool,
    ) -> (Money, RateQuote) {
        let quote = match date {
            Some(date) => self.rate_as_of(&money.currency, to, date).await,
            None => self.get_rate(&money.currency, to).await,
        };
        (money.convert(quote.rate, to, round), quote)
    }

    /// Put a known rate into the cache (manual entry, offline use, tests).
    pub fn seed(&self, key: RateKey, rate: f64) -> Result<(), CoreError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Exchange rate must be a positive, finite number (got {rate})"
            )));
        }
        self.store(key, rate);
        Ok(())
    }

    fn cached(&self, key: &RateKey) -> Option<f64> {
        // The cache holds plain data, so a poisoned lock is still usable.
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    fn store(&self, key: RateKey, rate: f64) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let evicted = cache.evict_expired();
        if evicted > 0 {
            log::debug!("Evicted {evicted} expired exchange rates");
        }
        cache.insert(key, rate);
    }

    fn fallback(&self, from: &CurrencyCode, to: &CurrencyCode, error: &CoreError) -> RateQuote {
        let last_known = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_known(from, to);
        match last_known {
            Some(rate) => {
                log::warn!("Rate {from}/{to} unavailable ({error}), using last known rate {rate}");
                RateQuote {
                    rate,
                    source: RateSource::LastKnown,
                }
            }
            None => {
                log::warn!("Rate {from}/{to} unavailable ({error}), falling back to 1.0");
                RateQuote {
                    rate: 1.0,
                    source: RateSource::Fallback,
                }
            }
        }
    }

    /// Ask providers in order, each call bounded by the configured timeout.
    /// Rejects non-finite and non-positive rates.
    async fn fetch(&self, key: &RateKey) -> Result<f64, CoreError> {
        let mut last_error = None;

        for provider in self.registry.providers() {
            let call = async {
                match key.date {
                    Some(date) => provider.historical_rate(&key.from, &key.to, date).await,
                    None => provider.current_rate(&key.from, &key.to).await,
                }
            };

            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(rate)) if rate.is_finite() && rate > 0.0 => return Ok(rate),
                Ok(Ok(rate)) => {
                    last_error = Some(CoreError::Api {
                        provider: provider.name().to_string(),
                        message: format!(
                            "Invalid rate returned for {}/{}: {rate}",
                            key.from, key.to
                        ),
                    });
                }
                Ok(Err(e)) => {
                    log::debug!("{} failed for {}/{}: {e}", provider.name(), key.from, key.to);
                    last_error = Some(e);
                }
                Err(_) => {
                    last_error = Some(CoreError::ExternalRateUnavailable {
                        from: key.from.to_string(),
                        to: key.to.to_string(),
                        reason: format!("{} timed out after {:?}", provider.name(), self.timeout),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::ExternalRateUnavailable {
            from: key.from.to_string(),
            to: key.to.to_string(),
            reason: "no exchange-rate providers registered".into(),
        }))
    }
}

impl std::fmt::Debug for RateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateService")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish()
    }
}
