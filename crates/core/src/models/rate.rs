use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::money::CurrencyCode;

/// Cache key: (from, to, date). `date == None` is the "current" rate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub date: Option<NaiveDate>,
}

impl RateKey {
    pub fn current(from: &CurrencyCode, to: &CurrencyCode) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            date: None,
        }
    }

    pub fn historical(from: &CurrencyCode, to: &CurrencyCode, date: NaiveDate) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            date: Some(date),
        }
    }
}

/// Where a rate handed to the ledger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSource {
    /// Same currency on both sides.
    Identity,
    /// Fresh from a provider.
    Provider,
    /// Served from the cache.
    Cache,
    /// Providers failed; the most recent known rate for the pair was used.
    LastKnown,
    /// Providers failed and nothing was known; rate forced to 1.
    Fallback,
}

/// A resolved exchange rate: `1 from = rate to`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub rate: f64,
    pub source: RateSource,
}

impl RateQuote {
    pub fn identity() -> Self {
        Self {
            rate: 1.0,
            source: RateSource::Identity,
        }
    }

    /// `true` when no provider or cached value backed this rate.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == RateSource::Fallback
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: f64,
    fetched_at: Instant,
}

/// In-process exchange-rate cache.
///
/// - Historical entries (`date = Some`) are immutable and never expire.
/// - Current entries expire `ttl` after they were fetched and are refetched
///   lazily on the next request.
/// - `last_known` remembers the most recent rate seen for each pair, used as
///   the fallback when providers are down. A current rate always replaces a
///   historical one; a historical one only replaces an older date.
#[derive(Debug)]
pub struct RateCache {
    ttl: Duration,
    entries: HashMap<RateKey, CachedRate>,
    last_known: HashMap<(CurrencyCode, CurrencyCode), KnownRate>,
}

#[derive(Debug, Clone, Copy)]
struct KnownRate {
    date: Option<NaiveDate>,
    rate: f64,
}

impl KnownRate {
    /// `None` dates are current rates and outrank every historical one.
    fn is_superseded_by(&self, date: Option<NaiveDate>) -> bool {
        match (self.date, date) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(seen), Some(date)) => date >= seen,
        }
    }
}

impl RateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            last_known: HashMap::new(),
        }
    }

    /// Cached rate for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &RateKey) -> Option<f64> {
        let cached = self.entries.get(key)?;
        if key.date.is_none() && cached.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(cached.rate)
    }

    pub fn insert(&mut self, key: RateKey, rate: f64) {
        let pair = (key.from.clone(), key.to.clone());
        if self
            .last_known
            .get(&pair)
            .map_or(true, |known| known.is_superseded_by(key.date))
        {
            self.last_known.insert(
                pair,
                KnownRate {
                    date: key.date,
                    rate,
                },
            );
        }
        self.entries.insert(
            key,
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
    }

    /// The most recent rate seen for this pair, regardless of expiry.
    pub fn last_known(&self, from: &CurrencyCode, to: &CurrencyCode) -> Option<f64> {
        self.last_known
            .get(&(from.clone(), to.clone()))
            .map(|known| known.rate)
    }

    /// Drop expired current-rate entries. Returns how many were removed.
    pub fn evict_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|key, cached| key.date.is_some() || cached.fetched_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_known.clear();
    }
}
