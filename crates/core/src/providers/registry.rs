use std::sync::Arc;

use super::exchangerate_api::ExchangeRateApiProvider;
use super::frankfurter::FrankfurterProvider;
use super::traits::ExchangeRateProvider;

/// Ordered list of exchange-rate providers.
///
/// Requests go to the first provider; on failure the next one is tried.
/// New providers can be registered without touching the callers.
#[derive(Clone, Default)]
pub struct RateProviderRegistry {
    providers: Vec<Arc<dyn ExchangeRateProvider>>,
}

impl RateProviderRegistry {
    /// Create an empty registry. With no providers every lookup falls back.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the public providers, KES-capable one first.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExchangeRateApiProvider::new()));
        registry.register(Arc::new(FrankfurterProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ExchangeRateProvider>) {
        self.providers.push(provider);
    }

    /// Providers in priority order.
    pub fn providers(&self) -> &[Arc<dyn ExchangeRateProvider>] {
        &self.providers
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for RateProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateProviderRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}
