// ═══════════════════════════════════════════════════════════════════
// Provider Tests — Registry ordering, Frankfurter, ExchangeRate-API
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use budget_ledger_core::errors::CoreError;
use budget_ledger_core::models::money::CurrencyCode;
use budget_ledger_core::providers::exchangerate_api::ExchangeRateApiProvider;
use budget_ledger_core::providers::frankfurter::FrankfurterProvider;
use budget_ledger_core::providers::registry::RateProviderRegistry;
use budget_ledger_core::providers::traits::ExchangeRateProvider;

// Nothing listens on the discard port, so requests fail fast without network.
const UNREACHABLE: &str = "http://127.0.0.1:9";

// ═══════════════════════════════════════════════════════════════════
// Test Helpers — Mock Provider
// ═══════════════════════════════════════════════════════════════════

struct NamedProvider(&'static str);

#[async_trait]
impl ExchangeRateProvider for NamedProvider {
    fn name(&self) -> &str {
        self.0
    }

    async fn current_rate(&self, _: &CurrencyCode, _: &CurrencyCode) -> Result<f64, CoreError> {
        Ok(1.0)
    }

    async fn historical_rate(
        &self,
        _: &CurrencyCode,
        _: &CurrencyCode,
        _: NaiveDate,
    ) -> Result<f64, CoreError> {
        Ok(1.0)
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════

mod registry {
    use super::*;

    #[test]
    fn empty_registry() {
        let registry = RateProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.provider_names().is_empty());
    }

    #[test]
    fn keeps_registration_order() {
        let mut registry = RateProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("first")));
        registry.register(Arc::new(NamedProvider("second")));
        assert_eq!(registry.provider_names(), vec!["first", "second"]);
        assert_eq!(registry.providers().len(), 2);
    }

    #[test]
    fn defaults_put_kes_capable_provider_first() {
        let registry = RateProviderRegistry::new_with_defaults();
        assert_eq!(
            registry.provider_names(),
            vec!["ExchangeRate-API", "Frankfurter"]
        );
    }

    #[test]
    fn debug_lists_provider_names() {
        let mut registry = RateProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("mock")));
        let debug = format!("{registry:?}");
        assert!(debug.contains("mock"));
    }

    #[test]
    fn clones_share_providers() {
        let mut registry = RateProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("mock")));
        let clone = registry.clone();
        assert!(Arc::ptr_eq(&registry.providers()[0], &clone.providers()[0]));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Frankfurter
// ═══════════════════════════════════════════════════════════════════

mod frankfurter {
    use super::*;

    #[tokio::test]
    async fn same_currency_needs_no_request() {
        let provider = FrankfurterProvider::with_base_url(UNREACHABLE);
        let usd = CurrencyCode::usd();
        assert_eq!(provider.current_rate(&usd, &usd).await.unwrap(), 1.0);
        assert_eq!(provider.historical_rate(&usd, &usd, day()).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let provider = FrankfurterProvider::with_base_url(UNREACHABLE);
        let err = provider
            .current_rate(&CurrencyCode::usd(), &CurrencyCode::parse("EUR").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Network(_)), "got {err:?}");
    }

    #[test]
    fn name() {
        assert_eq!(FrankfurterProvider::new().name(), "Frankfurter");
    }
}

// ═══════════════════════════════════════════════════════════════════
// ExchangeRate-API
// ═══════════════════════════════════════════════════════════════════

mod exchangerate_api {
    use super::*;

    #[tokio::test]
    async fn same_currency_needs_no_request() {
        let provider = ExchangeRateApiProvider::with_base_url(UNREACHABLE);
        let kes = CurrencyCode::kes();
        assert_eq!(provider.current_rate(&kes, &kes).await.unwrap(), 1.0);
        assert_eq!(provider.historical_rate(&kes, &kes, day()).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let provider = ExchangeRateApiProvider::with_base_url(UNREACHABLE);
        let err = provider
            .historical_rate(&CurrencyCode::usd(), &CurrencyCode::kes(), day())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Network(_)), "got {err:?}");
    }

    #[test]
    fn name() {
        assert_eq!(ExchangeRateApiProvider::new().name(), "ExchangeRate-API");
    }
}
