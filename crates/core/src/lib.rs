pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;
pub mod store;

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use config::LedgerConfig;
use errors::CoreError;
use models::{
    history::Timeframe,
    investment::{Investment, InvestmentUpdate, InvestmentValueUpdate, NewInvestment},
    ledger::{RebuildState, UserLedger},
    money::{CurrencyCode, Money},
    rate::RateKey,
    settings::UserSettings,
    stats::{BalanceBefore, BalanceStats, CategoryStat, HistoryPoint, InvestmentStats},
    transaction::{NormalizedEntry, Transaction, TransactionInput, TransactionType},
};
use providers::registry::RateProviderRegistry;
use services::{
    investment_service::InvestmentService,
    rate_service::RateService,
    rebuild_service::{RebuildReport, RebuildService},
    rollup_service::RollupService,
    stats_service::StatsService,
};
use storage::{
    encryption::KdfParams,
    manager::{LedgerSnapshot, SnapshotArchive},
};
use store::{memory::MemoryStore, traits::LedgerStore};

/// Per-user write gate.
///
/// Ordinary writes hold it shared; the base-currency rebuild holds it
/// exclusively, so nothing else writes to that user while the ledger is
/// being re-normalized. Reads never take it: they see the last committed
/// state of the partition.
#[derive(Default)]
struct UserGate {
    lock: tokio::sync::RwLock<()>,
    rebuilding: AtomicBool,
}

/// Clears the rebuilding flag however the rebuild ends.
struct RebuildFlag<'a>(&'a AtomicBool);

impl<'a> RebuildFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RebuildFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Main entry point for the Budget Ledger core library.
///
/// Owns the store, the exchange-rate service and the engines that keep
/// every user's history rows consistent with their ledger. All operations
/// are scoped to a `user_id`.
#[must_use]
pub struct BudgetLedger<S: LedgerStore = MemoryStore> {
    config: LedgerConfig,
    store: S,
    rates: RateService,
    rollup: RollupService,
    investments: InvestmentService,
    rebuild: RebuildService,
    stats: StatsService,
    gates: Mutex<HashMap<String, Arc<UserGate>>>,
}

impl<S: LedgerStore> std::fmt::Debug for BudgetLedger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let users = self
            .gates
            .lock()
            .map(|g| g.len())
            .unwrap_or_default();
        f.debug_struct("BudgetLedger")
            .field("config", &self.config)
            .field("rates", &self.rates)
            .field("active_users", &users)
            .finish()
    }
}

impl BudgetLedger<MemoryStore> {
    /// In-memory ledger with default config and the public rate providers.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::with_parts(
            MemoryStore::new(),
            RateProviderRegistry::new_with_defaults(),
            config,
        )
    }
}

impl Default for BudgetLedger<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LedgerStore> BudgetLedger<S> {
    pub fn with_parts(store: S, registry: RateProviderRegistry, config: LedgerConfig) -> Self {
        let rollup = RollupService::new();
        Self {
            rates: RateService::from_config(registry, &config),
            rollup,
            investments: InvestmentService::new(rollup),
            rebuild: RebuildService::new(rollup, config.round_converted_amounts),
            stats: StatsService::new(),
            store,
            config,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rate_service(&self) -> &RateService {
        &self.rates
    }

    fn gate(&self, user_id: &str) -> Result<Arc<UserGate>, CoreError> {
        let mut gates = self.gates.lock()?;
        Ok(gates.entry(user_id.to_string()).or_default().clone())
    }

    // ── Settings ────────────────────────────────────────────────────

    /// The user's base currency (settings, else the configured default).
    pub fn base_currency(&self, user_id: &str) -> Result<CurrencyCode, CoreError> {
        self.store
            .read(user_id, |l| l.base_currency(&self.config.default_currency))
    }

    pub fn settings(&self, user_id: &str) -> Result<Option<UserSettings>, CoreError> {
        self.store.read(user_id, |l| l.settings().cloned())
    }

    /// Switch the user's base currency and rebuild their whole ledger in it.
    ///
    /// Every transaction is re-normalized with the historical rate of its
    /// local date, investments are re-priced, and all history rows are
    /// rebuilt from scratch. Other writes for this user wait until it is
    /// done. On failure nothing changes.
    pub async fn change_base_currency(
        &self,
        user_id: &str,
        currency: CurrencyCode,
    ) -> Result<RebuildReport, CoreError> {
        let gate = self.gate(user_id)?;
        let _exclusive = gate.lock.write().await;
        let _flag = RebuildFlag::raise(&gate.rebuilding);

        let snapshot = self.store.export(user_id)?;
        log::info!(
            "Rebuilding ledger of {user_id} into {currency}: {} transactions, {} investments",
            snapshot.transactions().len(),
            snapshot.investments().len()
        );

        let plan = self
            .rebuild
            .plan(&self.rates, &snapshot, &self.config.default_currency, currency)
            .await;
        let now = Utc::now();
        let result = self
            .store
            .write(user_id, |ledger| self.rebuild.apply(ledger, &plan, now));

        match &result {
            Ok(report) => log::info!(
                "Rebuilt ledger of {user_id} from {} to {} ({} fallback rates)",
                report.from,
                report.to,
                report.fallback_rates
            ),
            Err(e) => log::error!("Rebuild of {user_id} aborted, nothing committed: {e}"),
        }
        result
    }

    /// Read-only: users without a gate have never written and are `Stable`.
    pub fn rebuild_state(&self, user_id: &str) -> Result<RebuildState, CoreError> {
        let rebuilding = self
            .gates
            .lock()?
            .get(user_id)
            .is_some_and(|gate| gate.rebuilding.load(Ordering::SeqCst));
        Ok(if rebuilding {
            RebuildState::Rebuilding
        } else {
            RebuildState::Stable
        })
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Record an income, expense or savings entry and roll it up.
    pub async fn create_transaction(
        &self,
        user_id: &str,
        input: TransactionInput,
    ) -> Result<Transaction, CoreError> {
        input.validate()?;
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let base = self.base_currency(user_id)?;
        let entry = self.normalize(input, &base).await;
        let now = Utc::now();
        self.store
            .write(user_id, |ledger| Ok(self.rollup.record(ledger, entry, now)))
    }

    /// Replace the fields of a transaction, moving its contribution from the
    /// old day/bucket to the new one.
    pub async fn edit_transaction(
        &self,
        user_id: &str,
        id: Uuid,
        input: TransactionInput,
    ) -> Result<Transaction, CoreError> {
        input.validate()?;
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        // Fail before any rate lookup if the row is missing.
        self.store
            .read(user_id, |l| l.find_transaction(id).map(|_| ()))??;

        let base = self.base_currency(user_id)?;
        let entry = self.normalize(input, &base).await;
        let now = Utc::now();
        self.store
            .write(user_id, |ledger| self.rollup.correct(ledger, id, entry, now))
    }

    pub async fn delete_transaction(&self, user_id: &str, id: Uuid) -> Result<Transaction, CoreError> {
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let now = Utc::now();
        self.store
            .write(user_id, |ledger| self.rollup.remove(ledger, id, now))
    }

    /// Delete every income, expense and savings entry of the user and reset
    /// their cumulative savings. Investments are not touched.
    pub async fn delete_all_transactions(&self, user_id: &str) -> Result<usize, CoreError> {
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let now = Utc::now();
        let removed = self
            .store
            .write(user_id, |ledger| Ok(self.rollup.remove_all(ledger, now)))?;
        log::info!("Deleted {removed} transactions for {user_id}");
        Ok(removed)
    }

    pub fn get_transaction(&self, user_id: &str, id: Uuid) -> Result<Transaction, CoreError> {
        self.store
            .read(user_id, |l| l.find_transaction(id).cloned())?
    }

    /// Transactions on local days `from..=to`, newest first.
    pub fn list_transactions(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.store
            .read(user_id, |l| self.stats.transactions_between(l, from, to))?
    }

    async fn normalize(&self, input: TransactionInput, base: &CurrencyCode) -> NormalizedEntry {
        let currency = input.currency.unwrap_or_else(|| base.clone());
        let original = Money::new(input.amount, currency);
        let (converted, _) = self
            .rates
            .convert(
                &original,
                base,
                Some(input.date.date_naive()),
                self.config.round_converted_amounts,
            )
            .await;

        NormalizedEntry {
            amount: converted.amount,
            original,
            transaction_type: input.transaction_type,
            category: input.category.trim().to_string(),
            date: input.date,
            description: input.description.unwrap_or_default(),
            investment_id: None,
        }
    }

    // ── Investments ─────────────────────────────────────────────────

    /// Record a new investment. Its initial amount is added to the
    /// `investment` history bucket on `date_invested`.
    pub async fn create_investment(
        &self,
        user_id: &str,
        input: NewInvestment,
    ) -> Result<Investment, CoreError> {
        input.validate()?;
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let base = self.base_currency(user_id)?;
        let rate = match input.exchange_rate {
            Some(rate) => rate,
            None => {
                self.rates
                    .rate_as_of(&input.currency, &base, input.date_invested.date_naive())
                    .await
                    .rate
            }
        };
        let now = Utc::now();
        self.store.write(user_id, |ledger| {
            self.investments.create(ledger, input, rate, now)
        })
    }

    /// Revalue an investment or add capital to it, appending an audit row.
    pub async fn update_investment_value(
        &self,
        user_id: &str,
        investment_id: Uuid,
        update: InvestmentValueUpdate,
    ) -> Result<(Investment, InvestmentUpdate), CoreError> {
        update.validate()?;
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let expected = self.get_investment(user_id, investment_id)?;
        let rate = match update.exchange_rate {
            Some(rate) => rate,
            None => {
                let base = self.base_currency(user_id)?;
                self.rates
                    .rate_as_of(&expected.currency, &base, update.update_date.date_naive())
                    .await
                    .rate
            }
        };
        let now = Utc::now();
        let result = self.store.write(user_id, |ledger| {
            self.investments
                .update_value(ledger, &expected, update, rate, now)
        });
        if let Err(e @ (CoreError::ConsistencyViolation(_) | CoreError::InvalidState(_))) = &result {
            log::error!("Update of investment {investment_id} for {user_id} aborted: {e}");
        }
        result
    }

    /// Remove an investment, its audit trail and its history contributions.
    pub async fn delete_investment(
        &self,
        user_id: &str,
        investment_id: Uuid,
    ) -> Result<Investment, CoreError> {
        let gate = self.gate(user_id)?;
        let _shared = gate.lock.read().await;

        let now = Utc::now();
        self.store.write(user_id, |ledger| {
            self.investments.delete(ledger, investment_id, now)
        })
    }

    pub fn get_investment(&self, user_id: &str, investment_id: Uuid) -> Result<Investment, CoreError> {
        self.store
            .read(user_id, |l| l.find_investment(investment_id).cloned())?
    }

    /// All investments, most recently invested first.
    pub fn list_investments(&self, user_id: &str) -> Result<Vec<Investment>, CoreError> {
        self.store.read(user_id, |l| {
            let mut investments = l.investments().to_vec();
            investments.sort_by(|a, b| b.date_invested.cmp(&a.date_invested));
            investments
        })
    }

    pub fn investments_count(&self, user_id: &str) -> Result<usize, CoreError> {
        self.store.read(user_id, |l| l.investments().len())
    }

    /// Audit rows of one investment, in the order they were applied.
    pub fn investment_updates(
        &self,
        user_id: &str,
        investment_id: Uuid,
    ) -> Result<Vec<InvestmentUpdate>, CoreError> {
        self.store.read(user_id, |l| -> Result<Vec<InvestmentUpdate>, CoreError> {
            l.find_investment(investment_id)?;
            Ok(l.investment_updates()
                .iter()
                .filter(|u| u.investment_id == investment_id)
                .cloned()
                .collect())
        })?
    }

    // ── Statistics ──────────────────────────────────────────────────

    pub fn balance_for_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BalanceStats, CoreError> {
        self.store
            .read(user_id, |l| self.stats.balance_for_range(l, from, to))?
    }

    pub fn balance_before(&self, user_id: &str, date: NaiveDate) -> Result<BalanceBefore, CoreError> {
        self.store.read(user_id, |l| self.stats.balance_before(l, date))
    }

    pub fn savings_before(&self, user_id: &str, date: NaiveDate) -> Result<f64, CoreError> {
        Ok(self.balance_before(user_id, date)?.savings_before_period)
    }

    pub fn cumulative_savings(&self, user_id: &str) -> Result<f64, CoreError> {
        self.store.read(user_id, |l| self.stats.cumulative_savings(l))
    }

    pub fn categories_breakdown(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        transaction_type: Option<TransactionType>,
    ) -> Result<Vec<CategoryStat>, CoreError> {
        self.store.read(user_id, |l| {
            self.stats
                .categories_breakdown(l, from, to, transaction_type)
        })?
    }

    pub fn investments_stats(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<InvestmentStats, CoreError> {
        self.store
            .read(user_id, |l| self.stats.investments_stats(l, from, to))?
    }

    pub fn history(
        &self,
        user_id: &str,
        timeframe: Timeframe,
        year: i32,
        month: Option<u32>,
    ) -> Result<Vec<HistoryPoint>, CoreError> {
        self.store
            .read(user_id, |l| self.stats.history(l, timeframe, year, month))?
    }

    pub fn history_periods(&self, user_id: &str) -> Result<Vec<i32>, CoreError> {
        self.store.read(user_id, |l| self.stats.history_periods(l))
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Owned copy of the user's whole partition.
    pub fn snapshot(&self, user_id: &str) -> Result<UserLedger, CoreError> {
        self.store.export(user_id)
    }

    pub fn export_encrypted(&self, user_id: &str, password: &str) -> Result<Vec<u8>, CoreError> {
        self.export_encrypted_with(user_id, password, KdfParams::default())
    }

    pub fn export_encrypted_with(
        &self,
        user_id: &str,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Vec<u8>, CoreError> {
        let snapshot = LedgerSnapshot::new(self.store.export(user_id)?);
        SnapshotArchive::seal_with(&snapshot, password, kdf)
    }

    pub fn export_json(&self, user_id: &str) -> Result<String, CoreError> {
        SnapshotArchive::to_json(&LedgerSnapshot::new(self.store.export(user_id)?))
    }

    /// Replace the user's partition with an encrypted snapshot of the same user.
    pub async fn import_encrypted(
        &self,
        user_id: &str,
        data: &[u8],
        password: &str,
    ) -> Result<(), CoreError> {
        let snapshot = SnapshotArchive::open(data, password)?;
        if snapshot.ledger.user_id != user_id {
            return Err(CoreError::ValidationError(format!(
                "Snapshot belongs to user {}, not {user_id}",
                snapshot.ledger.user_id
            )));
        }

        let gate = self.gate(user_id)?;
        let _exclusive = gate.lock.write().await;
        self.store.replace(user_id, snapshot.ledger)?;
        log::info!(
            "Imported snapshot for {user_id} exported at {}",
            snapshot.exported_at
        );
        Ok(())
    }

    // ── Exchange Rates ──────────────────────────────────────────────

    pub fn rate_provider_names(&self) -> Vec<String> {
        self.rates.provider_names()
    }

    pub fn rate_cache_len(&self) -> usize {
        self.rates
            .cache()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_rate_cache(&self) {
        self.rates
            .cache()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Cache a known rate. `date = None` sets the current rate.
    pub fn seed_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        date: Option<NaiveDate>,
        rate: f64,
    ) -> Result<(), CoreError> {
        let key = match date {
            Some(date) => RateKey::historical(from, to, date),
            None => RateKey::current(from, to),
        };
        self.rates.seed(key, rate)
    }
}
