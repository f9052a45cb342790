use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::traits::LedgerStore;
use crate::errors::CoreError;
use crate::models::ledger::UserLedger;

type Partition = Arc<Mutex<UserLedger>>;

/// In-process [`LedgerStore`].
///
/// Each user's partition sits behind its own mutex, so users never contend
/// with each other. A write runs against a working copy of the partition and
/// swaps it in on success, which makes every unit all-or-nothing.
#[derive(Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every user with a partition, sorted.
    pub fn user_ids(&self) -> Result<Vec<String>, CoreError> {
        let partitions = self.partitions.read()?;
        let mut ids: Vec<String> = partitions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn existing(&self, user_id: &str) -> Result<Option<Partition>, CoreError> {
        Ok(self.partitions.read()?.get(user_id).cloned())
    }

    fn partition(&self, user_id: &str) -> Result<Partition, CoreError> {
        if let Some(partition) = self.existing(user_id)? {
            return Ok(partition);
        }
        let mut partitions = self.partitions.write()?;
        Ok(partitions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserLedger::new(user_id))))
            .clone())
    }
}

impl LedgerStore for MemoryStore {
    fn write<T, F>(&self, user_id: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut UserLedger) -> Result<T, CoreError>,
    {
        let partition = self.partition(user_id)?;
        let mut committed = partition.lock()?;
        let mut working = committed.clone();
        let out = f(&mut working)?;
        *committed = working;
        Ok(out)
    }

    fn read<T, F>(&self, user_id: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&UserLedger) -> T,
    {
        match self.existing(user_id)? {
            Some(partition) => {
                let ledger = partition.lock()?;
                Ok(f(&ledger))
            }
            None => Ok(f(&UserLedger::new(user_id))),
        }
    }

    fn replace(&self, user_id: &str, mut ledger: UserLedger) -> Result<(), CoreError> {
        ledger.user_id = user_id.to_string();
        let partition = self.partition(user_id)?;
        *partition.lock()? = ledger;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let users = self.partitions.read().map(|p| p.len()).unwrap_or_default();
        f.debug_struct("MemoryStore").field("users", &users).finish()
    }
}
