use crate::errors::CoreError;
use crate::models::ledger::UserLedger;

/// Persistence collaborator for the ledger.
///
/// Data is partitioned by user. A `write` is one atomic unit: the closure
/// sees the partition as of the start of the unit, and its changes become
/// visible to other readers and writers only if it returns `Ok`. On `Err`
/// nothing it did is kept. Writes to the same partition are serialized, so
/// increments to the same history row are never lost.
pub trait LedgerStore: Send + Sync {
    fn write<T, F>(&self, user_id: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut UserLedger) -> Result<T, CoreError>;

    /// Read a consistent view of the partition. Unknown users read as empty.
    fn read<T, F>(&self, user_id: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&UserLedger) -> T;

    /// Replace a whole partition in one step (snapshot import).
    fn replace(&self, user_id: &str, ledger: UserLedger) -> Result<(), CoreError>;

    /// Owned copy of a partition.
    fn export(&self, user_id: &str) -> Result<UserLedger, CoreError> {
        self.read(user_id, UserLedger::clone)
    }
}
