pub mod history;
pub mod investment;
pub mod ledger;
pub mod money;
pub mod rate;
pub mod settings;
pub mod stats;
pub mod transaction;
