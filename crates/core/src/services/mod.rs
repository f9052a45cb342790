pub mod investment_service;
pub mod rate_service;
pub mod rebuild_service;
pub mod rollup_service;
pub mod stats_service;
