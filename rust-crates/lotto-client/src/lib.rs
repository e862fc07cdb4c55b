pub mod config;
pub mod fetcher;
pub mod ledger;
pub mod numbers;
pub mod orchestrator;
pub mod purchase;
pub mod resolver;
pub mod round;
pub mod ticket_cache;
pub mod winners;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
