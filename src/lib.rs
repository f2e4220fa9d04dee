//! Multi-chain transaction lifecycle orchestration.
//!
//! Jobs carry Ethereum transactions from creation to a terminal status. The
//! tx-listener follows their inclusion block by block, and the tx-sentry
//! re-prices transactions that stay pending too long.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
