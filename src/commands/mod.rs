//! Command implementations for the CLI
//!
//! - start: Start the gateway server
//! - test: Test configuration validity
//! - config: Configuration display and validation
//! - quote: Price a request offline
//! - account: Manage the SQLite billing ledger

pub mod account;
pub mod config;
pub mod quote;
pub mod start;
pub mod test;
