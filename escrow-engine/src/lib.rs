//! Escrow backend for a paid-task marketplace
//!
//! Authors post tasks whose price is frozen on their account, executors
//! respond, the author picks a winner, and completing the task moves the
//! frozen price to the executor exactly once. Components:
//! - [`escrow_engine`] - reserve / release / abandon, the only balance writer
//! - [`account`] and [`account_book`] - checked balances and ordered locking
//! - [`ledger`] - append-only audit log of every transfer attempt
//! - [`task_manager`] - task lifecycle, roles and responds
//! - [`node`] - composition root and read-side views

pub mod account;
pub mod account_book;
pub mod config;
pub mod error;
pub mod escrow_engine;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod node;
pub mod task_manager;

pub use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
