//! Error types for the escrow system
//!
//! Covers the monetary invariants guarded by the escrow engine, the
//! lifecycle rules enforced by the task manager, and the ambient
//! configuration/storage failures underneath them.

use crate::models::{Amount, TaskId, UserId};
use thiserror::Error;

/// Which of an account's two balances an operation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceField {
    Balance,
    FreezeBalance,
}

impl std::fmt::Display for BalanceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Balance => f.write_str("balance"),
            Self::FreezeBalance => f.write_str("freeze_balance"),
        }
    }
}

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Spendable balance too low to cover the requested debit
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    /// Release or refund attempted on a task whose money has already moved
    #[error("Task {0} is already settled")]
    AlreadySettled(TaskId),

    /// Completion requested before a winning respond was chosen
    #[error("Choose an executor before completing task {0}")]
    NoExecutorChosen(TaskId),

    /// An account field would drop below zero (or overflow)
    #[error("Account {owner}: {field} would become negative")]
    NegativeBalance { owner: UserId, field: BalanceField },

    /// The atomic balance move did not commit; nothing was applied
    #[error("Transfer failed for task {task_id}: {reason}")]
    TransferFailed {
        task_id: TaskId,
        reason: String,
        retryable: bool,
    },

    /// State machine transition errors
    #[error("Invalid state transition: {from_state} -> {to_state}: {reason}")]
    StateTransition {
        from_state: String,
        to_state: String,
        reason: String,
    },

    /// Task validation errors
    #[error("Task validation error: {0}")]
    TaskValidation(String),

    /// Winner selection attempted twice
    #[error("Winner is already chosen for task {task_id}: {executor}")]
    WinnerAlreadyChosen { task_id: TaskId, executor: UserId },

    /// Caller lacks the role or ownership the operation requires
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Lookup misses
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage faults (ledger append, persistence)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(required: Amount, available: Amount) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Create a negative balance error
    pub fn negative_balance(owner: UserId, field: BalanceField) -> Self {
        Self::NegativeBalance { owner, field }
    }

    /// Create a transfer failure
    pub fn transfer_failed<S: Into<String>>(task_id: TaskId, reason: S, retryable: bool) -> Self {
        Self::TransferFailed {
            task_id,
            reason: reason.into(),
            retryable,
        }
    }

    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(from_state: S, to_state: S, reason: S) -> Self {
        Self::StateTransition {
            from_state: from_state.into(),
            to_state: to_state.into(),
            reason: reason.into(),
        }
    }

    /// Create a task validation error
    pub fn task_validation<S: Into<String>>(msg: S) -> Self {
        Self::TaskValidation(msg.into())
    }

    /// Create a permission error
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::Permission(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller may safely retry the same operation.
    ///
    /// Only transfer failures caused by storage faults or lock timeouts
    /// qualify; they are raised after every partial mutation was discarded.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransferFailed { retryable: true, .. })
    }
}
