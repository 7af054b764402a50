//! Core data models for the escrow system
//!
//! Identifiers, the task state machine, users and their roles, bids, and
//! the ledger entry shape shared by the engine and its audit store.

use crate::{EscrowError, EscrowResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary quantity in whole currency units
pub type Amount = Decimal;

/// Validate that an amount is a non-negative whole number of units
pub fn validate_amount(value: Amount) -> EscrowResult<Amount> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EscrowError::task_validation(format!(
            "Amount {value} must not be negative"
        )));
    }
    if !value.fract().is_zero() {
        return Err(EscrowError::task_validation(format!(
            "Amount {value} must be a whole number of units"
        )));
    }
    Ok(value.trunc())
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// User (and account) identifier; its ordering is the global lock order
    UserId
);
define_id!(
    /// Task identifier
    TaskId
);
define_id!(
    /// Respond (bid) identifier
    RespondId
);

/// Task state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Open for responds; price is frozen on the author's account
    Active,
    /// A winner was chosen and is working on it
    InProgress,
    /// Executor paid; terminal
    Done,
    /// Cancelled and refunded to the author; terminal
    Abandoned,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Abandoned)
    }

    /// Check if the task still holds frozen funds
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Abandoned => "abandoned",
        }
    }

    /// Validate a state transition
    pub fn validate_transition(&self, to_state: TaskStatus) -> EscrowResult<()> {
        let valid = match (self, to_state) {
            (Self::Active, Self::InProgress) => true,
            (Self::InProgress, Self::Active) => true,
            (Self::Active, Self::Done) => true,
            (Self::InProgress, Self::Done) => true,
            (Self::Active, Self::Abandoned) => true,
            (Self::InProgress, Self::Abandoned) => true,
            (from, to) => from == &to && !from.is_terminal(),
        };

        if valid {
            Ok(())
        } else {
            Err(EscrowError::state_transition(
                self.as_str(),
                to_state.as_str(),
                if self.is_terminal() {
                    "Task is in a terminal state"
                } else {
                    "Invalid state transition"
                },
            ))
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketplace task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub author: UserId,
    pub executor: Option<UserId>,
    pub title: String,
    pub text: String,
    pub price: Amount,
    pub status: TaskStatus,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new, not yet reserved, active task
    pub fn new(author: UserId, title: String, text: String, price: Amount) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            author,
            executor: None,
            title,
            text,
            price,
            status: TaskStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// User role; checked by the task manager, never by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Author,
    #[default]
    Executor,
}

/// Marketplace user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, role: UserRole) -> Self {
        Self {
            id: UserId::new(),
            username,
            email,
            role,
            date_joined: Utc::now(),
        }
    }

    pub fn is_author(&self) -> bool {
        self.role == UserRole::Author
    }

    pub fn is_executor(&self) -> bool {
        self.role == UserRole::Executor
    }
}

/// An executor's bid on a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Respond {
    pub id: RespondId,
    pub task_id: TaskId,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
}

impl Respond {
    pub fn new(task_id: TaskId, author: UserId) -> Self {
        Self {
            id: RespondId::new(),
            task_id,
            author,
            created_at: Utc::now(),
        }
    }
}

/// Which balance movement a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// balance -> freeze_balance at task creation
    Reserve,
    /// author freeze_balance -> executor balance at completion
    Payout,
    /// freeze_balance -> balance on abandonment
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Success,
    Fail,
}

/// Immutable record of one transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub task_id: TaskId,
    pub author: UserId,
    pub executor: Option<UserId>,
    pub price: Amount,
    pub kind: TransferKind,
    pub outcome: TransferOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn for_task(
        task: &Task,
        kind: TransferKind,
        executor: Option<UserId>,
        outcome: TransferOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            author: task.author,
            executor,
            price: task.price,
            kind,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    pub fn success(task: &Task, kind: TransferKind, executor: Option<UserId>) -> Self {
        Self::for_task(task, kind, executor, TransferOutcome::Success)
    }

    pub fn fail(task: &Task, kind: TransferKind, executor: Option<UserId>) -> Self {
        Self::for_task(task, kind, executor, TransferOutcome::Fail)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TransferOutcome::Success
    }
}
