//! Escrow Engine - balance moves tied to the task lifecycle
//!
//! Three operations move money: [`EscrowEngine::reserve`] at task creation,
//! [`EscrowEngine::release`] when a task is completed and
//! [`EscrowEngine::abandon`] when it is cancelled. Each one is a single
//! atomic unit:
//!
//! 1. the involved accounts are locked in ascending id order,
//! 2. new balances are staged on copies,
//! 3. the ledger entry is written,
//! 4. the staged balances and the task's own fields are committed.
//!
//! A failure at any step leaves accounts and task untouched. Failed transfer
//! attempts are recorded as `fail` ledger entries; pure precondition
//! rejections (already settled, insufficient funds at reserve time, forbidden
//! state edges) perform no I/O.

use crate::{
    account::Account,
    account_book::{AccountBook, AccountLocks, LockError},
    error::EscrowError,
    ledger::Ledger,
    models::{
        validate_amount, Amount, LedgerEntry, Task, TaskId, TaskStatus, TransferKind, UserId,
    },
    EscrowResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Configuration for the escrow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowEngineConfig {
    /// Upper bound on waiting for account locks, in milliseconds
    pub lock_timeout_ms: u64,
    /// Maximum task price in whole units
    pub max_task_price: Amount,
}

impl EscrowEngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EscrowEngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            max_task_price: Amount::from(9_999_999_999_i64), // ten-digit column
        }
    }
}

/// One side of a balance move
#[derive(Debug, Clone, Copy)]
enum Leg {
    DebitBalance(UserId),
    CreditBalance(UserId),
    DebitFrozen(UserId),
    CreditFrozen(UserId),
}

impl Leg {
    fn owner(&self) -> UserId {
        match *self {
            Self::DebitBalance(id)
            | Self::CreditBalance(id)
            | Self::DebitFrozen(id)
            | Self::CreditFrozen(id) => id,
        }
    }
}

/// Where a task's money currently sits, as committed by this engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscrowState {
    Reserved,
    Paid,
    Refunded,
}

/// Main escrow engine; the only writer of balances and ledger entries
pub struct EscrowEngine {
    config: EscrowEngineConfig,
    accounts: Arc<AccountBook>,
    ledger: Arc<dyn Ledger>,
    /// Committed escrow state per task; written only under the author's lock
    escrows: RwLock<HashMap<TaskId, EscrowState>>,
}

impl EscrowEngine {
    /// Create a new escrow engine with the given configuration
    pub fn new(
        config: EscrowEngineConfig,
        accounts: Arc<AccountBook>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            config,
            accounts,
            ledger,
            escrows: RwLock::new(HashMap::new()),
        }
    }

    pub fn accounts(&self) -> &Arc<AccountBook> {
        &self.accounts
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Freeze the task's price on its author's account.
    ///
    /// Called before the task is persisted. On error the caller must not
    /// persist the task.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InsufficientFunds`] when `price > author.balance`;
    ///   nothing is written.
    /// - [`EscrowError::StateTransition`] unless the task is `active`.
    /// - [`EscrowError::TaskValidation`] for a malformed or oversized price.
    /// - [`EscrowError::TransferFailed`] when the atomic move cannot commit.
    pub async fn reserve(&self, task: &mut Task) -> EscrowResult<()> {
        if task.status != TaskStatus::Active {
            return Err(EscrowError::state_transition(
                task.status.as_str(),
                TaskStatus::Active.as_str(),
                "Only new active tasks can be reserved",
            ));
        }
        task.price = validate_amount(task.price)?;
        if task.price > self.config.max_task_price {
            return Err(EscrowError::task_validation(format!(
                "Price {} exceeds maximum {}",
                task.price, self.config.max_task_price
            )));
        }

        let kind = TransferKind::Reserve;
        let mut locks = self.lock(task, kind, None, &[task.author]).await?;
        if self.escrows.read().await.contains_key(&task.id) {
            debug!(task_id = %task.id, "reserve rejected: price already frozen");
            return Err(EscrowError::state_transition(
                task.status.as_str(),
                TaskStatus::Active.as_str(),
                "Task price is already reserved",
            ));
        }

        let legs = [Leg::DebitBalance(task.author), Leg::CreditFrozen(task.author)];
        let staged = match stage(&locks, task.price, &legs) {
            Ok(staged) => staged,
            Err(err @ EscrowError::InsufficientFunds { .. }) => {
                info!(task_id = %task.id, author = %task.author, price = %task.price, "reserve rejected: {err}");
                return Err(err);
            }
            Err(err) => return Err(self.abort(task, kind, None, err.to_string(), false).await),
        };

        self.commit(task, kind, None, &mut locks, staged).await?;
        self.mark(task.id, EscrowState::Reserved).await;
        task.updated_at = Utc::now();

        info!(task_id = %task.id, author = %task.author, price = %task.price, "reserved task price");
        Ok(())
    }

    /// Pay the task's price from the author's frozen funds to `executor`
    /// and mark the task `done`.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::AlreadySettled`] when the task is already `done`;
    ///   nothing is written.
    /// - [`EscrowError::StateTransition`] for an abandoned task.
    /// - [`EscrowError::NoExecutorChosen`] when `executor` is `None`; one
    ///   `fail` entry is recorded.
    /// - [`EscrowError::TransferFailed`] when the atomic move cannot commit.
    pub async fn release(&self, task: &mut Task, executor: Option<UserId>) -> EscrowResult<()> {
        match task.status {
            TaskStatus::Done => return Err(EscrowError::AlreadySettled(task.id)),
            TaskStatus::Abandoned => {
                return Err(EscrowError::state_transition(
                    TaskStatus::Abandoned.as_str(),
                    TaskStatus::Done.as_str(),
                    "Task is in a terminal state",
                ))
            }
            TaskStatus::Active | TaskStatus::InProgress => {}
        }

        self.ensure_unsettled(task.id).await?;

        let kind = TransferKind::Payout;
        let Some(executor) = executor else {
            warn!(task_id = %task.id, "release requested without an executor");
            self.record_fail(task, kind, None).await;
            return Err(EscrowError::NoExecutorChosen(task.id));
        };

        let mut locks = self
            .lock(task, kind, Some(executor), &[task.author, executor])
            .await?;
        self.ensure_unsettled(task.id).await?;

        let legs = [Leg::DebitFrozen(task.author), Leg::CreditBalance(executor)];
        let staged = match stage(&locks, task.price, &legs) {
            Ok(staged) => staged,
            Err(err) => {
                return Err(self
                    .abort(task, kind, Some(executor), err.to_string(), false)
                    .await)
            }
        };

        self.commit(task, kind, Some(executor), &mut locks, staged)
            .await?;
        self.mark(task.id, EscrowState::Paid).await;
        let now = Utc::now();
        task.executor = Some(executor);
        task.status = TaskStatus::Done;
        task.completed_at = Some(now);
        task.updated_at = now;

        info!(task_id = %task.id, author = %task.author, %executor, price = %task.price, "released task price to executor");
        Ok(())
    }

    /// Return the task's frozen price to its author and mark it `abandoned`.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::AlreadySettled`] when the task is `done` or
    ///   `abandoned`; nothing is written.
    /// - [`EscrowError::TransferFailed`] when the atomic move cannot commit.
    pub async fn abandon(&self, task: &mut Task) -> EscrowResult<()> {
        if task.status.is_terminal() {
            return Err(EscrowError::AlreadySettled(task.id));
        }

        let kind = TransferKind::Refund;
        let mut locks = self.lock(task, kind, None, &[task.author]).await?;
        self.ensure_unsettled(task.id).await?;

        let legs = [Leg::DebitFrozen(task.author), Leg::CreditBalance(task.author)];
        let staged = match stage(&locks, task.price, &legs) {
            Ok(staged) => staged,
            Err(err) => return Err(self.abort(task, kind, None, err.to_string(), false).await),
        };

        self.commit(task, kind, None, &mut locks, staged).await?;
        self.mark(task.id, EscrowState::Refunded).await;
        task.status = TaskStatus::Abandoned;
        task.updated_at = Utc::now();

        info!(task_id = %task.id, author = %task.author, price = %task.price, "refunded abandoned task");
        Ok(())
    }

    /// Reject a task whose payout or refund has already committed,
    /// whatever the caller's copy of the task says
    async fn ensure_unsettled(&self, task_id: TaskId) -> EscrowResult<()> {
        match self.escrows.read().await.get(&task_id) {
            Some(EscrowState::Paid | EscrowState::Refunded) => {
                debug!(%task_id, "task already settled");
                Err(EscrowError::AlreadySettled(task_id))
            }
            Some(EscrowState::Reserved) | None => Ok(()),
        }
    }

    async fn mark(&self, task_id: TaskId, state: EscrowState) {
        self.escrows.write().await.insert(task_id, state);
    }

    async fn lock(
        &self,
        task: &Task,
        kind: TransferKind,
        executor: Option<UserId>,
        owners: &[UserId],
    ) -> EscrowResult<AccountLocks> {
        match self.accounts.lock(owners).await {
            Ok(locks) => Ok(locks),
            Err(err) => {
                let retryable = matches!(err, LockError::Timeout(_));
                Err(self
                    .abort(task, kind, executor, err.to_string(), retryable)
                    .await)
            }
        }
    }

    /// Write the success entry, then the staged balances
    async fn commit(
        &self,
        task: &Task,
        kind: TransferKind,
        executor: Option<UserId>,
        locks: &mut AccountLocks,
        staged: Vec<Account>,
    ) -> EscrowResult<()> {
        if let Err(err) = self
            .ledger
            .record(LedgerEntry::success(task, kind, executor))
            .await
        {
            return Err(self
                .abort(task, kind, executor, format!("ledger write failed: {err}"), true)
                .await);
        }
        locks.apply(staged);
        Ok(())
    }

    /// Record the failed attempt and build the error to surface
    async fn abort(
        &self,
        task: &Task,
        kind: TransferKind,
        executor: Option<UserId>,
        reason: String,
        retryable: bool,
    ) -> EscrowError {
        warn!(task_id = %task.id, ?kind, retryable, "transfer failed: {reason}");
        self.record_fail(task, kind, executor).await;
        EscrowError::transfer_failed(task.id, reason, retryable)
    }

    async fn record_fail(&self, task: &Task, kind: TransferKind, executor: Option<UserId>) {
        if let Err(err) = self
            .ledger
            .record(LedgerEntry::fail(task, kind, executor))
            .await
        {
            error!(task_id = %task.id, ?kind, "could not record failed transfer: {err}");
        }
    }
}

/// Apply `legs` of `price` to copies of the locked accounts
fn stage(locks: &AccountLocks, price: Amount, legs: &[Leg]) -> EscrowResult<Vec<Account>> {
    let mut staged: Vec<Account> = Vec::with_capacity(legs.len());
    for leg in legs {
        let owner = leg.owner();
        let index = match staged.iter().position(|account| account.owner() == owner) {
            Some(index) => index,
            None => {
                let account = locks
                    .staged(owner)
                    .ok_or_else(|| EscrowError::not_found(format!("Account {owner}")))?;
                staged.push(account);
                staged.len() - 1
            }
        };

        let account = &mut staged[index];
        match leg {
            Leg::DebitBalance(_) => account.debit_balance(price)?,
            Leg::CreditBalance(_) => account.credit_balance(price)?,
            Leg::DebitFrozen(_) => account.debit_frozen(price)?,
            Leg::CreditFrozen(_) => account.credit_frozen(price)?,
        }
    }
    Ok(staged)
}
