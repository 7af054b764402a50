//! Account Book - owns every user's [`Account`] behind its own lock
//!
//! Balance mutations go through [`AccountBook::lock`], which acquires the
//! requested accounts in ascending [`UserId`] order under one deadline. Two
//! settlements touching the same pair of users in opposite roles therefore
//! queue instead of deadlocking.

use crate::{
    account::Account,
    error::EscrowError,
    models::{Amount, UserId},
    EscrowResult,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{Mutex, OwnedMutexGuard, RwLock},
    time::Instant,
};
use tracing::{debug, info};

/// Failures while acquiring account locks
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("account {0} does not exist")]
    UnknownAccount(UserId),

    #[error("timed out waiting for account {0}")]
    Timeout(UserId),
}

impl From<LockError> for EscrowError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::UnknownAccount(id) => EscrowError::not_found(format!("Account {id}")),
            LockError::Timeout(_) => EscrowError::storage(err.to_string()),
        }
    }
}

pub struct AccountBook {
    accounts: RwLock<HashMap<UserId, Arc<Mutex<Account>>>>,
    lock_timeout: Duration,
}

/// Exclusive hold on a set of accounts, released on drop
pub struct AccountLocks {
    guards: Vec<OwnedMutexGuard<Account>>,
}

impl AccountLocks {
    /// Copy of the locked account, for staging changes
    pub fn staged(&self, owner: UserId) -> Option<Account> {
        self.guards
            .iter()
            .find(|guard| guard.owner() == owner)
            .map(|guard| (**guard).clone())
    }

    /// Write staged accounts back; accounts not held by this lock are ignored
    pub fn apply(&mut self, staged: impl IntoIterator<Item = Account>) {
        for account in staged {
            if let Some(guard) = self
                .guards
                .iter_mut()
                .find(|guard| guard.owner() == account.owner())
            {
                **guard = account;
            }
        }
    }
}

impl AccountBook {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Open a zero-balance account; returns the existing one if already open
    pub async fn open(&self, owner: UserId) -> Account {
        let handle = {
            let mut accounts = self.accounts.write().await;
            accounts
                .entry(owner)
                .or_insert_with(|| {
                    debug!(%owner, "opened account");
                    Arc::new(Mutex::new(Account::new(owner)))
                })
                .clone()
        };
        let account = handle.lock().await.clone();
        account
    }

    /// Current state of an account
    pub async fn snapshot(&self, owner: UserId) -> EscrowResult<Account> {
        let handle = self.handle(owner).await?;
        let account = handle.lock().await.clone();
        Ok(account)
    }

    /// Administrative top-up of the spendable balance
    pub async fn deposit(&self, owner: UserId, amount: Amount) -> EscrowResult<Account> {
        let mut locks = self.lock(&[owner]).await?;
        let mut account = locks
            .staged(owner)
            .ok_or_else(|| EscrowError::not_found(format!("Account {owner}")))?;
        account.credit_balance(amount)?;
        locks.apply([account.clone()]);

        info!(%owner, %amount, balance = %account.balance(), "deposited funds");
        Ok(account)
    }

    /// Lock the given accounts in ascending id order.
    ///
    /// Duplicate ids are locked once. The whole acquisition shares one
    /// deadline of `lock_timeout`.
    pub async fn lock(&self, owners: &[UserId]) -> Result<AccountLocks, LockError> {
        let mut ordered = owners.to_vec();
        ordered.sort();
        ordered.dedup();

        let handles = {
            let accounts = self.accounts.read().await;
            ordered
                .iter()
                .map(|id| {
                    accounts
                        .get(id)
                        .cloned()
                        .map(|handle| (*id, handle))
                        .ok_or(LockError::UnknownAccount(*id))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let deadline = Instant::now() + self.lock_timeout;
        let mut guards = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let guard = tokio::time::timeout_at(deadline, handle.lock_owned())
                .await
                .map_err(|_| LockError::Timeout(id))?;
            guards.push(guard);
        }

        Ok(AccountLocks { guards })
    }

    async fn handle(&self, owner: UserId) -> EscrowResult<Arc<Mutex<Account>>> {
        self.accounts
            .read()
            .await
            .get(&owner)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Account {owner}")))
    }
}

impl Default for AccountBook {
    fn default() -> Self {
        Self::new(Duration::from_millis(2_000))
    }
}
