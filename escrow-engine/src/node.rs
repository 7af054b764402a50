//! Marketplace Node - High-level API for the marketplace backend
//!
//! Wires configuration, the account book, the ledger, the escrow engine and
//! the task manager together, and offers the read-side views a front end
//! needs.

use crate::{
    account::Account,
    account_book::AccountBook,
    config::MarketplaceConfig,
    escrow_engine::EscrowEngine,
    ledger::{InMemoryLedger, Ledger},
    models::{Amount, LedgerEntry, Respond, Task, TaskId, TaskStatus, UserId},
    task_manager::{TaskManager, UpdateTaskRequest},
    EscrowResult,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

/// Main node that coordinates all components
pub struct MarketplaceNode {
    config: MarketplaceConfig,
    /// Task manager for task lifecycle
    task_manager: Arc<TaskManager>,
    /// Escrow engine for balance moves
    escrow_engine: Arc<EscrowEngine>,
}

/// Task information response
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task: Task,
    pub responds: Vec<Respond>,
    pub ledger: Vec<LedgerEntry>,
}

/// Node health status
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl MarketplaceNode {
    /// Create a node backed by an in-memory ledger
    pub fn new(config: MarketplaceConfig) -> Self {
        Self::with_ledger(config, Arc::new(InMemoryLedger::new()))
    }

    /// Create a node on top of the given ledger store
    pub fn with_ledger(config: MarketplaceConfig, ledger: Arc<dyn Ledger>) -> Self {
        info!(
            lock_timeout_ms = config.escrow.lock_timeout_ms,
            max_task_price = %config.escrow.max_task_price,
            "initializing marketplace node"
        );

        let accounts = Arc::new(AccountBook::new(config.escrow.lock_timeout()));
        let escrow_engine = Arc::new(EscrowEngine::new(
            config.escrow.clone(),
            accounts,
            ledger,
        ));
        let task_manager = Arc::new(TaskManager::new(
            config.tasks.clone(),
            escrow_engine.clone(),
        ));

        Self {
            config,
            task_manager,
            escrow_engine,
        }
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    /// Administrative top-up of a user's spendable balance
    pub async fn deposit(&self, user_id: UserId, amount: Amount) -> EscrowResult<Account> {
        self.task_manager.get_user(user_id).await?;
        self.escrow_engine.accounts().deposit(user_id, amount).await
    }

    /// Mark a task done, paying its executor
    pub async fn complete_task(&self, task_id: TaskId, caller: UserId) -> EscrowResult<Task> {
        self.task_manager
            .update_task(task_id, caller, UpdateTaskRequest::status(TaskStatus::Done))
            .await
    }

    /// Cancel a task, refunding its author
    pub async fn abandon_task(&self, task_id: TaskId, caller: UserId) -> EscrowResult<Task> {
        self.task_manager
            .update_task(
                task_id,
                caller,
                UpdateTaskRequest::status(TaskStatus::Abandoned),
            )
            .await
    }

    /// Get task information with related data
    pub async fn get_task_info(&self, task_id: TaskId) -> EscrowResult<TaskInfo> {
        Ok(TaskInfo {
            task: self.task_manager.get_task(task_id).await?,
            responds: self.task_manager.responds_for(task_id).await?,
            ledger: self.task_manager.task_ledger(task_id).await?,
        })
    }

    /// Full audit trail
    pub async fn ledger(&self) -> EscrowResult<Vec<LedgerEntry>> {
        self.escrow_engine.ledger().entries().await
    }

    /// Health check for the node.
    ///
    /// Verifies that the ledger is readable and that every open task is
    /// backed by at least its price in its author's frozen funds.
    pub async fn health_check(&self) -> EscrowResult<NodeHealth> {
        let mut issues = Vec::new();

        if let Err(e) = self.escrow_engine.ledger().entries().await {
            issues.push(format!("Ledger error: {}", e));
        }

        let mut frozen_by_author: HashMap<UserId, Amount> = HashMap::new();
        for task in self.task_manager.list_tasks().await? {
            if task.status.is_open() {
                *frozen_by_author.entry(task.author).or_default() += task.price;
            }
        }
        for (author, expected) in frozen_by_author {
            let account = self.escrow_engine.accounts().snapshot(author).await?;
            if account.freeze_balance() < expected {
                issues.push(format!(
                    "Account {author} freezes {} but open tasks need {expected}",
                    account.freeze_balance()
                ));
            }
        }

        Ok(NodeHealth {
            healthy: issues.is_empty(),
            issues,
            timestamp: Utc::now(),
        })
    }
}
