//! Task Manager - Coordinates task lifecycle and state transitions
//!
//! This module owns users, tasks and responds, performs role and ownership
//! checks, and routes every status change that touches money through the
//! [`EscrowEngine`]. Each task sits behind its own lock which is held for the
//! whole of an update, so one task mutation is one atomic unit.

use crate::{
    account::Account,
    error::EscrowError,
    escrow_engine::EscrowEngine,
    models::{
        Amount, LedgerEntry, Respond, RespondId, Task, TaskId, TaskStatus, User, UserId,
        UserRole,
    },
    EscrowResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Configuration for the task manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Maximum title length in characters
    pub max_title_len: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self { max_title_len: 30 }
    }
}

/// Task creation request
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub author: UserId,
    pub title: String,
    pub text: String,
    pub price: Amount,
}

/// Task update request; `None` fields are left as they are
#[derive(Debug, Clone, Default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub text: Option<String>,
    pub status: Option<TaskStatus>,
}

impl UpdateTaskRequest {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn touches_content(&self) -> bool {
        self.title.is_some() || self.text.is_some()
    }
}

/// Main task manager that coordinates task lifecycle
pub struct TaskManager {
    /// Configuration
    config: TaskManagerConfig,
    /// In-memory user storage (in production, this would be a database)
    users: Arc<RwLock<HashMap<UserId, User>>>,
    /// In-memory task storage, one lock per task
    tasks: Arc<RwLock<HashMap<TaskId, Arc<Mutex<Task>>>>>,
    /// In-memory respond storage
    responds: Arc<RwLock<HashMap<RespondId, Respond>>>,
    /// Escrow engine for all balance moves
    escrow_engine: Arc<EscrowEngine>,
}

impl TaskManager {
    /// Create a new task manager
    pub fn new(config: TaskManagerConfig, escrow_engine: Arc<EscrowEngine>) -> Self {
        Self {
            config,
            users: Arc::new(RwLock::new(HashMap::new())),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            responds: Arc::new(RwLock::new(HashMap::new())),
            escrow_engine,
        }
    }

    /// Register a user and open their account
    pub async fn register_user(
        &self,
        username: String,
        email: String,
        role: UserRole,
    ) -> EscrowResult<User> {
        let username = username.trim().to_string();
        let email = email.trim().to_lowercase();
        if username.is_empty() {
            return Err(EscrowError::task_validation("Username cannot be empty"));
        }
        if !email.contains('@') {
            return Err(EscrowError::task_validation(format!(
                "Invalid email address: {email}"
            )));
        }

        let user = {
            let mut users = self.users.write().await;
            if users
                .values()
                .any(|existing| existing.username == username || existing.email == email)
            {
                return Err(EscrowError::task_validation(format!(
                    "User {username} or email {email} already registered"
                )));
            }
            let user = User::new(username, email, role);
            users.insert(user.id, user.clone());
            user
        };

        self.escrow_engine.accounts().open(user.id).await;

        info!(user_id = %user.id, username = %user.username, ?role, "registered user");
        Ok(user)
    }

    /// Create a new task, freezing its price on the author's account
    pub async fn create_task(&self, request: CreateTaskRequest) -> EscrowResult<Task> {
        let author = self.get_user(request.author).await?;
        if !author.is_author() {
            return Err(EscrowError::permission(format!(
                "User {} is not an author",
                author.username
            )));
        }

        let title = self.validate_title(request.title)?;
        let mut task = Task::new(author.id, title, request.text, request.price);

        // Persisted only once the price is frozen
        self.escrow_engine.reserve(&mut task).await?;

        self.tasks
            .write()
            .await
            .insert(task.id, Arc::new(Mutex::new(task.clone())));

        info!(task_id = %task.id, author = %task.author, price = %task.price, "created task");
        Ok(task)
    }

    /// Place an executor's respond on an open task
    pub async fn respond(&self, task_id: TaskId, executor: UserId) -> EscrowResult<Respond> {
        let user = self.get_user(executor).await?;
        if !user.is_executor() {
            return Err(EscrowError::permission(format!(
                "User {} is not an executor",
                user.username
            )));
        }

        let task = self.get_task(task_id).await?;
        if !task.status.is_open() {
            return Err(EscrowError::task_validation(format!(
                "Task {task_id} is {} and no longer takes responds",
                task.status
            )));
        }

        let respond = {
            let mut responds = self.responds.write().await;
            if responds
                .values()
                .any(|existing| existing.task_id == task_id && existing.author == executor)
            {
                return Err(EscrowError::task_validation(format!(
                    "User {} already responded to task {task_id}",
                    user.username
                )));
            }
            let respond = Respond::new(task_id, executor);
            responds.insert(respond.id, respond.clone());
            respond
        };

        info!(%task_id, respond_id = %respond.id, %executor, "responded to task");
        Ok(respond)
    }

    /// Choose a respond as the task's winner; no balance effect
    pub async fn choose_winner(
        &self,
        task_id: TaskId,
        respond_id: RespondId,
        caller: UserId,
    ) -> EscrowResult<Task> {
        let handle = self.task_handle(task_id).await?;
        let mut task = handle.lock().await;
        Self::ensure_author(&task, caller)?;

        let respond = self
            .responds
            .read()
            .await
            .get(&respond_id)
            .filter(|respond| respond.task_id == task_id)
            .cloned()
            .ok_or_else(|| {
                EscrowError::not_found(format!("Respond {respond_id} on task {task_id}"))
            })?;

        if let Some(executor) = task.executor {
            return Err(EscrowError::WinnerAlreadyChosen { task_id, executor });
        }
        task.status.validate_transition(TaskStatus::InProgress)?;

        task.executor = Some(respond.author);
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();

        info!(%task_id, executor = %respond.author, "chose winner");
        Ok(task.clone())
    }

    /// Apply an author's edit to a task.
    ///
    /// Content edits and the status change commit together or not at all.
    /// Re-completing a `done` task returns it unchanged.
    pub async fn update_task(
        &self,
        task_id: TaskId,
        caller: UserId,
        request: UpdateTaskRequest,
    ) -> EscrowResult<Task> {
        let handle = self.task_handle(task_id).await?;
        let mut task = handle.lock().await;
        Self::ensure_author(&task, caller)?;

        if task.status.is_terminal() {
            let recompletion = task.status == TaskStatus::Done
                && request.status == Some(TaskStatus::Done)
                && !request.touches_content();
            if !recompletion {
                let to_state = request.status.unwrap_or(task.status);
                return Err(EscrowError::state_transition(
                    task.status.as_str(),
                    to_state.as_str(),
                    "Task is in a terminal state",
                ));
            }
        }

        let mut staged = task.clone();
        if let Some(title) = request.title {
            staged.title = self.validate_title(title)?;
        }
        if let Some(text) = request.text {
            staged.text = text;
        }

        match request.status {
            Some(TaskStatus::Done) => {
                let executor = staged.executor;
                match self.escrow_engine.release(&mut staged, executor).await {
                    Ok(()) => {}
                    Err(EscrowError::AlreadySettled(_)) => {
                        info!(%task_id, "task already done; nothing to settle");
                        return Ok(task.clone());
                    }
                    Err(err) => return Err(err),
                }
            }
            Some(TaskStatus::Abandoned) => self.escrow_engine.abandon(&mut staged).await?,
            Some(status) => {
                staged.status.validate_transition(status)?;
                staged.status = status;
            }
            None => {}
        }

        staged.updated_at = Utc::now();
        *task = staged;

        info!(%task_id, status = %task.status, "updated task");
        Ok(task.clone())
    }

    /// Get a task by ID
    pub async fn get_task(&self, task_id: TaskId) -> EscrowResult<Task> {
        let handle = self.task_handle(task_id).await?;
        let task = handle.lock().await.clone();
        Ok(task)
    }

    /// All tasks, oldest first
    pub async fn list_tasks(&self) -> EscrowResult<Vec<Task>> {
        let handles: Vec<_> = self.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            tasks.push(handle.lock().await.clone());
        }
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    /// Get all tasks for a user (as author or executor)
    pub async fn get_user_tasks(&self, user_id: UserId) -> EscrowResult<Vec<Task>> {
        Ok(self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|task| task.author == user_id || task.executor == Some(user_id))
            .collect())
    }

    /// Responds placed on a task, oldest first
    pub async fn responds_for(&self, task_id: TaskId) -> EscrowResult<Vec<Respond>> {
        self.task_handle(task_id).await?;
        let mut responds: Vec<Respond> = self
            .responds
            .read()
            .await
            .values()
            .filter(|respond| respond.task_id == task_id)
            .cloned()
            .collect();
        responds.sort_by_key(|respond| respond.created_at);
        Ok(responds)
    }

    /// Get a user by ID
    pub async fn get_user(&self, user_id: UserId) -> EscrowResult<User> {
        self.users
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("User {user_id}")))
    }

    /// Current balances of a user
    pub async fn account(&self, user_id: UserId) -> EscrowResult<Account> {
        self.escrow_engine.accounts().snapshot(user_id).await
    }

    /// Ledger entries recorded for a task
    pub async fn task_ledger(&self, task_id: TaskId) -> EscrowResult<Vec<LedgerEntry>> {
        self.escrow_engine.ledger().entries_for_task(task_id).await
    }

    async fn task_handle(&self, task_id: TaskId) -> EscrowResult<Arc<Mutex<Task>>> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Task {task_id}")))
    }

    fn ensure_author(task: &Task, caller: UserId) -> EscrowResult<()> {
        if task.author != caller {
            return Err(EscrowError::permission(format!(
                "Only the author of task {} can change it",
                task.id
            )));
        }
        Ok(())
    }

    /// Validate task title
    fn validate_title(&self, title: String) -> EscrowResult<String> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(EscrowError::task_validation("Title cannot be empty"));
        }
        if title.chars().count() > self.config.max_title_len {
            return Err(EscrowError::task_validation(format!(
                "Title exceeds {} characters",
                self.config.max_title_len
            )));
        }
        Ok(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account_book::AccountBook,
        escrow_engine::EscrowEngineConfig,
        ledger::{InMemoryLedger, Ledger},
        models::{TransferKind, TransferOutcome},
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Ledger whose storage rejects every success entry
    #[derive(Default)]
    struct FailingLedger {
        inner: InMemoryLedger,
    }

    #[async_trait]
    impl Ledger for FailingLedger {
        async fn record(&self, entry: LedgerEntry) -> EscrowResult<()> {
            if entry.is_success() {
                return Err(EscrowError::storage("connection reset"));
            }
            self.inner.record(entry).await
        }

        async fn entries(&self) -> EscrowResult<Vec<LedgerEntry>> {
            self.inner.entries().await
        }
    }

    struct Fixture {
        manager: TaskManager,
        author: User,
        executor: User,
    }

    async fn fixture(author_balance: Amount) -> Fixture {
        fixture_with_ledger(author_balance, Arc::new(InMemoryLedger::new())).await
    }

    async fn fixture_with_ledger(author_balance: Amount, ledger: Arc<dyn Ledger>) -> Fixture {
        let engine = Arc::new(EscrowEngine::new(
            EscrowEngineConfig::default(),
            Arc::new(AccountBook::default()),
            ledger,
        ));
        let manager = TaskManager::new(TaskManagerConfig::default(), engine.clone());

        let author = manager
            .register_user("author".into(), "author@gmail.com".into(), UserRole::Author)
            .await
            .unwrap();
        let executor = manager
            .register_user(
                "executor".into(),
                "executor@gmail.com".into(),
                UserRole::Executor,
            )
            .await
            .unwrap();
        engine
            .accounts()
            .deposit(author.id, author_balance)
            .await
            .unwrap();

        Fixture {
            manager,
            author,
            executor,
        }
    }

    impl Fixture {
        async fn create(&self, price: Amount) -> EscrowResult<Task> {
            self.manager
                .create_task(CreateTaskRequest {
                    author: self.author.id,
                    title: "test_title".into(),
                    text: String::new(),
                    price,
                })
                .await
        }

        async fn assign(&self, task: &Task) -> Task {
            let respond = self
                .manager
                .respond(task.id, self.executor.id)
                .await
                .unwrap();
            self.manager
                .choose_winner(task.id, respond.id, self.author.id)
                .await
                .unwrap()
        }

        async fn balances(&self, user: &User) -> (Amount, Amount) {
            let account = self.manager.account(user.id).await.unwrap();
            (account.balance(), account.freeze_balance())
        }
    }

    #[tokio::test]
    async fn test_full_task_lifecycle() {
        let fx = fixture(dec!(500)).await;

        let task = fx.create(dec!(200)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(fx.balances(&fx.author).await, (dec!(300), dec!(200)));
        assert_eq!(fx.manager.task_ledger(task.id).await.unwrap().len(), 1);

        let task = fx.assign(&task).await;
        assert_eq!(task.executor, Some(fx.executor.id));
        assert_eq!(task.status, TaskStatus::InProgress);

        let done = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest::status(TaskStatus::Done),
            )
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(fx.balances(&fx.author).await, (dec!(300), dec!(0)));
        assert_eq!(fx.balances(&fx.executor).await, (dec!(200), dec!(0)));

        let ledger = fx.manager.task_ledger(task.id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].kind, TransferKind::Payout);
        assert_eq!(ledger[1].executor, Some(fx.executor.id));

        let again = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest::status(TaskStatus::Done),
            )
            .await
            .unwrap();
        assert_eq!(again, done);
        assert_eq!(fx.balances(&fx.author).await, (dec!(300), dec!(0)));
        assert_eq!(fx.balances(&fx.executor).await, (dec!(200), dec!(0)));
        assert_eq!(fx.manager.task_ledger(task.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_without_funds_persists_nothing() {
        let fx = fixture(dec!(100)).await;

        let err = fx.create(dec!(200)).await.unwrap_err();

        assert!(matches!(err, EscrowError::InsufficientFunds { .. }));
        assert_eq!(fx.balances(&fx.author).await, (dec!(100), dec!(0)));
        assert!(fx.manager.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_ledger_fault_persists_nothing() {
        let ledger = Arc::new(FailingLedger::default());
        let fx = fixture_with_ledger(dec!(500), ledger.clone()).await;

        let err = fx.create(dec!(200)).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(fx.balances(&fx.author).await, (dec!(500), dec!(0)));
        assert!(fx.manager.list_tasks().await.unwrap().is_empty());
        assert!(fx
            .manager
            .get_user_tasks(fx.author.id)
            .await
            .unwrap()
            .is_empty());

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransferKind::Reserve);
        assert_eq!(entries[0].outcome, TransferOutcome::Fail);
    }

    #[tokio::test]
    async fn test_done_without_executor_is_blocked() {
        let fx = fixture(dec!(500)).await;
        let task = fx.create(dec!(200)).await.unwrap();

        let err = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest {
                    title: Some("renamed".into()),
                    status: Some(TaskStatus::Done),
                    ..UpdateTaskRequest::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EscrowError::NoExecutorChosen(_)));
        let stored = fx.manager.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Active);
        assert_eq!(stored.title, "test_title");

        let ledger = fx.manager.task_ledger(task.id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].outcome, TransferOutcome::Fail);
    }

    #[tokio::test]
    async fn test_done_task_content_is_frozen() {
        let fx = fixture(dec!(500)).await;
        let task = fx.create(dec!(200)).await.unwrap();
        fx.assign(&task).await;
        fx.manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest::status(TaskStatus::Done),
            )
            .await
            .unwrap();

        let err = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest {
                    text: Some("more work".into()),
                    ..UpdateTaskRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));

        let err = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest::status(TaskStatus::Active),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
    }

    #[tokio::test]
    async fn test_abandon_refunds_and_closes() {
        let fx = fixture(dec!(500)).await;
        let task = fx.create(dec!(200)).await.unwrap();

        let abandoned = fx
            .manager
            .update_task(
                task.id,
                fx.author.id,
                UpdateTaskRequest::status(TaskStatus::Abandoned),
            )
            .await
            .unwrap();

        assert_eq!(abandoned.status, TaskStatus::Abandoned);
        assert_eq!(fx.balances(&fx.author).await, (dec!(500), dec!(0)));
        assert!(fx.manager.respond(task.id, fx.executor.id).await.is_err());
    }

    #[tokio::test]
    async fn test_winner_can_be_chosen_once() {
        let fx = fixture(dec!(500)).await;
        let task = fx.create(dec!(200)).await.unwrap();
        fx.assign(&task).await;

        let other = fx
            .manager
            .register_user("other".into(), "other@gmail.com".into(), UserRole::Executor)
            .await
            .unwrap();
        let respond = fx.manager.respond(task.id, other.id).await.unwrap();
        let err = fx
            .manager
            .choose_winner(task.id, respond.id, fx.author.id)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EscrowError::WinnerAlreadyChosen { executor, .. } if executor == fx.executor.id
        ));
        assert_eq!(fx.manager.task_ledger(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_roles_are_checked() {
        let fx = fixture(dec!(500)).await;

        let err = fx
            .manager
            .create_task(CreateTaskRequest {
                author: fx.executor.id,
                title: "not mine".into(),
                text: String::new(),
                price: dec!(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Permission(_)));

        let task = fx.create(dec!(200)).await.unwrap();
        assert!(matches!(
            fx.manager.respond(task.id, fx.author.id).await,
            Err(EscrowError::Permission(_))
        ));
        assert!(matches!(
            fx.manager
                .update_task(
                    task.id,
                    fx.executor.id,
                    UpdateTaskRequest::status(TaskStatus::Done)
                )
                .await,
            Err(EscrowError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_title_is_validated() {
        let fx = fixture(dec!(500)).await;

        let err = fx
            .manager
            .create_task(CreateTaskRequest {
                author: fx.author.id,
                title: "x".repeat(31),
                text: String::new(),
                price: dec!(1),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EscrowError::TaskValidation(_)));
        assert_eq!(fx.balances(&fx.author).await, (dec!(500), dec!(0)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let fx = fixture(dec!(0)).await;

        let result = fx
            .manager
            .register_user("author".into(), "new@gmail.com".into(), UserRole::Author)
            .await;
        assert!(matches!(result, Err(EscrowError::TaskValidation(_))));
    }

    #[tokio::test]
    async fn test_user_tasks_cover_both_roles() {
        let fx = fixture(dec!(500)).await;
        let task = fx.create(dec!(200)).await.unwrap();
        fx.assign(&task).await;

        assert_eq!(fx.manager.get_user_tasks(fx.author.id).await.unwrap().len(), 1);
        assert_eq!(
            fx.manager.get_user_tasks(fx.executor.id).await.unwrap().len(),
            1
        );
        assert_eq!(fx.manager.responds_for(task.id).await.unwrap().len(), 1);
    }
}
