//! Ledger - append-only audit log of transfer attempts

use crate::{
    error::EscrowError,
    models::{LedgerEntry, TaskId},
    EscrowResult,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Append-only store of [`LedgerEntry`] records.
///
/// Entries are never updated or deleted.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append one entry.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Storage`] on a storage fault. The caller must then
    /// discard the balance change the entry describes.
    async fn record(&self, entry: LedgerEntry) -> EscrowResult<()>;

    /// All entries in recording order
    async fn entries(&self) -> EscrowResult<Vec<LedgerEntry>>;

    /// Entries for one task in recording order
    async fn entries_for_task(&self, task_id: TaskId) -> EscrowResult<Vec<LedgerEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|entry| entry.task_id == task_id)
            .collect())
    }
}

/// In-memory ledger (in production, this would be a database table)
#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn record(&self, entry: LedgerEntry) -> EscrowResult<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|existing| existing.id == entry.id) {
            return Err(EscrowError::storage(format!(
                "Ledger entry {} already recorded",
                entry.id
            )));
        }
        entries.push(entry);
        Ok(())
    }

    async fn entries(&self) -> EscrowResult<Vec<LedgerEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
