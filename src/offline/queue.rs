//! redb-backed queue of inventory count operations.
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `operations` | `operation_id` | `InventoryOperation` (JSON) | One record per client operation |
//! | `queue_order` | `sequence` | `operation_id` | Insertion order |
//! | `queue_meta` | `"seq"` | `u64` | Last issued sequence |
//!
//! Records are never removed; synced operations stay for the summary view.
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::models::{InventoryOperation, NewInventoryCount, SyncStatus};
use crate::offline::sink::InventorySink;

const OPERATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("operations");
const ORDER_TABLE: TableDefinition<u64, &str> = TableDefinition::new("queue_order");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("queue_meta");

const SEQUENCE_KEY: &str = "seq";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Operation not found: {0}")]
    NotFound(Uuid),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub error: usize,
    pub synced: usize,
    pub total: usize,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[derive(Clone)]
pub struct OfflineQueue {
    db: Arc<Database>,
}

impl OfflineQueue {
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        Self::init(Database::create(path)?)
    }

    pub fn open_in_memory() -> QueueResult<Self> {
        Self::init(Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?)
    }

    fn init(db: Database) -> QueueResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OPERATIONS_TABLE)?;
            let _ = write_txn.open_table(ORDER_TABLE)?;
            let mut meta = write_txn.open_table(META_TABLE)?;
            if meta.get(SEQUENCE_KEY)?.is_none() {
                meta.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Records a submission under a fresh client id, status pending.
    pub fn enqueue(&self, count: &NewInventoryCount) -> QueueResult<InventoryOperation> {
        self.enqueue_with_id(Uuid::new_v4(), count)
    }

    /// Idempotent: an id already in the queue returns the stored record untouched.
    pub fn enqueue_with_id(&self, operation_id: Uuid, count: &NewInventoryCount) -> QueueResult<InventoryOperation> {
        count.validate()?;
        let key = operation_id.to_string();

        let txn = self.db.begin_write()?;
        let operation = {
            let mut operations = txn.open_table(OPERATIONS_TABLE)?;
            let existing = match operations.get(key.as_str())? {
                Some(value) => Some(serde_json::from_slice::<InventoryOperation>(value.value())?),
                None => None,
            };

            match existing {
                Some(op) => op,
                None => {
                    let mut meta = txn.open_table(META_TABLE)?;
                    let sequence = meta.get(SEQUENCE_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
                    meta.insert(SEQUENCE_KEY, sequence)?;

                    let now = Utc::now();
                    let op = InventoryOperation {
                        operation_id,
                        inventory_count_id: count.inventory_count_id.clone(),
                        payload: count.payload.clone(),
                        sync_status: SyncStatus::Pending,
                        error_message: None,
                        sequence,
                        created_at: now,
                        updated_at: now,
                        synced_at: None,
                    };
                    let bytes = serde_json::to_vec(&op)?;
                    operations.insert(key.as_str(), bytes.as_slice())?;
                    txn.open_table(ORDER_TABLE)?.insert(sequence, key.as_str())?;
                    tracing::debug!(operation_id = %operation_id, sequence, "inventory operation queued");
                    op
                }
            }
        };
        txn.commit()?;
        Ok(operation)
    }

    pub fn get(&self, operation_id: Uuid) -> QueueResult<Option<InventoryOperation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OPERATIONS_TABLE)?;
        match table.get(operation_id.to_string().as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Every operation in insertion order.
    pub fn list(&self) -> QueueResult<Vec<InventoryOperation>> {
        let read_txn = self.db.begin_read()?;
        let order = read_txn.open_table(ORDER_TABLE)?;
        let operations = read_txn.open_table(OPERATIONS_TABLE)?;

        let mut result = Vec::new();
        for entry in order.iter()? {
            let (_sequence, key) = entry?;
            if let Some(value) = operations.get(key.value())? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    pub fn summary(&self) -> QueueResult<QueueSummary> {
        let mut summary = QueueSummary::default();
        for op in self.list()? {
            match op.sync_status {
                SyncStatus::Pending => summary.pending += 1,
                SyncStatus::Error => summary.error += 1,
                SyncStatus::Synced => summary.synced += 1,
            }
            summary.total += 1;
        }
        Ok(summary)
    }

    /// Moves every errored operation back to pending. Returns how many moved.
    pub fn retry_errored(&self) -> QueueResult<usize> {
        let errored: Vec<InventoryOperation> = self
            .list()?
            .into_iter()
            .filter(|op| op.sync_status == SyncStatus::Error)
            .collect();

        let txn = self.db.begin_write()?;
        {
            let mut operations = txn.open_table(OPERATIONS_TABLE)?;
            for mut op in errored.iter().cloned() {
                op.sync_status = SyncStatus::Pending;
                op.error_message = None;
                op.updated_at = Utc::now();
                let bytes = serde_json::to_vec(&op)?;
                operations.insert(op.operation_id.to_string().as_str(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(errored.len())
    }

    /// Pushes every pending operation, oldest first, and records each outcome as it lands.
    ///
    /// # Logic
    /// - A rejection or transport failure marks only that operation `error` with the message;
    ///   the pass continues with the next one.
    /// - A duplicate answer from the sink counts as synced.
    pub async fn sync_pending(&self, sink: &dyn InventorySink) -> QueueResult<SyncReport> {
        let pending: Vec<InventoryOperation> = self
            .list()?
            .into_iter()
            .filter(|op| op.sync_status == SyncStatus::Pending)
            .collect();

        let mut report = SyncReport::default();
        for mut op in pending {
            let now = Utc::now();
            match sink.submit(&op).await {
                Ok(outcome) => {
                    tracing::debug!(operation_id = %op.operation_id, ?outcome, "inventory operation synced");
                    op.sync_status = SyncStatus::Synced;
                    op.error_message = None;
                    op.synced_at = Some(now);
                    report.synced.push(op.operation_id);
                }
                Err(e) => {
                    tracing::warn!(operation_id = %op.operation_id, error = %e, "inventory operation failed to sync");
                    op.sync_status = SyncStatus::Error;
                    op.error_message = Some(e.to_string());
                    report.failed.push(op.operation_id);
                }
            }
            op.updated_at = now;
            self.store(&op)?;
        }
        Ok(report)
    }

    fn store(&self, op: &InventoryOperation) -> QueueResult<()> {
        let key = op.operation_id.to_string();
        let txn = self.db.begin_write()?;
        {
            let mut operations = txn.open_table(OPERATIONS_TABLE)?;
            if operations.get(key.as_str())?.is_none() {
                return Err(QueueError::NotFound(op.operation_id));
            }
            let bytes = serde_json::to_vec(op)?;
            operations.insert(key.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InventoryPayload;
    use crate::offline::sink::{MemoryInventorySink, SubmitOutcome};

    fn count(item: &str, quantity: f64) -> NewInventoryCount {
        NewInventoryCount {
            inventory_count_id: "IC-2024-05".to_string(),
            payload: InventoryPayload {
                item: item.to_string(),
                quantity,
                unit: "u".to_string(),
                status_reason: None,
            },
        }
    }

    #[test]
    fn test_enqueue_keeps_insertion_order() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let ids: Vec<Uuid> = ["Filtro", "Correa", "Rodamiento"]
            .iter()
            .map(|item| queue.enqueue(&count(item, 2.0)).unwrap().operation_id)
            .collect();

        let listed = queue.list().unwrap();
        assert_eq!(listed.iter().map(|op| op.operation_id).collect::<Vec<_>>(), ids);
        assert!(listed.iter().all(|op| op.sync_status == SyncStatus::Pending));
        assert_eq!(queue.summary().unwrap(), QueueSummary { pending: 3, error: 0, synced: 0, total: 3 });
    }

    #[test]
    fn test_enqueue_with_same_id_is_idempotent() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let first = queue.enqueue_with_id(id, &count("Filtro", 1.0)).unwrap();
        let second = queue.enqueue_with_id(id, &count("Filtro", 5.0)).unwrap();

        assert_eq!(first, second);
        assert_eq!(queue.summary().unwrap().total, 1);
    }

    #[test]
    fn test_invalid_count_is_rejected() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        assert!(matches!(queue.enqueue(&count("", 1.0)), Err(QueueError::Validation(_))));
        assert!(matches!(queue.enqueue(&count("Filtro", -3.0)), Err(QueueError::Validation(_))));
        assert_eq!(queue.summary().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_sync_marks_each_operation() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let good = queue.enqueue(&count("Filtro", 1.0)).unwrap();
        let bad = queue.enqueue(&count("Correa", 2.0)).unwrap();

        let sink = MemoryInventorySink::new();
        sink.reject(bad.operation_id, "inventory count closed");
        let report = queue.sync_pending(&sink).await.unwrap();

        assert_eq!(report.synced, vec![good.operation_id]);
        assert_eq!(report.failed, vec![bad.operation_id]);
        let bad = queue.get(bad.operation_id).unwrap().unwrap();
        assert_eq!(bad.sync_status, SyncStatus::Error);
        assert!(bad.error_message.unwrap().contains("inventory count closed"));
        assert!(queue.get(good.operation_id).unwrap().unwrap().synced_at.is_some());
        assert_eq!(queue.summary().unwrap(), QueueSummary { pending: 0, error: 1, synced: 1, total: 2 });
    }

    #[tokio::test]
    async fn test_retry_errored_then_sync() {
        let queue = OfflineQueue::open_in_memory().unwrap();
        let op = queue.enqueue(&count("Filtro", 1.0)).unwrap();

        let sink = MemoryInventorySink::new();
        sink.set_offline(true);
        queue.sync_pending(&sink).await.unwrap();
        assert_eq!(queue.summary().unwrap().error, 1);

        // errored operations wait for an explicit retry
        sink.set_offline(false);
        assert!(queue.sync_pending(&sink).await.unwrap().synced.is_empty());

        assert_eq!(queue.retry_errored().unwrap(), 1);
        let after_retry = queue.get(op.operation_id).unwrap().unwrap();
        assert_eq!(after_retry.sync_status, SyncStatus::Pending);
        assert_eq!(after_retry.error_message, None);

        queue.sync_pending(&sink).await.unwrap();
        assert_eq!(queue.summary().unwrap(), QueueSummary { pending: 0, error: 0, synced: 1, total: 1 });
        assert_eq!(sink.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_resubmitted_operation_is_recorded_once() {
        let sink = MemoryInventorySink::new();
        let id = Uuid::new_v4();

        // Same client id queued on two devices (or re-queued after a lost ack).
        let first = OfflineQueue::open_in_memory().unwrap();
        let second = OfflineQueue::open_in_memory().unwrap();
        first.enqueue_with_id(id, &count("Filtro", 1.0)).unwrap();
        second.enqueue_with_id(id, &count("Filtro", 1.0)).unwrap();

        first.sync_pending(&sink).await.unwrap();
        second.sync_pending(&sink).await.unwrap();

        assert_eq!(sink.recorded().len(), 1);
        assert_eq!(second.get(id).unwrap().unwrap().sync_status, SyncStatus::Synced);
        let op = first.get(id).unwrap().unwrap();
        assert_eq!(sink.submit(&op).await.unwrap(), SubmitOutcome::Duplicate);
    }
}
