//! Where queued inventory operations are delivered.
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{InventoryOperation, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitOutcome {
    Created,
    /// The operation id was already recorded; nothing new was written.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait InventorySink: Send + Sync {
    async fn submit(&self, operation: &InventoryOperation) -> Result<SubmitOutcome, SinkError>;
}

/// Posts operations to `POST {base_url}/inventory-counts/operations`.
///
/// `201` means recorded, `200` means the id was already known.
pub struct HttpInventorySink {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpInventorySink {
    pub fn new(base_url: &str) -> Self {
        HttpInventorySink {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }
}

#[async_trait]
impl InventorySink for HttpInventorySink {
    async fn submit(&self, operation: &InventoryOperation) -> Result<SubmitOutcome, SinkError> {
        let url = format!("{}/inventory-counts/operations", self.base_url);
        let mut request = self.client.post(&url).json(operation);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(format!("Failed to reach {}: {}", url, e)))?;

        let status = response.status().as_u16();
        match outcome(status) {
            Some(outcome) => Ok(outcome),
            None => {
                let message = response.text().await.unwrap_or_else(|_| "{}".to_string());
                Err(SinkError::Rejected { status, message })
            }
        }
    }
}

/// `None` for any status the device should keep as an error and retry later.
fn outcome(status: u16) -> Option<SubmitOutcome> {
    match status {
        201 => Some(SubmitOutcome::Created),
        200 | 409 => Some(SubmitOutcome::Duplicate),
        _ => None,
    }
}

/// Server-side recorder: one item per operation id in the inventory table.
///
/// # Database Interactions
/// - **`InventoryOperations` Table**: `PutItem` with `attribute_not_exists(operation_id)`.
///   A failed condition means the id was recorded earlier and the submission is a duplicate.
pub struct DynamoInventoryRecorder {
    client: Client,
    table: String,
}

impl DynamoInventoryRecorder {
    pub fn new(client: Client, table: &str) -> Self {
        DynamoInventoryRecorder { client, table: table.to_string() }
    }
}

#[async_trait]
impl InventorySink for DynamoInventoryRecorder {
    async fn submit(&self, operation: &InventoryOperation) -> Result<SubmitOutcome, SinkError> {
        let mut recorded = operation.clone();
        recorded.sync_status = SyncStatus::Synced;
        recorded.error_message = None;
        recorded.synced_at = Some(Utc::now());

        let mut item: HashMap<String, AttributeValue> = serde_dynamo::to_item(&recorded)
            .map_err(|e| SinkError::Rejected { status: 400, message: format!("Failed to serialize operation: {}", e) })?;
        item.insert("operation_id".to_string(), AttributeValue::S(operation.operation_id.to_string()));

        let result = self.client.put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(operation_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(SubmitOutcome::Created),
            Err(e) => {
                if let Some(service_err) = e.as_service_error() && service_err.is_conditional_check_failed_exception() {
                    tracing::debug!(operation_id = %operation.operation_id, "inventory operation already recorded");
                    return Ok(SubmitOutcome::Duplicate);
                }
                Err(SinkError::Transport(format!("Failed to record inventory operation: {:?}", e)))
            }
        }
    }
}

/// In-process sink keyed by operation id, for local runs and tests.
#[derive(Default)]
pub struct MemoryInventorySink {
    recorded: Mutex<BTreeMap<Uuid, InventoryOperation>>,
    rejections: Mutex<HashMap<Uuid, String>>,
    offline: AtomicBool,
}

impl MemoryInventorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every submission fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Refuse one operation with `message`.
    pub fn reject(&self, operation_id: Uuid, message: &str) {
        if let Ok(mut rejections) = self.rejections.lock() {
            rejections.insert(operation_id, message.to_string());
        }
    }

    pub fn recorded(&self) -> Vec<InventoryOperation> {
        self.recorded.lock().map(|r| r.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl InventorySink for MemoryInventorySink {
    async fn submit(&self, operation: &InventoryOperation) -> Result<SubmitOutcome, SinkError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SinkError::Transport("network unreachable".to_string()));
        }
        if let Some(message) = self.rejections.lock().ok().and_then(|r| r.get(&operation.operation_id).cloned()) {
            return Err(SinkError::Rejected { status: 422, message });
        }

        let mut recorded = self
            .recorded
            .lock()
            .map_err(|_| SinkError::Transport("sink lock poisoned".to_string()))?;
        if recorded.contains_key(&operation.operation_id) {
            return Ok(SubmitOutcome::Duplicate);
        }
        recorded.insert(operation.operation_id, operation.clone());
        Ok(SubmitOutcome::Created)
    }
}
