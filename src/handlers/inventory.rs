//! Server side of the offline inventory queue.
use lambda_http::{Body, Response};
use serde_json::{json, Value};
use validator::Validate;

use crate::http::error_response;
use crate::models::InventoryOperation;
use crate::offline::{InventorySink, SinkError, SubmitOutcome};

/// Records one queued operation. A repeated operation id is acknowledged without a second record.
///
/// # Logic
/// - `201` with `{"status": "created"}` for a new id, `200` with `{"status": "duplicate"}` otherwise.
///   The device marks the operation synced either way.
pub async fn handle_record_inventory_operation(
    operation: &InventoryOperation,
    recorder: &dyn InventorySink,
) -> Result<(u16, Value), Response<Body>> {
    operation.payload.validate().map_err(|e| {
        error_response(400, "Validation failed", &e.to_string(), Some("Fix the count on the device and retry"))
    })?;
    if operation.inventory_count_id.is_empty() {
        return Err(error_response(400, "Missing parameter", "inventory_count_id is required", None));
    }

    match recorder.submit(operation).await {
        Ok(SubmitOutcome::Created) => {
            tracing::info!(operation_id = %operation.operation_id, "inventory operation recorded");
            Ok((201, json!({ "status": SubmitOutcome::Created, "operation_id": operation.operation_id })))
        }
        Ok(SubmitOutcome::Duplicate) => {
            Ok((200, json!({ "status": SubmitOutcome::Duplicate, "operation_id": operation.operation_id })))
        }
        Err(SinkError::Rejected { status, message }) => Err(error_response(status, "Rejected", &message, None)),
        Err(e) => Err(error_response(502, "Backend Error", &e.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InventoryPayload, SyncStatus};
    use crate::offline::MemoryInventorySink;
    use chrono::Utc;
    use uuid::Uuid;

    fn operation(quantity: f64) -> InventoryOperation {
        InventoryOperation {
            operation_id: Uuid::new_v4(),
            inventory_count_id: "IC-7".to_string(),
            payload: InventoryPayload {
                item: "Aceite".to_string(),
                quantity,
                unit: "l".to_string(),
                status_reason: None,
            },
            sync_status: SyncStatus::Pending,
            error_message: None,
            sequence: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            synced_at: None,
        }
    }

    #[tokio::test]
    async fn test_second_submission_is_duplicate() {
        let sink = MemoryInventorySink::new();
        let op = operation(4.0);

        let (status, body) = handle_record_inventory_operation(&op, &sink).await.unwrap();
        assert_eq!(status, 201);
        assert_eq!(body["status"], "created");

        let (status, body) = handle_record_inventory_operation(&op, &sink).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["status"], "duplicate");
        assert_eq!(sink.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_quantity_is_rejected() {
        let sink = MemoryInventorySink::new();
        let response = handle_record_inventory_operation(&operation(-1.0), &sink).await.unwrap_err();
        assert_eq!(response.status(), 400);
        assert!(sink.recorded().is_empty());
    }
}
