//! Assignee handlers.
use lambda_http::{Body, Response};
use serde_json::{json, Value};

use crate::http::store_error_response;
use crate::services::TicketService;
use crate::store::{AssigneeStore, TicketStore};

/// Active assignees grouped by section, for the accept dialog.
///
/// # Database Interactions
/// - **`Assignees` Table**: paginated `Scan` filtered to active rows.
pub async fn handle_list_assignees<S>(service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let groups = service.list_assignees().await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "sections": groups }))
}
