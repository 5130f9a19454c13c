//! Ticket handlers (list views, counts, create, update, accept).
use lambda_http::{Body, Response};
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::filters::{work_orders_schema, work_requests_schema, FilterSchema, FilterState, TicketFilterKey};
use crate::http::{error_response, store_error_response};
use crate::models::{AcceptTicketsRequest, CreateTicketRequest, Status, Ticket, UpdateTicketRequest};
use crate::query::{CountScope, TicketFilterValues};
use crate::services::TicketService;
use crate::store::{AssigneeStore, Page, TicketStore};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Single value of a query-string parameter, outside the filter schema.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// `page` is zero-based; `page_size` is clamped to `1..=100`.
fn paging(query: &str) -> (u64, u64) {
    let page = query_param(query, "page").and_then(|p| p.parse().ok()).unwrap_or(0);
    let page_size = query_param(query, "page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, page_size)
}

fn list_response(page: Page<Ticket>, state: &FilterState<TicketFilterKey>) -> Value {
    json!({
        "data": page.data,
        "count": page.count,
        "query": state.to_query_string(),
        "active_filters": state.active_count(),
    })
}

fn filter_state(schema: FilterSchema<TicketFilterKey>, query: &str) -> FilterState<TicketFilterKey> {
    FilterState::initialize(schema, query)
}

/// Lists unaccepted tickets (the work-request inbox).
///
/// # Logic
/// - The query string is parsed against the work-request schema; unknown or malformed
///   parameters are dropped and the hidden `accepted = false` default always applies.
/// - Returns `{ data, count, query, active_filters }`, where `query` is the canonical
///   query string for the filters actually applied.
pub async fn handle_search_requests<S>(query: &str, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let state = filter_state(work_requests_schema(), query);
    let values = TicketFilterValues::from_state(&state);
    let (page, page_size) = paging(query);

    let result = service
        .search_requests(&values, page, page_size)
        .await
        .map_err(|e| store_error_response(&e))?;

    Ok(list_response(result, &state))
}

/// Lists one kanban column. `column` is the status label.
pub async fn handle_search_work_orders<S>(query: &str, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let column = query_param(query, "column")
        .ok_or_else(|| error_response(400, "Missing parameter", "column is required", Some("Use one of: Pendiente, En Ejecución, Finalizadas")))?;
    let status = Status::from_label(&column)
        .filter(|s| Status::KANBAN.contains(s))
        .ok_or_else(|| error_response(400, "Invalid parameter", &format!("'{}' is not a board column", column), None))?;

    let state = filter_state(work_orders_schema(), query);
    let values = TicketFilterValues::from_state(&state);
    let (page, page_size) = paging(query);

    let result = service
        .search_by_status(status, &values, page, page_size)
        .await
        .map_err(|e| store_error_response(&e))?;

    Ok(list_response(result, &state))
}

/// Badge counts for the inbox and every kanban column, honouring `q` and `location`.
pub async fn handle_get_counts<S>(query: &str, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let scope = CountScope {
        term: query_param(query, "q").filter(|q| !q.is_empty()),
        location: query_param(query, "location").filter(|l| !l.is_empty()),
    };

    let counts = service.status_counts(&scope).await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "counts": counts }))
}

/// Creates a ticket. Field errors come back as `400` before anything is written.
pub async fn handle_create_ticket<S>(request: &CreateTicketRequest, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let ticket = service.create_ticket(request).await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "ticket": ticket }))
}

pub async fn handle_update_ticket<S>(
    id: i64,
    patch: &UpdateTicketRequest,
    service: &TicketService<S>,
) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    if patch.is_empty() {
        return Err(error_response(400, "Nothing to update", "The request contained no changes", None));
    }
    let ticket = service.update_ticket(id, patch).await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "ticket": ticket }))
}

pub async fn handle_accept_ticket<S>(id: i64, assignee_id: i64, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let ticket = service.accept_ticket(id, assignee_id).await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "ticket": ticket }))
}

/// Bulk accept. Either every ticket is accepted or the whole batch is reported as failed.
pub async fn handle_accept_tickets<S>(request: &AcceptTicketsRequest, service: &TicketService<S>) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let tickets = service.accept_tickets(request).await.map_err(|e| store_error_response(&e))?;
    Ok(json!({ "accepted": tickets.len(), "tickets": tickets }))
}
