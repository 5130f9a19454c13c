use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{run, service_fn, Body, Request, Response};
use serde_json::Value;

use maintenance_tickets::auth::{get_given_name_from_event, Permission, PermissionSet};
use maintenance_tickets::config::{init_logging, AppConfig};
use maintenance_tickets::handlers::{
    handle_accept_ticket, handle_accept_tickets, handle_create_ticket, handle_get_counts, handle_get_version,
    handle_list_assignees, handle_record_inventory_operation, handle_search_requests, handle_search_work_orders,
    handle_update_ticket, handle_upload_image, query_param,
};
use maintenance_tickets::http::{error_response, get_value_in_json, handle_options, parse_body, parse_json_body, success_response};
use maintenance_tickets::models::{AcceptTicketsRequest, CreateTicketRequest, InventoryOperation, UpdateTicketRequest};
use maintenance_tickets::offline::{DynamoInventoryRecorder, InventorySink};
use maintenance_tickets::realtime::ChangeFeed;
use maintenance_tickets::services::TicketService;
use maintenance_tickets::store::dynamo::DynamoTicketStore;
use maintenance_tickets::store::{AssigneeStore, TicketStore};

/// Clients and services built once per cold start.
struct AppState<S> {
    config: AppConfig,
    service: TicketService<S>,
    s3_client: S3Client,
    recorder: Box<dyn InventorySink>,
}

fn required_permission(path: &str, method: &str) -> Option<Permission> {
    match (path, method) {
        ("/work-requests" | "/work-orders" | "/tickets/counts", "GET") => Some(Permission::ReadTickets),
        ("/ticket", "POST") => Some(Permission::CreateTickets),
        ("/ticket", "PUT") => Some(Permission::UpdateTickets),
        ("/ticket/accept" | "/tickets/accept", "POST") => Some(Permission::AcceptTickets),
        ("/ticket/image", "POST") => Some(Permission::UploadImages),
        ("/assignees", "GET") => Some(Permission::ReadAssignees),
        ("/inventory-counts/operations", "POST") => Some(Permission::SubmitInventory),
        _ => None,
    }
}

fn json_result(result: Result<Value, Response<Body>>) -> Response<Body> {
    match result {
        Ok(value) => success_response(200, &value.to_string()),
        Err(response) => response,
    }
}

fn ticket_id_param(query: &str) -> Result<i64, Response<Body>> {
    let raw = query_param(query, "id")
        .ok_or_else(|| error_response(400, "Missing parameter", "id is required", None))?;
    raw.parse()
        .map_err(|_| error_response(400, "Invalid parameter", &format!("'{}' is not a ticket id", raw), None))
}

/// Handle the Lambda event
async fn handle_lambda_event<S>(event: Request, state: &AppState<S>) -> Response<Body>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let method = event.method().as_str();
    let path = event.uri().path();
    let query = event.uri().query().unwrap_or("");

    // Strip /Prod or /prod prefix if it exists
    let path = path
        .strip_prefix("/Prod")
        .or_else(|| path.strip_prefix("/prod"))
        .unwrap_or(path);

    // Handle CORS preflight requests
    if method == "OPTIONS" {
        return handle_options();
    }

    if !matches!(method, "GET" | "POST" | "PUT") {
        return error_response(
            400,
            "Invalid HTTP method",
            &format!("Method '{}' is not supported", method),
            Some("Ensure you are calling this Lambda via API Gateway"),
        );
    }

    if let Some(permission) = required_permission(path, method) {
        let permissions = PermissionSet::from_event(&event);
        if !permissions.allows(permission) {
            tracing::warn!(
                path,
                permission = permission.code(),
                user = get_given_name_from_event(&event).as_deref().unwrap_or("unknown"),
                "request rejected"
            );
            return error_response(
                403,
                "Insufficient permissions",
                &format!("This action requires the '{}' permission", permission.code()),
                Some("Ask an administrator to grant the permission to your role"),
            );
        }
    }

    tracing::debug!(method, path, "routing request");

    match (path, method) {
        ("/version", "GET") => success_response(200, &handle_get_version(&state.config).to_string()),
        ("/work-requests", "GET") => json_result(handle_search_requests(query, &state.service).await),
        ("/work-orders", "GET") => json_result(handle_search_work_orders(query, &state.service).await),
        ("/tickets/counts", "GET") => json_result(handle_get_counts(query, &state.service).await),
        ("/ticket", "POST") => {
            let request: CreateTicketRequest = match parse_body(event.body()) {
                Ok(r) => r,
                Err(e) => return e,
            };
            match handle_create_ticket(&request, &state.service).await {
                Ok(value) => success_response(201, &value.to_string()),
                Err(e) => e,
            }
        }
        ("/ticket", "PUT") => {
            let id = match ticket_id_param(query) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let patch: UpdateTicketRequest = match parse_body(event.body()) {
                Ok(p) => p,
                Err(e) => return e,
            };
            json_result(handle_update_ticket(id, &patch, &state.service).await)
        }
        ("/ticket/accept", "POST") => {
            let body = match parse_json_body(event.body()) {
                Ok(b) => b,
                Err(e) => return e,
            };
            let (id, assignee_id) = match (get_value_in_json::<i64>(&body, "id"), get_value_in_json::<i64>(&body, "assignee_id")) {
                (Ok(id), Ok(assignee_id)) => (id, assignee_id),
                (Err(e), _) | (_, Err(e)) => return e,
            };
            json_result(handle_accept_ticket(id, assignee_id, &state.service).await)
        }
        ("/tickets/accept", "POST") => {
            let request: AcceptTicketsRequest = match parse_body(event.body()) {
                Ok(r) => r,
                Err(e) => return e,
            };
            json_result(handle_accept_tickets(&request, &state.service).await)
        }
        ("/ticket/image", "POST") => {
            let body = match parse_json_body(event.body()) {
                Ok(b) => b,
                Err(e) => return e,
            };
            let fields = (
                get_value_in_json::<i64>(&body, "ticket_id"),
                get_value_in_json::<String>(&body, "image_data"),
                get_value_in_json::<String>(&body, "file_name"),
            );
            let (ticket_id, image_data, file_name) = match fields {
                (Ok(id), Ok(data), Ok(name)) => (id, data, name),
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
            };
            json_result(
                handle_upload_image(
                    ticket_id,
                    &image_data,
                    &file_name,
                    &state.s3_client,
                    &state.config.attachments_bucket,
                    &state.service,
                )
                .await,
            )
        }
        ("/assignees", "GET") => json_result(handle_list_assignees(&state.service).await),
        ("/inventory-counts/operations", "POST") => {
            let operation: InventoryOperation = match parse_body(event.body()) {
                Ok(o) => o,
                Err(e) => return e,
            };
            match handle_record_inventory_operation(&operation, state.recorder.as_ref()).await {
                Ok((status, value)) => success_response(status, &value.to_string()),
                Err(e) => e,
            }
        }
        _ => error_response(
            404,
            "Not Found",
            &format!("No route for {} {}", method, path),
            None,
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    let config = AppConfig::from_env();
    init_logging(config.log_level);
    tracing::info!(version = %config.version, environment = %config.environment, "starting");

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = S3Client::new(&aws_config);

    let store = DynamoTicketStore::new(dynamodb_client.clone(), config.tables.clone());
    let recorder = DynamoInventoryRecorder::new(dynamodb_client, &config.tables.inventory);
    let state = Arc::new(AppState {
        service: TicketService::new(Arc::new(store), ChangeFeed::new()),
        s3_client,
        recorder: Box::new(recorder),
        config,
    });

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { Ok::<_, lambda_http::Error>(handle_lambda_event(event, &state).await) }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use maintenance_tickets::offline::MemoryInventorySink;
    use maintenance_tickets::store::memory::MemoryTicketStore;
    use serde_json::json;

    fn state() -> AppState<MemoryTicketStore> {
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        AppState {
            config: AppConfig::from_lookup(|_| None),
            service: TicketService::new(Arc::new(MemoryTicketStore::new()), ChangeFeed::new()),
            s3_client: S3Client::from_conf(s3_config),
            recorder: Box::new(MemoryInventorySink::new()),
        }
    }

    fn request(method: &str, uri: &str, groups: &[&str], body: Option<Value>) -> Request {
        let claims = json!({ "cognito:groups": groups });
        let token = format!(
            "h.{}.s",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        lambda_http::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", token))
            .body(body.map_or(Body::Empty, |b| Body::Text(b.to_string())))
            .unwrap()
    }

    fn body_json(response: &Response<Body>) -> Value {
        match response.body() {
            Body::Text(s) => serde_json::from_str(s).unwrap(),
            _ => Value::Null,
        }
    }

    #[test]
    fn test_handle_options() {
        let response = handle_options();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("Access-Control-Allow-Origin").unwrap(), "*");
    }

    #[tokio::test]
    async fn test_rejects_missing_permission() {
        let response = handle_lambda_event(request("POST", "/tickets/accept", &["Solicitante"], None), &state()).await;
        assert_eq!(response.status(), 403);
    }

    #[tokio::test]
    async fn test_version_needs_no_token() {
        let response = handle_lambda_event(request("GET", "/Prod/version", &[], None), &state()).await;
        assert_eq!(response.status(), 200);
        assert_eq!(body_json(&response)["environment"], "development");
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let state = state();
        let ticket = json!({
            "title": "AC no enfría",
            "description": "",
            "requester": "Marta",
            "location": "M7",
            "priority": "alta",
            "incident_date": "2024-06-03",
        });
        let created = handle_lambda_event(request("POST", "/ticket", &["Solicitante"], Some(ticket)), &state).await;
        assert_eq!(created.status(), 201);

        let listed = handle_lambda_event(request("GET", "/work-requests?location=M7", &["Supervisor"], None), &state).await;
        assert_eq!(listed.status(), 200);
        let body = body_json(&listed);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["priority"], "Alta");
        assert_eq!(body["data"][0]["is_accepted"], false);
    }

    #[tokio::test]
    async fn test_invalid_ticket_reports_fields() {
        let ticket = json!({
            "title": "",
            "description": "",
            "requester": "Marta",
            "location": "Luna",
            "priority": "media",
            "incident_date": "2024-06-03",
        });
        let response = handle_lambda_event(request("POST", "/ticket", &["Admin"], Some(ticket)), &state()).await;
        assert_eq!(response.status(), 400);
        let fields = &body_json(&response)["fields"];
        assert!(fields.get("title").is_some());
        assert!(fields.get("location").is_some());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = handle_lambda_event(request("GET", "/reports", &["Admin"], None), &state()).await;
        assert_eq!(response.status(), 404);
    }
}
