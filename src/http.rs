//! HTTP utilities for request/response handling and CORS

use lambda_http::{Body, Response};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::store::StoreError;

/// CORS origin header for all responses
pub fn get_cors_origin_header() -> (&'static str, &'static str) {
    ("Access-Control-Allow-Origin", "*")
}

/// Full CORS headers for OPTIONS preflight responses only
pub fn get_cors_preflight_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Access-Control-Allow-Origin", "*"),
        (
            "Access-Control-Allow-Headers",
            "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token,If-Modified-Since",
        ),
        ("Access-Control-Allow-Methods", "GET,POST,PUT,OPTIONS"),
        ("Access-Control-Max-Age", "86400"),
    ]
}

fn build_json(status: u16, body: String) -> Response<Body> {
    let (key, value) = get_cors_origin_header();
    Response::builder()
        .status(status)
        .header(key, value)
        .header("Content-Type", "application/json")
        .body(body.into())
        .unwrap_or_else(|_| Response::new(Body::Empty))
}

/// Build an error response with consistent formatting
pub fn error_response(
    status: u16,
    error: &str,
    details: &str,
    suggestion: Option<&str>,
) -> Response<Body> {
    let mut body = json!({
        "error": error,
        "details": details,
    });

    if let Some(suggestion) = suggestion {
        body["suggestion"] = json!(suggestion);
    }

    build_json(status, body.to_string())
}

/// Maps a store failure to the response the caller sees.
///
/// # Logic
/// - **Validation** errors become `400` with one entry per offending field under `fields`.
/// - **Not found** is `404`, **conflict** (a bulk write lost a race) is `409`.
/// - **Backend** failures are `502`; the service behind us failed, not the request.
pub fn store_error_response(err: &StoreError) -> Response<Body> {
    match err {
        StoreError::Validation(errors) => {
            let fields: serde_json::Map<String, Value> = errors
                .field_errors()
                .iter()
                .map(|(field, errs)| {
                    let messages: Vec<String> = errs
                        .iter()
                        .map(|e| e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string()))
                        .collect();
                    (field.to_string(), json!(messages))
                })
                .collect();
            let body = json!({
                "error": "Validation failed",
                "details": err.to_string(),
                "fields": fields,
            });
            build_json(400, body.to_string())
        }
        StoreError::Invalid(details) => error_response(400, "Invalid request", details, None),
        StoreError::NotFound(id) => error_response(404, "Ticket Not Found", &format!("No ticket with id {}", id), None),
        StoreError::Conflict(details) => error_response(
            409,
            "Conflict",
            details,
            Some("Reload the board and try again; no ticket in the batch was changed"),
        ),
        StoreError::Deserialization(e) => {
            error_response(500, "Deserialization Error", &format!("Failed to deserialize record: {}", e), None)
        }
        StoreError::Backend(details) => error_response(502, "Backend Error", details, None),
    }
}

pub fn generate_short_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Build a successful response with CORS headers
pub fn success_response(status: u16, body: &str) -> Response<Body> {
    build_json(status, body.to_string())
}

/// Handle CORS preflight requests
pub fn handle_options() -> Response<Body> {
    let mut response = Response::builder().status(200);

    for (key, value) in get_cors_preflight_headers() {
        response = response.header(key, value);
    }

    response
        .header("Content-Type", "application/json")
        .body(Body::Empty)
        .unwrap_or_else(|_| Response::new(Body::Empty))
}

pub fn parse_json_body(body: &Body) -> Result<Value, Response<Body>> {
    let body_str = match body {
        Body::Empty => "{}",
        Body::Text(s) => s,
        Body::Binary(b) => {
            match std::str::from_utf8(b) {
                Ok(s) => s,
                Err(_) => return Err(error_response(400, "Invalid request body", "Could not parse request body as UTF-8", None)),
            }
        },
        _ => "{}",
    };

    serde_json::from_str(body_str)
        .map_err(|_| error_response(400, "Invalid JSON", "Could not parse request body as JSON", None))
}

/// Parses the whole body into a request type.
pub fn parse_body<T>(body: &Body) -> Result<T, Response<Body>>
where
    T: DeserializeOwned,
{
    let json = parse_json_body(body)?;
    serde_json::from_value(json)
        .map_err(|e| error_response(400, "Invalid request body", &format!("Could not read request: {}", e), None))
}

pub fn get_value_in_json<T>(body: &Value, key: &str) -> Result<T, Response<Body>>
where
    T: DeserializeOwned,
{
    match body.get(key) {
        Some(v) => serde_json::from_value(v.clone()).map_err(|_| error_response(400, "Invalid parameter", &format!("{} is not a valid value", key), None)),
        None => Err(error_response(400, "Missing parameter", &format!("{} is required", key), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    fn body_json(response: &Response<Body>) -> Value {
        match response.body() {
            Body::Text(s) => serde_json::from_str(s).unwrap(),
            _ => Value::Null,
        }
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(length(max = 3, message = "too long"))]
        title: String,
    }

    #[test]
    fn test_validation_errors_list_fields() {
        let errors = Sample { title: "abcd".to_string() }.validate().unwrap_err();
        let response = store_error_response(&StoreError::Validation(errors));
        assert_eq!(response.status(), 400);
        assert_eq!(body_json(&response)["fields"]["title"], json!(["too long"]));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(store_error_response(&StoreError::NotFound(3)).status(), 404);
        assert_eq!(store_error_response(&StoreError::Conflict("x".to_string())).status(), 409);
        assert_eq!(store_error_response(&StoreError::Backend("down".to_string())).status(), 502);
        assert_eq!(store_error_response(&StoreError::Invalid("too many".to_string())).status(), 400);
    }

    #[test]
    fn test_parse_body_rejects_bad_json() {
        let result: Result<Value, _> = parse_body(&Body::Text("{not json".to_string()));
        assert_eq!(result.unwrap_err().status(), 400);
        let value: Value = parse_body(&Body::Empty).unwrap();
        assert_eq!(value, json!({}));
    }
}
