//! Ticket image upload handler

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;
use lambda_http::{Body, Response};
use serde_json::{json, Value};

use crate::http::{error_response, generate_short_id, store_error_response};
use crate::services::TicketService;
use crate::store::{AssigneeStore, TicketStore};

/// Object key for an uploaded image: `tickets/{id}/{short id}_{file name}`.
pub fn image_key(ticket_id: i64, file_name: &str) -> String {
    let safe_name: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("tickets/{}/{}_{}", ticket_id, generate_short_id(8), safe_name)
}

/// Stores an image and appends its path to the ticket.
///
/// # Logic
/// - The ticket is looked up first so nothing is uploaded for an unknown id.
/// - The path, not a URL, is what the ticket records; readers sign their own URLs.
pub async fn handle_upload_image<S>(
    ticket_id: i64,
    base64_data: &str,
    file_name: &str,
    s3_client: &S3Client,
    bucket_name: &str,
    service: &TicketService<S>,
) -> Result<Value, Response<Body>>
where
    S: TicketStore + AssigneeStore + 'static,
{
    let file_bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_data)
        .map_err(|e| error_response(400, "Invalid base64 data", &format!("Could not decode base64 data: {}", e), None))?;

    service.store().get(ticket_id).await.map_err(|e| store_error_response(&e))?;

    let s3_key = image_key(ticket_id, file_name);
    s3_client
        .put_object()
        .bucket(bucket_name)
        .key(&s3_key)
        .body(ByteStream::from(file_bytes))
        .send()
        .await
        .map_err(|e| {
            error_response(
                500,
                "S3 upload failed",
                &format!("Failed to upload file to S3: {}", e),
                Some("Check that the Lambda has S3 permissions and the bucket exists"),
            )
        })?;

    let ticket = service.attach_image(ticket_id, &s3_key).await.map_err(|e| store_error_response(&e))?;
    tracing::info!(ticket_id, key = %s3_key, "ticket image stored");

    Ok(json!({ "path": s3_key, "ticket": ticket }))
}
