//! Shared DynamoDB utilities: predicate rendering and batch reads.
use std::collections::HashMap;

use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::{AttributeValue, KeysAndAttributes};

use crate::query::{Predicate, Scalar};
use crate::store::{StoreError, StoreResult};

/// Always-false filter, used for an empty `IN` or `OR`.
const NEVER: &str = "attribute_not_exists(#id) AND attribute_exists(#id)";

/// Renders predicates into a filter expression, collecting the `#name` and `:value`
/// placeholders it needs.
///
/// # Logic
/// - **Attribute names** are always aliased (`status`, `location` and friends are reserved words).
/// - **Case-insensitive match** reads the lower-cased shadow attribute (`title_lower`) written next to the original.
/// - **Empty conjunctions** render to nothing, so the caller can skip `filter_expression` entirely.
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    next_value: usize,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, attribute: &str) -> String {
        let placeholder = format!("#{}", attribute);
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// `None` when the predicate matches every row.
    pub fn render(&mut self, predicate: &Predicate) -> Option<String> {
        match predicate {
            Predicate::Eq(f, v) => Some(self.comparison(f, "=", v)),
            Predicate::Neq(f, v) => Some(self.comparison(f, "<>", v)),
            Predicate::Gte(f, v) => Some(self.comparison(f, ">=", v)),
            Predicate::Lte(f, v) => Some(self.comparison(f, "<=", v)),
            Predicate::IContains(f, needle) => {
                let name = self.name(&format!("{}_lower", f));
                let value = self.value(AttributeValue::S(needle.to_lowercase()));
                Some(format!("contains({}, {})", name, value))
            }
            Predicate::In(f, set) => {
                if set.is_empty() {
                    return Some(self.never());
                }
                let name = self.name(f);
                let placeholders: Vec<String> = set.iter().map(|v| self.value(scalar_value(v))).collect();
                Some(format!("{} IN ({})", name, placeholders.join(", ")))
            }
            Predicate::Or(ps) => {
                if ps.is_empty() {
                    return Some(self.never());
                }
                let mut parts = Vec::with_capacity(ps.len());
                for p in ps {
                    // one unconstrained branch makes the whole disjunction true
                    parts.push(self.render(p)?);
                }
                Some(format!("({})", parts.join(" OR ")))
            }
            Predicate::And(ps) => {
                let parts: Vec<String> = ps.iter().filter_map(|p| self.render(p)).collect();
                match parts.len() {
                    0 => None,
                    1 => parts.into_iter().next(),
                    _ => Some(format!("({})", parts.join(" AND "))),
                }
            }
        }
    }

    pub fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    pub fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }

    fn comparison(&mut self, field: &str, op: &str, value: &Scalar) -> String {
        let name = self.name(field);
        let value = self.value(scalar_value(value));
        format!("{} {} {}", name, op, value)
    }

    fn never(&mut self) -> String {
        self.name("id");
        NEVER.to_string()
    }
}

pub fn scalar_value(value: &Scalar) -> AttributeValue {
    match value {
        Scalar::Text(s) => AttributeValue::S(s.clone()),
        Scalar::Int(n) | Scalar::Micros(n) => AttributeValue::N(n.to_string()),
        Scalar::Bool(b) => AttributeValue::Bool(*b),
    }
}

pub fn id_key(id: i64) -> HashMap<String, AttributeValue> {
    HashMap::from([("id".to_string(), AttributeValue::N(id.to_string()))])
}

/// Executes a `BatchGetItem` request with automatic retries for unprocessed keys.
///
/// # Logic
/// - **Exponential Backoff**: Waits exponentially longer (200ms, 400ms...) between retries to respect DynamoDB throttling.
/// - **Unprocessed Keys**: Automatically re-queues any keys that DynamoDB couldn't process in the initial batch.
/// - **Accumulation**: Merges results from all retry attempts into a single response map.
pub async fn execute_batch_get_with_retries(
    client: &DynamoDbClient,
    request_items: HashMap<String, KeysAndAttributes>,
) -> StoreResult<HashMap<String, Vec<HashMap<String, AttributeValue>>>> {
    let mut accumulated_responses: HashMap<String, Vec<HashMap<String, AttributeValue>>> = HashMap::new();
    let mut current_request_items = request_items;
    let mut attempts = 0;
    const MAX_RETRIES: u32 = 5;

    loop {
        attempts += 1;
        let output = client.batch_get_item()
            .set_request_items(Some(current_request_items.clone()))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to batch get items: {:?}", e)))?;

        if let Some(responses) = output.responses {
            for (table_name, items) in responses {
                accumulated_responses.entry(table_name).or_default().extend(items);
            }
        }

        let unprocessed = output.unprocessed_keys.unwrap_or_default();
        if unprocessed.is_empty() {
            break;
        }

        if attempts >= MAX_RETRIES {
            tracing::warn!(attempts, "batch get still has unprocessed keys");
            return Err(StoreError::Backend("Exceeded max retries for batch operation. DynamoDB might be throttled.".to_string()));
        }

        tokio::time::sleep(std::time::Duration::from_millis(100 * (2_u64.pow(attempts)))).await;

        current_request_items = unprocessed;
    }

    Ok(accumulated_responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{compose, TicketFilterValues, TicketView};

    #[test]
    fn test_renders_requests_query() {
        let values = TicketFilterValues {
            term: Some("Bomba".to_string()),
            location: Some("M7".to_string()),
            priority: vec!["alta".to_string(), "baja".to_string()],
            ..Default::default()
        };
        let query = compose(TicketView::Requests, &values, 0, 20);
        let mut expr = ExpressionBuilder::new();
        let rendered = expr.render(&query.predicate).unwrap();

        assert_eq!(
            rendered,
            "(#is_accepted = :v0 AND (contains(#title_lower, :v1) OR contains(#requester_lower, :v2)) \
             AND #location = :v3 AND #priority IN (:v4, :v5))"
        );
        let values = expr.values().unwrap();
        assert_eq!(values[":v0"], AttributeValue::Bool(false));
        assert_eq!(values[":v1"], AttributeValue::S("bomba".to_string()));
        assert_eq!(values[":v4"], AttributeValue::S("Alta".to_string()));
        assert_eq!(expr.names().unwrap()["#title_lower"], "title_lower");
    }

    #[test]
    fn test_unconstrained_predicate_renders_nothing() {
        let mut expr = ExpressionBuilder::new();
        assert_eq!(expr.render(&Predicate::all()), None);
        assert_eq!(expr.names(), None);
        assert_eq!(expr.values(), None);
        assert_eq!(expr.render(&Predicate::Or(vec![Predicate::all()])), None);
    }

    #[test]
    fn test_empty_set_never_matches() {
        let mut expr = ExpressionBuilder::new();
        assert_eq!(expr.render(&Predicate::In("status", vec![])), Some(NEVER.to_string()));
        assert_eq!(expr.names().unwrap()["#id"], "id");
    }
}
