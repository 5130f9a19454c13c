//! DynamoDB-backed ticket and assignee tables.
use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    Client,
    types::{AttributeValue, KeysAndAttributes, Put, ReturnValue, TransactWriteItem, Update},
};
use chrono::{DateTime, Utc};

use crate::config::TableNames;
use crate::db_utils::{execute_batch_get_with_retries, id_key, ExpressionBuilder};
use crate::models::{Assignee, CounterValue, CreateTicketRequest, Ticket, TicketSnapshot, UpdateTicketRequest};
use crate::query::board::tally;
use crate::query::{Bucket, BucketCounts, Predicate, Scalar, TicketQuery};
use crate::store::{unique_ids, AssigneeStore, Page, StoreError, StoreResult, TicketStore, TicketUpdate};

/// GSI over every ticket (`gsi_pk = "ALL"`) sorted by id.
const TICKET_ID_INDEX: &str = "TicketIdIndex";
const ALL_PK: &str = "ALL";
const COUNTER_PK: &str = "ticket_id_counter";
const MAX_RETRIES: u32 = 5;
/// DynamoDB's limit on items per transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

pub struct DynamoTicketStore {
    client: Client,
    tables: TableNames,
}

impl DynamoTicketStore {
    pub fn new(client: Client, tables: TableNames) -> Self {
        DynamoTicketStore { client, tables }
    }

    /// Ticket item plus the attributes only the table needs: the index partition and
    /// lower-cased copies for case-insensitive search.
    fn ticket_item(ticket: &Ticket) -> StoreResult<HashMap<String, AttributeValue>> {
        let mut item: HashMap<String, AttributeValue> = serde_dynamo::to_item(ticket)?;
        item.insert("gsi_pk".to_string(), AttributeValue::S(ALL_PK.to_string()));
        item.insert("title_lower".to_string(), AttributeValue::S(ticket.title.to_lowercase()));
        item.insert("requester_lower".to_string(), AttributeValue::S(ticket.requester.to_lowercase()));
        Ok(item)
    }

    /// Walks the id index newest first, handing every row that passes `predicate` to `visit`.
    ///
    /// # Database Interactions
    /// - **`Tickets` Table**: `Query` on `TicketIdIndex` with `gsi_pk = "ALL"`, `ScanIndexForward = false`
    ///   and the rendered filter expression; follows `LastEvaluatedKey` until the index is exhausted.
    async fn walk_index<F>(&self, predicate: &Predicate, projection: Option<&str>, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(HashMap<String, AttributeValue>) -> StoreResult<()>,
    {
        let mut expr = ExpressionBuilder::new();
        let filter = expr.render(predicate);
        let projection = projection.map(|p| {
            p.split(',')
                .map(|attr| expr.name(attr.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        });

        let mut values = expr.values().unwrap_or_default();
        values.insert(":pk".to_string(), AttributeValue::S(ALL_PK.to_string()));

        let base_query = self.client.query()
            .table_name(&self.tables.tickets)
            .index_name(TICKET_ID_INDEX)
            .key_condition_expression("gsi_pk = :pk")
            .scan_index_forward(false)
            .set_filter_expression(filter)
            .set_projection_expression(projection)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(Some(values));

        let mut last_evaluated_key = None;
        loop {
            let output = base_query.clone()
                .set_exclusive_start_key(last_evaluated_key)
                .send()
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to query tickets: {:?}", e)))?;

            for item in output.items.unwrap_or_default() {
                visit(item)?;
            }

            last_evaluated_key = output.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn next_ticket_id(&self) -> StoreResult<i64> {
        let counter = self.client.get_item()
            .table_name(&self.tables.config)
            .key("pk", AttributeValue::S(COUNTER_PK.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read ticket counter: {:?}", e)))?;

        match counter.item {
            Some(item) => {
                let cv: CounterValue = serde_dynamo::from_item(item)?;
                Ok(cv.counter_value)
            }
            None => Ok(0),
        }
    }

    fn is_transaction_conflict<E>(e: &aws_sdk_dynamodb::error::SdkError<E>) -> bool
    where
        E: aws_sdk_dynamodb::error::ProvideErrorMetadata,
    {
        e.as_service_error()
            .and_then(|se| se.code())
            .is_some_and(|code| code == "TransactionCanceledException" || code == "ConditionalCheckFailedException")
    }
}

#[async_trait]
impl TicketStore for DynamoTicketStore {
    /// # Logic
    /// - Every row that passes the filter is counted, only rows inside `query.range` are deserialized.
    /// - The index is walked to the end so `count` is exact.
    async fn fetch_page(&self, query: &TicketQuery) -> StoreResult<Page<Ticket>> {
        let mut data: Vec<Ticket> = Vec::new();
        let mut count = 0u64;
        self.walk_index(&query.predicate, None, |item| {
            if query.range.contains(count) {
                data.push(serde_dynamo::from_item(item)?);
            }
            count += 1;
            Ok(())
        })
        .await?;

        tracing::debug!(count, returned = data.len(), "fetched ticket page");
        Ok(Page { data, count })
    }

    /// Projects only the attributes that decide bucket membership and tallies them.
    async fn count_buckets(&self, scope: &Predicate, buckets: &[Bucket]) -> StoreResult<BucketCounts> {
        let mut rows: Vec<TicketSnapshot> = Vec::new();
        self.walk_index(scope, Some("id, status, is_accepted, location"), |item| {
            rows.push(serde_dynamo::from_item(item)?);
            Ok(())
        })
        .await?;

        Ok(tally(&rows, buckets))
    }

    async fn get(&self, id: i64) -> StoreResult<Ticket> {
        let item = self.client.get_item()
            .table_name(&self.tables.tickets)
            .set_key(Some(id_key(id)))
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to get ticket {}: {:?}", id, e)))?
            .item
            .ok_or(StoreError::NotFound(id))?;

        Ok(serde_dynamo::from_item(item)?)
    }

    /// Creates a ticket under the next sequential id.
    ///
    /// # Database Interactions
    /// One transaction over two tables:
    /// 1. **`Config` Table**: bumps `ticket_id_counter` if it still holds the value read just before.
    /// 2. **`Tickets` Table**: puts the new ticket.
    ///
    /// # Logic & Concurrency
    /// - **Optimistic Locking** on the counter; a concurrent create cancels the transaction
    ///   and the whole read-then-write is retried (up to 5 times).
    async fn insert(&self, request: &CreateTicketRequest, created_at: DateTime<Utc>) -> StoreResult<Ticket> {
        let mut retry_count = 0;

        loop {
            let current_val = self.next_ticket_id().await?;
            let ticket = Ticket::from_request(current_val + 1, request, created_at);

            let update_counter = Update::builder()
                .table_name(&self.tables.config)
                .key("pk", AttributeValue::S(COUNTER_PK.to_string()))
                .update_expression("SET counter_value = :new")
                .condition_expression("counter_value = :old OR attribute_not_exists(counter_value)")
                .expression_attribute_values(":new", AttributeValue::N(ticket.id.to_string()))
                .expression_attribute_values(":old", AttributeValue::N(current_val.to_string()))
                .build()
                .map_err(|e| StoreError::Backend(format!("Failed to build counter update: {:?}", e)))?;

            let put_ticket = Put::builder()
                .table_name(&self.tables.tickets)
                .set_item(Some(Self::ticket_item(&ticket)?))
                .condition_expression("attribute_not_exists(id)")
                .build()
                .map_err(|e| StoreError::Backend(format!("Failed to build ticket Put item: {:?}", e)))?;

            let result = self.client.transact_write_items()
                .transact_items(TransactWriteItem::builder().update(update_counter).build())
                .transact_items(TransactWriteItem::builder().put(put_ticket).build())
                .send()
                .await;

            match result {
                Ok(_) => return Ok(ticket),
                Err(e) => {
                    if Self::is_transaction_conflict(&e) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        tracing::debug!(retry_count, "ticket counter moved, retrying create");
                        continue;
                    }
                    return Err(StoreError::Backend(format!("Failed to execute create ticket transaction: {:?}", e)));
                }
            }
        }
    }

    /// Applies a partial update.
    ///
    /// # Logic & Dynamic Querying
    /// - The `SET` expression is built from the fields present in the patch.
    /// - `ReturnValues = ALL_OLD` gives the previous row; the new one is the patch applied to it.
    async fn update(&self, id: i64, patch: &UpdateTicketRequest) -> StoreResult<TicketUpdate> {
        if patch.is_empty() {
            let current = self.get(id).await?;
            return Ok((current.clone(), current));
        }

        let mut expr = ExpressionBuilder::new();
        let mut sets: Vec<String> = Vec::new();
        let mut set = |expr: &mut ExpressionBuilder, attr: &str, value: AttributeValue| {
            let name = expr.name(attr);
            let placeholder = expr.value(value);
            sets.push(format!("{} = {}", name, placeholder));
        };

        if let Some(t) = &patch.title {
            set(&mut expr, "title", AttributeValue::S(t.clone()));
            set(&mut expr, "title_lower", AttributeValue::S(t.to_lowercase()));
        }
        if let Some(d) = &patch.description {
            set(&mut expr, "description", AttributeValue::S(d.clone()));
        }
        if let Some(l) = &patch.location {
            set(&mut expr, "location", AttributeValue::S(l.clone()));
        }
        if let Some(s) = patch.status {
            set(&mut expr, "status", AttributeValue::S(s.label().to_string()));
        }
        if let Some(p) = patch.priority {
            set(&mut expr, "priority", AttributeValue::S(p.stored().to_string()));
        }
        if let Some(u) = patch.is_urgent {
            set(&mut expr, "is_urgent", AttributeValue::Bool(u));
        }
        if let Some(a) = patch.assignee_id {
            set(&mut expr, "assignee_id", AttributeValue::N(a.to_string()));
        }
        if let Some(d) = patch.deadline_date {
            set(&mut expr, "deadline_date", AttributeValue::S(d.format("%Y-%m-%d").to_string()));
        }
        let id_name = expr.name("id");

        let output = self.client.update_item()
            .table_name(&self.tables.tickets)
            .set_key(Some(id_key(id)))
            .update_expression(format!("SET {}", sets.join(", ")))
            .condition_expression(format!("attribute_exists({})", id_name))
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| {
                if let Some(service_err) = e.as_service_error() && service_err.is_conditional_check_failed_exception() {
                    return StoreError::NotFound(id);
                }
                StoreError::Backend(format!("Failed to update ticket {}: {:?}", id, e))
            })?;

        let old: Ticket = serde_dynamo::from_item(output.attributes.unwrap_or_default())?;
        let mut new = old.clone();
        patch.apply_to(&mut new);
        Ok((old, new))
    }

    /// Accepts a batch of tickets atomically.
    ///
    /// # Database Interactions
    /// 1. **`Tickets` Table (Batch Get)**: current rows, so callers get before/after pairs.
    /// 2. **`Tickets` Table (Transaction)**: one `Update` per ticket, each conditioned on the row existing.
    ///
    /// # Logic
    /// - No partial success: a single missing or concurrently removed row cancels the whole batch.
    async fn accept_many(&self, ids: &[i64], assignee_id: i64) -> StoreResult<Vec<TicketUpdate>> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_TRANSACTION_ITEMS {
            return Err(StoreError::Invalid(format!("at most {} tickets can be accepted at once", MAX_TRANSACTION_ITEMS)));
        }

        let ka = KeysAndAttributes::builder()
            .set_keys(Some(ids.iter().map(|id| id_key(*id)).collect()))
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to build batch get keys for tickets: {:?}", e)))?;
        let request_items = HashMap::from([(self.tables.tickets.clone(), ka)]);
        let output = execute_batch_get_with_retries(&self.client, request_items).await?;

        let found: Vec<Ticket> = serde_dynamo::from_items(output.get(&self.tables.tickets).cloned().unwrap_or_default())?;
        let by_id: HashMap<i64, Ticket> = found.into_iter().map(|t| (t.id, t)).collect();
        if let Some(missing) = ids.iter().find(|id| !by_id.contains_key(id)) {
            return Err(StoreError::NotFound(*missing));
        }

        let mut transaction = self.client.transact_write_items();
        for id in &ids {
            let update = Update::builder()
                .table_name(&self.tables.tickets)
                .set_key(Some(id_key(*id)))
                .update_expression("SET is_accepted = :t, assignee_id = :a")
                .condition_expression("attribute_exists(id)")
                .expression_attribute_values(":t", AttributeValue::Bool(true))
                .expression_attribute_values(":a", AttributeValue::N(assignee_id.to_string()))
                .build()
                .map_err(|e| StoreError::Backend(format!("Failed to build accept update: {:?}", e)))?;
            transaction = transaction.transact_items(TransactWriteItem::builder().update(update).build());
        }

        transaction.send().await.map_err(|e| {
            if Self::is_transaction_conflict(&e) {
                return StoreError::Conflict("a ticket in the batch was removed or modified concurrently".to_string());
            }
            StoreError::Backend(format!("Failed to execute accept transaction: {:?}", e))
        })?;

        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|old| {
                let mut new = old.clone();
                new.is_accepted = true;
                new.assignee_id = Some(assignee_id);
                (old.clone(), new)
            })
            .collect())
    }

    /// Appends a stored path to the ticket's image list, guarded on the list it read.
    async fn append_image(&self, id: i64, path: &str) -> StoreResult<Ticket> {
        let mut retry_count = 0;

        loop {
            let mut ticket = self.get(id).await?;
            let image = ticket.image_with(path);

            let result = self.client.update_item()
                .table_name(&self.tables.tickets)
                .set_key(Some(id_key(id)))
                .update_expression("SET image = :new")
                .condition_expression("image = :old OR attribute_not_exists(image)")
                .expression_attribute_values(":new", AttributeValue::S(image.clone()))
                .expression_attribute_values(":old", AttributeValue::S(ticket.image.clone()))
                .send()
                .await;

            match result {
                Ok(_) => {
                    ticket.image = image;
                    return Ok(ticket);
                }
                Err(e) => {
                    if Self::is_transaction_conflict(&e) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        continue;
                    }
                    return Err(StoreError::Backend(format!("Failed to append image to ticket {}: {:?}", id, e)));
                }
            }
        }
    }
}

#[async_trait]
impl AssigneeStore for DynamoTicketStore {
    /// # Database Interactions
    /// - **`Assignees` Table**: paginated `Scan` filtered to `is_active = true`.
    async fn list_active(&self) -> StoreResult<Vec<Assignee>> {
        let mut expr = ExpressionBuilder::new();
        let filter = expr.render(&Predicate::Eq("is_active", Scalar::Bool(true)));

        let base_scan = self.client.scan()
            .table_name(&self.tables.assignees)
            .set_filter_expression(filter)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values());

        let mut assignees: Vec<Assignee> = Vec::new();
        let mut last_evaluated_key = None;
        loop {
            let output = base_scan.clone()
                .set_exclusive_start_key(last_evaluated_key)
                .send()
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to scan assignees: {:?}", e)))?;

            let page: Vec<Assignee> = serde_dynamo::from_items(output.items.unwrap_or_default())?;
            assignees.extend(page);

            last_evaluated_key = output.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
        }

        Ok(assignees)
    }
}
