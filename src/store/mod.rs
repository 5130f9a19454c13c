//! Access to the hosted ticket tables.
pub mod dynamo;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{Assignee, CreateTicketRequest, Ticket, UpdateTicketRequest};
use crate::query::{Bucket, BucketCounts, Predicate, TicketQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_dynamo::Error),

    #[error("ticket {0} not found")]
    NotFound(i64),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One page of rows plus the total number of matches.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub count: u64,
}

/// Ticket before and after a write.
pub type TicketUpdate = (Ticket, Ticket);

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Rows of `query.range`, newest first, with the total match count.
    async fn fetch_page(&self, query: &TicketQuery) -> StoreResult<Page<Ticket>>;

    /// Tickets within `scope` per tracked bucket, zero-filled.
    async fn count_buckets(&self, scope: &Predicate, buckets: &[Bucket]) -> StoreResult<BucketCounts>;

    async fn get(&self, id: i64) -> StoreResult<Ticket>;

    /// Allocates the next id and stores a pending, unaccepted ticket.
    async fn insert(&self, request: &CreateTicketRequest, created_at: DateTime<Utc>) -> StoreResult<Ticket>;

    async fn update(&self, id: i64, patch: &UpdateTicketRequest) -> StoreResult<TicketUpdate>;

    /// Accepts every ticket and assigns it, or none of them.
    async fn accept_many(&self, ids: &[i64], assignee_id: i64) -> StoreResult<Vec<TicketUpdate>>;

    async fn append_image(&self, id: i64, path: &str) -> StoreResult<Ticket>;
}

#[async_trait]
pub trait AssigneeStore: Send + Sync {
    async fn list_active(&self) -> StoreResult<Vec<Assignee>>;
}

/// Ids in request order without repeats.
pub fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}
