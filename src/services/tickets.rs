//! Ticket operations shared by the HTTP handlers.
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use validator::Validate;

use crate::models::{
    AcceptTicketsRequest, Assignee, CreateTicketRequest, Section, Status, Ticket, TicketChange, UpdateTicketRequest,
};
use crate::query::{board_buckets, compose, BucketCounts, CountScope, TicketFilterValues, TicketView};
use crate::realtime::ChangeFeed;
use crate::store::{AssigneeStore, Page, StoreError, StoreResult, TicketStore, TicketUpdate};

/// Active assignees of one section, sorted by name.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssigneeGroup {
    pub section: Section,
    pub assignees: Vec<Assignee>,
}

pub struct TicketService<S> {
    store: Arc<S>,
    feed: ChangeFeed,
}

impl<S> TicketService<S>
where
    S: TicketStore + AssigneeStore + 'static,
{
    pub fn new(store: Arc<S>, feed: ChangeFeed) -> Self {
        TicketService { store, feed }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Unaccepted tickets (work requests), newest first.
    pub async fn search_requests(&self, values: &TicketFilterValues, page: u64, page_size: u64) -> StoreResult<Page<Ticket>> {
        self.store.fetch_page(&compose(TicketView::Requests, values, page, page_size)).await
    }

    /// One kanban column, newest first.
    pub async fn search_by_status(
        &self,
        status: Status,
        values: &TicketFilterValues,
        page: u64,
        page_size: u64,
    ) -> StoreResult<Page<Ticket>> {
        self.store.fetch_page(&compose(TicketView::Status(status), values, page, page_size)).await
    }

    /// Inbox and kanban badge counts within `scope`.
    pub async fn status_counts(&self, scope: &CountScope) -> StoreResult<BucketCounts> {
        self.store.count_buckets(&scope.predicate(), &board_buckets()).await
    }

    /// Validates before touching the store; a new ticket is pending and unaccepted.
    pub async fn create_ticket(&self, request: &CreateTicketRequest) -> StoreResult<Ticket> {
        request.validate()?;
        let ticket = self.store.insert(request, Utc::now()).await?;
        tracing::info!(ticket_id = ticket.id, location = %ticket.location, "ticket created");
        Ok(ticket)
    }

    pub async fn update_ticket(&self, id: i64, patch: &UpdateTicketRequest) -> StoreResult<Ticket> {
        patch.validate()?;
        let (old, new) = self.store.update(id, patch).await?;
        self.publish(&old, &new);
        Ok(new)
    }

    /// Accepts a single ticket and assigns it.
    pub async fn accept_ticket(&self, id: i64, assignee_id: i64) -> StoreResult<Ticket> {
        let mut updates = self.accept(&[id], assignee_id).await?;
        updates.pop().map(|(_, new)| new).ok_or(StoreError::NotFound(id))
    }

    /// All or nothing: one failure leaves every ticket untouched.
    pub async fn accept_tickets(&self, request: &AcceptTicketsRequest) -> StoreResult<Vec<Ticket>> {
        request.validate()?;
        let updates = self.accept(&request.ids, request.assignee_id).await?;
        Ok(updates.into_iter().map(|(_, new)| new).collect())
    }

    pub async fn attach_image(&self, id: i64, path: &str) -> StoreResult<Ticket> {
        let ticket = self.store.append_image(id, path).await?;
        self.publish(&ticket, &ticket);
        Ok(ticket)
    }

    pub async fn list_assignees(&self) -> StoreResult<Vec<AssigneeGroup>> {
        let mut assignees = self.store.list_active().await?;
        assignees.sort_by(|a, b| {
            a.section
                .cmp(&b.section)
                .then_with(|| a.full_name().to_lowercase().cmp(&b.full_name().to_lowercase()))
        });

        let mut groups: Vec<AssigneeGroup> = Vec::new();
        for assignee in assignees {
            match groups.last_mut() {
                Some(group) if group.section == assignee.section => group.assignees.push(assignee),
                _ => groups.push(AssigneeGroup { section: assignee.section, assignees: vec![assignee] }),
            }
        }
        Ok(groups)
    }

    async fn accept(&self, ids: &[i64], assignee_id: i64) -> StoreResult<Vec<TicketUpdate>> {
        let updates = self.store.accept_many(ids, assignee_id).await.inspect_err(|e| {
            tracing::warn!(error = %e, count = ids.len(), "ticket acceptance failed");
        })?;
        for (old, new) in &updates {
            self.publish(old, new);
        }
        tracing::info!(count = updates.len(), assignee_id, "tickets accepted");
        Ok(updates)
    }

    fn publish(&self, old: &Ticket, new: &Ticket) {
        self.feed.publish(TicketChange::between(old, new));
    }
}
