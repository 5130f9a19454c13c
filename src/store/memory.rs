//! In-process ticket store.
//!
//! Evaluates the same predicate tree the DynamoDB store renders, which makes it the
//! reference for what a composed query returns. Used by the tests and for local runs
//! without AWS credentials.
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Assignee, CreateTicketRequest, Ticket, UpdateTicketRequest};
use crate::query::board::tally;
use crate::query::{Bucket, BucketCounts, Predicate, TicketQuery};
use crate::store::{unique_ids, AssigneeStore, Page, StoreError, StoreResult, TicketStore, TicketUpdate};

#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<BTreeMap<i64, Ticket>>,
    assignees: Mutex<Vec<Assignee>>,
    offline: AtomicBool,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tickets(tickets: Vec<Ticket>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.tickets.lock() {
            map.extend(tickets.into_iter().map(|t| (t.id, t)));
        }
        store
    }

    pub fn with_assignees(self, assignees: Vec<Assignee>) -> Self {
        if let Ok(mut list) = self.assignees.lock() {
            *list = assignees;
        }
        self
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every stored ticket, in id order.
    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.tickets.lock().map(|t| t.values().cloned().collect()).unwrap_or_default()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<i64, Ticket>>> {
        self.tickets.lock().map_err(|_| StoreError::Backend("ticket table lock poisoned".to_string()))
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn fetch_page(&self, query: &TicketQuery) -> StoreResult<Page<Ticket>> {
        self.check_online()?;
        let tickets = self.lock()?;

        let mut data = Vec::new();
        let mut count = 0u64;
        for ticket in tickets.values().rev().filter(|t| query.predicate.matches(*t)) {
            if query.range.contains(count) {
                data.push(ticket.clone());
            }
            count += 1;
        }
        Ok(Page { data, count })
    }

    async fn count_buckets(&self, scope: &Predicate, buckets: &[Bucket]) -> StoreResult<BucketCounts> {
        self.check_online()?;
        let tickets = self.lock()?;
        Ok(tally(tickets.values().filter(|t| scope.matches(*t)), buckets))
    }

    async fn get(&self, id: i64) -> StoreResult<Ticket> {
        self.check_online()?;
        self.lock()?.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, request: &CreateTicketRequest, created_at: DateTime<Utc>) -> StoreResult<Ticket> {
        self.check_online()?;
        let mut tickets = self.lock()?;
        let id = tickets.keys().next_back().map_or(1, |last| last + 1);
        let ticket = Ticket::from_request(id, request, created_at);
        tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn update(&self, id: i64, patch: &UpdateTicketRequest) -> StoreResult<TicketUpdate> {
        self.check_online()?;
        let mut tickets = self.lock()?;
        let ticket = tickets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let old = ticket.clone();
        patch.apply_to(ticket);
        Ok((old, ticket.clone()))
    }

    async fn accept_many(&self, ids: &[i64], assignee_id: i64) -> StoreResult<Vec<TicketUpdate>> {
        self.check_online()?;
        let ids = unique_ids(ids);
        let mut tickets = self.lock()?;
        if let Some(missing) = ids.iter().find(|id| !tickets.contains_key(id)) {
            return Err(StoreError::NotFound(*missing));
        }

        let mut updates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ticket) = tickets.get_mut(&id) {
                let old = ticket.clone();
                ticket.is_accepted = true;
                ticket.assignee_id = Some(assignee_id);
                updates.push((old, ticket.clone()));
            }
        }
        Ok(updates)
    }

    async fn append_image(&self, id: i64, path: &str) -> StoreResult<Ticket> {
        self.check_online()?;
        let mut tickets = self.lock()?;
        let ticket = tickets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        ticket.image = ticket.image_with(path);
        Ok(ticket.clone())
    }
}

#[async_trait]
impl AssigneeStore for MemoryTicketStore {
    async fn list_active(&self) -> StoreResult<Vec<Assignee>> {
        self.check_online()?;
        let assignees = self
            .assignees
            .lock()
            .map_err(|_| StoreError::Backend("assignee table lock poisoned".to_string()))?;
        Ok(assignees.iter().filter(|a| a.is_active).cloned().collect())
    }
}

#[cfg(test)]
pub fn ticket_fixture(id: i64, location: &str) -> Ticket {
    use chrono::{NaiveDate, TimeZone};
    use crate::models::{Priority, Status};

    Ticket {
        id,
        title: format!("Ticket {}", id),
        description: "Revisión".to_string(),
        requester: "Solicitante".to_string(),
        email: None,
        phone: None,
        location: location.to_string(),
        status: Status::Pendiente,
        priority: Priority::Media,
        is_urgent: false,
        is_accepted: false,
        assignee_id: None,
        incident_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single().unwrap_or_default(),
        deadline_date: None,
        image: String::new(),
    }
}
