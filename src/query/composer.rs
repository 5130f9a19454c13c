//! Turns the filter values of a ticket view into a single store query.
use chrono::{NaiveDate, NaiveTime};

use crate::filters::{DateRange, FilterState, FilterValue, TicketFilterKey};
use crate::models::{Priority, Status};
use crate::query::board::{bucket_predicate, Bucket};
use crate::query::{Predicate, Scalar};

/// Shorter search terms add no text clause.
pub const MIN_TERM_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketView {
    /// Unaccepted tickets (inbox / work requests).
    Requests,
    /// One kanban column.
    Status(Status),
}

impl TicketView {
    fn base(self) -> Predicate {
        match self {
            TicketView::Requests => bucket_predicate(Bucket::Requests),
            TicketView::Status(status) => bucket_predicate(Bucket::Column(status)),
        }
    }
}

/// Inclusive row window, `[page * size, page * size + size - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub from: u64,
    pub to: u64,
}

impl RowRange {
    pub fn for_page(page: u64, page_size: u64) -> Self {
        let size = page_size.max(1);
        let from = page.saturating_mul(size);
        RowRange { from, to: from.saturating_add(size - 1) }
    }

    pub fn contains(&self, index: u64) -> bool {
        index >= self.from && index <= self.to
    }
}

/// Rows always come back newest first (descending id).
#[derive(Debug, Clone, PartialEq)]
pub struct TicketQuery {
    pub view: TicketView,
    pub predicate: Predicate,
    pub range: RowRange,
}

/// Values of the keys the ticket composer understands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilterValues {
    pub term: Option<String>,
    pub location: Option<String>,
    pub accepted: Option<bool>,
    pub created: DateRange,
    pub has_image: bool,
    /// Lowercase priority keys.
    pub priority: Vec<String>,
    /// Status labels.
    pub status: Vec<String>,
}

impl TicketFilterValues {
    pub fn from_state(state: &FilterState<TicketFilterKey>) -> Self {
        let mut values = TicketFilterValues::default();
        for (key, value) in state.values() {
            match (key, value) {
                (TicketFilterKey::Search, FilterValue::Text(s)) => values.term = Some(s.clone()),
                (TicketFilterKey::Location, FilterValue::Text(s)) => values.location = Some(s.clone()),
                (TicketFilterKey::Accepted, FilterValue::Flag(b)) => values.accepted = Some(*b),
                (TicketFilterKey::CreatedAt, FilterValue::Range(r)) => values.created = r.clone(),
                (TicketFilterKey::HasImage, FilterValue::Flag(b)) => values.has_image = *b,
                (TicketFilterKey::Priority, FilterValue::Many(v)) => values.priority = v.clone(),
                (TicketFilterKey::Status, FilterValue::Many(v)) => values.status = v.clone(),
                _ => {}
            }
        }
        values
    }
}

/// Title or requester contains the term, or the term is the ticket id.
pub fn term_clause(term: &str) -> Option<Predicate> {
    let term = term.trim();
    if term.chars().count() < MIN_TERM_LEN {
        return None;
    }
    let mut any = vec![
        Predicate::IContains("title", term.to_string()),
        Predicate::IContains("requester", term.to_string()),
    ];
    if let Ok(id) = term.parse::<i64>() {
        any.push(Predicate::Eq("id", Scalar::Int(id)));
    }
    Some(Predicate::Or(any))
}

fn location_clause(location: Option<&str>) -> Option<Predicate> {
    location
        .filter(|l| !l.is_empty())
        .map(|l| Predicate::Eq("location", Scalar::Text(l.to_string())))
}

fn start_of_day(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_micros()
}

fn end_of_day(date: NaiveDate) -> i64 {
    let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    date.and_time(end).and_utc().timestamp_micros()
}

pub fn compose(view: TicketView, values: &TicketFilterValues, page: u64, page_size: u64) -> TicketQuery {
    let mut predicate = view.base();

    if let Some(clause) = values.term.as_deref().and_then(term_clause) {
        predicate = predicate.and(clause);
    }
    if let Some(clause) = location_clause(values.location.as_deref()) {
        predicate = predicate.and(clause);
    }
    if let Some(accepted) = values.accepted {
        predicate = predicate.and(Predicate::Eq("is_accepted", Scalar::Bool(accepted)));
    }
    if let Some(from) = values.created.from {
        predicate = predicate.and(Predicate::Gte("created_at", Scalar::Micros(start_of_day(from))));
    }
    if let Some(to) = values.created.to {
        predicate = predicate.and(Predicate::Lte("created_at", Scalar::Micros(end_of_day(to))));
    }
    if values.has_image {
        predicate = predicate.and(Predicate::Neq("image", Scalar::Text(String::new())));
    }

    let priorities: Vec<Scalar> = values
        .priority
        .iter()
        .filter_map(|k| Priority::from_key(k))
        .map(|p| Scalar::Text(p.stored().to_string()))
        .collect();
    if !priorities.is_empty() {
        predicate = predicate.and(Predicate::In("priority", priorities));
    }

    let statuses: Vec<Scalar> = values
        .status
        .iter()
        .filter_map(|s| Status::from_label(s))
        .map(|s| Scalar::Text(s.label().to_string()))
        .collect();
    if !statuses.is_empty() {
        predicate = predicate.and(Predicate::In("status", statuses));
    }

    TicketQuery { view, predicate, range: RowRange::for_page(page, page_size) }
}

/// Filters the badge counts honour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountScope {
    pub term: Option<String>,
    pub location: Option<String>,
}

impl CountScope {
    pub fn predicate(&self) -> Predicate {
        let mut predicate = Predicate::all();
        if let Some(clause) = self.term.as_deref().and_then(term_clause) {
            predicate = predicate.and(clause);
        }
        if let Some(clause) = location_clause(self.location.as_deref()) {
            predicate = predicate.and(clause);
        }
        predicate
    }
}
