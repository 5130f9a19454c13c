//! Which view surfaces a ticket.
//!
//! A ticket only reaches the "Pendiente" kanban column once it has been accepted;
//! until then it lives in the work-request inbox. Every caller (the list composer,
//! the badge counts and the optimistic counter) goes through [`bucket_predicate`].
use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::models::Status;
use crate::query::{Filterable, Predicate, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// Unaccepted tickets awaiting triage.
    Requests,
    Column(Status),
}

impl Bucket {
    pub fn key(self) -> &'static str {
        match self {
            Bucket::Requests => "requests",
            Bucket::Column(s) => s.label(),
        }
    }
}

impl Serialize for Bucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

pub type BucketCounts = BTreeMap<Bucket, u64>;

/// The inbox plus every kanban column.
pub fn board_buckets() -> Vec<Bucket> {
    std::iter::once(Bucket::Requests)
        .chain(Status::KANBAN.into_iter().map(Bucket::Column))
        .collect()
}

pub fn bucket_predicate(bucket: Bucket) -> Predicate {
    match bucket {
        Bucket::Requests => Predicate::Eq("is_accepted", Scalar::Bool(false)),
        Bucket::Column(Status::Pendiente) => Predicate::And(vec![
            Predicate::Eq("status", Scalar::Text(Status::Pendiente.label().to_string())),
            Predicate::Eq("is_accepted", Scalar::Bool(true)),
        ]),
        Bucket::Column(status) => Predicate::Eq("status", Scalar::Text(status.label().to_string())),
    }
}

pub fn in_kanban_column<R: Filterable + ?Sized>(record: &R, status: Status) -> bool {
    bucket_predicate(Bucket::Column(status)).matches(record)
}

pub fn in_inbox<R: Filterable + ?Sized>(record: &R) -> bool {
    bucket_predicate(Bucket::Requests).matches(record)
}

/// Tracked buckets a record belongs to, possibly none.
pub fn buckets_of<R: Filterable + ?Sized>(record: &R, tracked: &[Bucket]) -> Vec<Bucket> {
    tracked
        .iter()
        .copied()
        .filter(|b| bucket_predicate(*b).matches(record))
        .collect()
}

/// Zero-filled tally of `rows` over `tracked`.
pub fn tally<'a, R, I>(rows: I, tracked: &[Bucket]) -> BucketCounts
where
    R: Filterable + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut counts: BucketCounts = tracked.iter().map(|b| (*b, 0)).collect();
    for row in rows {
        for bucket in buckets_of(row, tracked) {
            *counts.entry(bucket).or_default() += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketSnapshot;

    fn snap(status: Status, is_accepted: bool) -> TicketSnapshot {
        TicketSnapshot { id: 1, status, is_accepted, location: "M7".to_string() }
    }

    #[test]
    fn test_pending_column_requires_acceptance() {
        let accepted = snap(Status::Pendiente, true);
        let waiting = snap(Status::Pendiente, false);

        assert!(in_kanban_column(&accepted, Status::Pendiente));
        assert!(!in_inbox(&accepted));

        assert!(!in_kanban_column(&waiting, Status::Pendiente));
        assert!(in_inbox(&waiting));
    }

    #[test]
    fn test_other_columns_follow_status() {
        let running = snap(Status::EnEjecucion, true);
        assert_eq!(buckets_of(&running, &board_buckets()), vec![Bucket::Column(Status::EnEjecucion)]);
    }

    #[test]
    fn test_tally_is_zero_filled() {
        let rows = vec![snap(Status::Pendiente, false), snap(Status::Pendiente, true), snap(Status::Pendiente, true)];
        let counts = tally(&rows, &board_buckets());
        assert_eq!(counts[&Bucket::Requests], 1);
        assert_eq!(counts[&Bucket::Column(Status::Pendiente)], 2);
        assert_eq!(counts[&Bucket::Column(Status::Finalizadas)], 0);
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn test_bucket_serializes_as_key() {
        assert_eq!(serde_json::to_string(&Bucket::Column(Status::EnEjecucion)).unwrap(), "\"En Ejecución\"");
        assert_eq!(serde_json::to_string(&Bucket::Requests).unwrap(), "\"requests\"");
    }
}
