//! Query composition for the ticket views.
pub mod board;
pub mod composer;
pub mod predicate;

pub use board::{board_buckets, bucket_predicate, in_inbox, in_kanban_column, Bucket, BucketCounts};
pub use composer::{compose, CountScope, RowRange, TicketFilterValues, TicketQuery, TicketView};
pub use predicate::{Filterable, Predicate, Scalar};
