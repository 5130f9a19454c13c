//! Inventory counts recorded on the device while offline and pushed once the service
//! is reachable.
pub mod queue;
pub mod sink;

pub use queue::{OfflineQueue, QueueError, QueueResult, QueueSummary, SyncReport};
pub use sink::{DynamoInventoryRecorder, HttpInventorySink, InventorySink, MemoryInventorySink, SinkError, SubmitOutcome};
