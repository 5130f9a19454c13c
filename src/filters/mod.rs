pub mod schema;
pub mod state;
pub mod tickets;

pub use schema::{DateRange, FieldType, FilterField, FilterKey, FilterSchema, FilterValue, Placement, SelectOption};
pub use state::{FilterState, QuerySink};
pub use tickets::{work_orders_schema, work_requests_schema, TicketFilterKey};
