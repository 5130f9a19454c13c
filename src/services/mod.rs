pub mod tickets;

pub use tickets::{AssigneeGroup, TicketService};
