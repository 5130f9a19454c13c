//! Handler modules for Lambda function

pub mod assignees;
pub mod attachments;
pub mod inventory;
pub mod tickets;
pub mod version;

// Re-export handler functions for convenience
pub use assignees::handle_list_assignees;
pub use attachments::handle_upload_image;
pub use inventory::handle_record_inventory_operation;
pub use tickets::{
    handle_accept_ticket, handle_accept_tickets, handle_create_ticket, handle_get_counts, handle_search_requests,
    handle_search_work_orders, handle_update_ticket, query_param,
};
pub use version::handle_get_version;
