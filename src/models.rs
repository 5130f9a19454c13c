use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::query::{Filterable, Scalar};

/// Location codes a ticket can be filed against.
pub const LOCATIONS: &[&str] = &[
    "M1", "M2", "M3", "M4", "M5", "M6", "M7", "M8", "M9", "M10", "M11", "M12",
    "ADMINISTRACION", "ALMACEN", "TALLER", "EXTERIOR",
];

pub fn is_known_location(location: &str) -> bool {
    LOCATIONS.contains(&location)
}

fn validate_location(location: &str) -> Result<(), ValidationError> {
    if is_known_location(location) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_location"))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Nueva,
    Aprobada,
    Rechazada,
    Pendiente,
    #[serde(rename = "En Ejecución")]
    EnEjecucion,
    Finalizadas,
}

impl Status {
    /// Columns of the work-order board, in display order.
    pub const KANBAN: [Status; 3] = [Status::Pendiente, Status::EnEjecucion, Status::Finalizadas];

    pub fn label(self) -> &'static str {
        match self {
            Status::Nueva => "Nueva",
            Status::Aprobada => "Aprobada",
            Status::Rechazada => "Rechazada",
            Status::Pendiente => "Pendiente",
            Status::EnEjecucion => "En Ejecución",
            Status::Finalizadas => "Finalizadas",
        }
    }

    pub fn from_label(label: &str) -> Option<Status> {
        [
            Status::Nueva,
            Status::Aprobada,
            Status::Rechazada,
            Status::Pendiente,
            Status::EnEjecucion,
            Status::Finalizadas,
        ]
        .into_iter()
        .find(|s| s.label() == label)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    #[serde(alias = "baja")]
    Baja,
    #[serde(alias = "media")]
    Media,
    #[serde(alias = "alta")]
    Alta,
}

impl Priority {
    /// Value as stored in the tickets table.
    pub fn stored(self) -> &'static str {
        match self {
            Priority::Baja => "Baja",
            Priority::Media => "Media",
            Priority::Alta => "Alta",
        }
    }

    /// Lowercase key used by the filter bar and the URL.
    pub fn key(self) -> &'static str {
        match self {
            Priority::Baja => "baja",
            Priority::Media => "media",
            Priority::Alta => "alta",
        }
    }

    pub fn from_key(key: &str) -> Option<Priority> {
        match key {
            "baja" => Some(Priority::Baja),
            "media" => Some(Priority::Media),
            "alta" => Some(Priority::Alta),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub requester: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub location: String,
    pub status: Status,
    pub priority: Priority,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    pub incident_date: NaiveDate,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_date: Option<NaiveDate>,
    /// Stored file paths, serialized as a JSON array. Empty string when there are none.
    #[serde(default)]
    pub image: String,
}

impl Ticket {
    /// New tickets start pending and unaccepted.
    pub fn from_request(id: i64, request: &CreateTicketRequest, created_at: DateTime<Utc>) -> Self {
        Ticket {
            id,
            title: request.title.clone(),
            description: request.description.clone(),
            requester: request.requester.clone(),
            email: request.email.clone().filter(|e| !e.is_empty()),
            phone: request.phone.clone().filter(|p| !p.is_empty()),
            location: request.location.clone(),
            status: Status::Pendiente,
            priority: request.priority,
            is_urgent: request.is_urgent,
            is_accepted: false,
            assignee_id: None,
            incident_date: request.incident_date,
            created_at,
            deadline_date: request.deadline_date,
            image: String::new(),
        }
    }

    pub fn snapshot(&self) -> TicketSnapshot {
        TicketSnapshot {
            id: self.id,
            status: self.status,
            is_accepted: self.is_accepted,
            location: self.location.clone(),
        }
    }

    /// Older rows hold a bare path instead of an array.
    pub fn image_paths(&self) -> Vec<String> {
        if self.image.is_empty() {
            return Vec::new();
        }
        serde_json::from_str::<Vec<String>>(&self.image).unwrap_or_else(|_| vec![self.image.clone()])
    }

    pub fn image_with(&self, path: &str) -> String {
        let mut paths = self.image_paths();
        paths.push(path.to_string());
        serialize_image_paths(&paths)
    }
}

pub fn serialize_image_paths(paths: &[String]) -> String {
    if paths.is_empty() {
        return String::new();
    }
    serde_json::to_string(paths).unwrap_or_default()
}

impl Filterable for Ticket {
    fn field(&self, name: &str) -> Option<Scalar> {
        match name {
            "id" => Some(Scalar::Int(self.id)),
            "title" => Some(Scalar::Text(self.title.clone())),
            "description" => Some(Scalar::Text(self.description.clone())),
            "requester" => Some(Scalar::Text(self.requester.clone())),
            "location" => Some(Scalar::Text(self.location.clone())),
            "status" => Some(Scalar::Text(self.status.label().to_string())),
            "priority" => Some(Scalar::Text(self.priority.stored().to_string())),
            "is_urgent" => Some(Scalar::Bool(self.is_urgent)),
            "is_accepted" => Some(Scalar::Bool(self.is_accepted)),
            "assignee_id" => self.assignee_id.map(Scalar::Int),
            "created_at" => Some(Scalar::Micros(self.created_at.timestamp_micros())),
            "image" => Some(Scalar::Text(self.image.clone())),
            _ => None,
        }
    }
}

/// The slice of a ticket that decides which board bucket it lands in.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TicketSnapshot {
    pub id: i64,
    pub status: Status,
    #[serde(default)]
    pub is_accepted: bool,
    pub location: String,
}

impl Filterable for TicketSnapshot {
    fn field(&self, name: &str) -> Option<Scalar> {
        match name {
            "id" => Some(Scalar::Int(self.id)),
            "status" => Some(Scalar::Text(self.status.label().to_string())),
            "is_accepted" => Some(Scalar::Bool(self.is_accepted)),
            "location" => Some(Scalar::Text(self.location.clone())),
            _ => None,
        }
    }
}

/// One row-update notification from the change feed.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TicketChange {
    pub old: TicketSnapshot,
    pub new: TicketSnapshot,
}

impl TicketChange {
    pub fn between(old: &Ticket, new: &Ticket) -> Self {
        TicketChange { old: old.snapshot(), new: new.snapshot() }
    }

    /// True when status, acceptance or location moved.
    pub fn changes_board_state(&self) -> bool {
        self.old.status != self.new.status
            || self.old.is_accepted != self.new.is_accepted
            || self.old.location != self.new.location
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    #[serde(rename = "SIN ASIGNAR")]
    SinAsignar,
    Internos,
    #[serde(rename = "TERCEROS")]
    Terceros,
    #[serde(rename = "OTROS")]
    Otros,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Assignee {
    pub id: i64,
    pub name: String,
    pub last_name: String,
    pub section: Section,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Assignee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct CounterValue {
    pub counter_value: i64,
}

// Request Bodies
#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 30, message = "title must be 1-30 characters"))]
    pub title: String,
    #[validate(length(max = 60, message = "description must be at most 60 characters"))]
    pub description: String,
    #[validate(length(min = 1, message = "requester is required"))]
    pub requester: String,
    #[validate(email(message = "email is not valid"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(custom(function = "validate_location", message = "location is not in the list"))]
    pub location: String,
    pub priority: Priority,
    #[serde(default)]
    pub is_urgent: bool,
    pub incident_date: NaiveDate,
    pub deadline_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, Validate)]
pub struct UpdateTicketRequest {
    #[validate(length(min = 1, max = 30, message = "title must be 1-30 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 60, message = "description must be at most 60 characters"))]
    pub description: Option<String>,
    #[validate(custom(function = "validate_location", message = "location is not in the list"))]
    pub location: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub is_urgent: Option<bool>,
    pub assignee_id: Option<i64>,
    pub deadline_date: Option<NaiveDate>,
}

impl UpdateTicketRequest {
    pub fn apply_to(&self, ticket: &mut Ticket) {
        if let Some(t) = &self.title {
            ticket.title = t.clone();
        }
        if let Some(d) = &self.description {
            ticket.description = d.clone();
        }
        if let Some(l) = &self.location {
            ticket.location = l.clone();
        }
        if let Some(s) = self.status {
            ticket.status = s;
        }
        if let Some(p) = self.priority {
            ticket.priority = p;
        }
        if let Some(u) = self.is_urgent {
            ticket.is_urgent = u;
        }
        if let Some(a) = self.assignee_id {
            ticket.assignee_id = Some(a);
        }
        if let Some(d) = self.deadline_date {
            ticket.deadline_date = Some(d);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.is_urgent.is_none()
            && self.assignee_id.is_none()
            && self.deadline_date.is_none()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct AcceptTicketsRequest {
    #[validate(length(min = 1, max = 100, message = "between 1 and 100 tickets can be accepted at once"))]
    pub ids: Vec<i64>,
    pub assignee_id: i64,
}

// Offline inventory counts
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct InventoryPayload {
    #[validate(length(min = 1, message = "item is required"))]
    pub item: String,
    #[validate(range(min = 0.0, message = "quantity cannot be negative"))]
    pub quantity: f64,
    #[validate(length(min = 1, message = "unit is required"))]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct NewInventoryCount {
    #[validate(length(min = 1, message = "inventory count id is required"))]
    pub inventory_count_id: String,
    #[validate(nested)]
    pub payload: InventoryPayload,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InventoryOperation {
    pub operation_id: Uuid,
    pub inventory_count_id: String,
    pub payload: InventoryPayload,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Position in the local queue.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateTicketRequest {
        CreateTicketRequest {
            title: "AC no enfría".to_string(),
            description: "El aire acondicionado no enfría".to_string(),
            requester: "Marta".to_string(),
            email: Some("marta@example.com".to_string()),
            phone: None,
            location: "M7".to_string(),
            priority: Priority::Alta,
            is_urgent: false,
            incident_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            deadline_date: None,
        }
    }

    #[test]
    fn test_create_request_validation() {
        assert!(create_request().validate().is_ok());

        let mut long_title = create_request();
        long_title.title = "x".repeat(31);
        let errors = long_title.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("title"));

        let mut bad_location = create_request();
        bad_location.location = "M99".to_string();
        let errors = bad_location.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("location"));

        let mut bad_email = create_request();
        bad_email.email = Some("not-an-email".to_string());
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_title_length_counts_characters() {
        let mut accented = create_request();
        accented.title = "ñ".repeat(30);
        assert!(accented.validate().is_ok());
    }

    #[test]
    fn test_priority_accepts_lowercase_keys() {
        let p: Priority = serde_json::from_str("\"alta\"").unwrap();
        assert_eq!(p, Priority::Alta);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"Alta\"");
        assert_eq!(Priority::from_key("media"), Some(Priority::Media));
        assert_eq!(Priority::from_key("Media"), None);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(serde_json::to_string(&Status::EnEjecucion).unwrap(), "\"En Ejecución\"");
        assert_eq!(Status::from_label("En Ejecución"), Some(Status::EnEjecucion));
        assert_eq!(Status::from_label("Cerrada"), None);
    }

    #[test]
    fn test_image_paths() {
        let mut ticket = crate::store::memory::ticket_fixture(1, "M1");
        assert!(ticket.image_paths().is_empty());
        ticket.image = "tickets/1/a.png".to_string();
        assert_eq!(ticket.image_paths(), vec!["tickets/1/a.png"]);
        ticket.image = ticket.image_with("tickets/1/b.png");
        assert_eq!(ticket.image_paths(), vec!["tickets/1/a.png", "tickets/1/b.png"]);
    }

    #[test]
    fn test_change_detection() {
        let old = crate::store::memory::ticket_fixture(1, "M1");
        let mut new = old.clone();
        new.title = "otra cosa".to_string();
        assert!(!TicketChange::between(&old, &new).changes_board_state());
        new.is_accepted = true;
        assert!(TicketChange::between(&old, &new).changes_board_state());
    }

    #[test]
    fn test_inventory_payload_validation() {
        let count = NewInventoryCount {
            inventory_count_id: "IC-1".to_string(),
            payload: InventoryPayload {
                item: "Filtro".to_string(),
                quantity: -1.0,
                unit: "u".to_string(),
                status_reason: None,
            },
        };
        assert!(count.validate().is_err());
    }
}
