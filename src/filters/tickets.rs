//! Filter schemas of the ticket views.
use crate::filters::schema::{FieldType, FilterField, FilterKey, FilterSchema, FilterValue, Placement, SelectOption};
use crate::models::{Priority, Status, LOCATIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketFilterKey {
    Search,
    Location,
    Accepted,
    CreatedAt,
    HasImage,
    Priority,
    Status,
}

impl FilterKey for TicketFilterKey {
    fn name(self) -> &'static str {
        match self {
            TicketFilterKey::Search => "q",
            TicketFilterKey::Location => "location",
            TicketFilterKey::Accepted => "accepted",
            TicketFilterKey::CreatedAt => "created",
            TicketFilterKey::HasImage => "has_image",
            TicketFilterKey::Priority => "priority",
            TicketFilterKey::Status => "status",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "q" => Some(TicketFilterKey::Search),
            "location" => Some(TicketFilterKey::Location),
            "accepted" => Some(TicketFilterKey::Accepted),
            "created" => Some(TicketFilterKey::CreatedAt),
            "has_image" => Some(TicketFilterKey::HasImage),
            "priority" => Some(TicketFilterKey::Priority),
            "status" => Some(TicketFilterKey::Status),
            _ => None,
        }
    }
}

fn location_options() -> Vec<SelectOption> {
    LOCATIONS.iter().map(|l| SelectOption::new(l, l)).collect()
}

fn priority_options() -> Vec<SelectOption> {
    [Priority::Baja, Priority::Media, Priority::Alta]
        .into_iter()
        .map(|p| SelectOption::new(p.key(), p.stored()))
        .collect()
}

fn common_fields() -> Vec<FilterField<TicketFilterKey>> {
    vec![
        FilterField::new(TicketFilterKey::Search, FieldType::Text, "Buscar").placement(Placement::Bar),
        FilterField::new(TicketFilterKey::Location, FieldType::Select, "Ubicación").options(location_options()),
        FilterField::new(TicketFilterKey::CreatedAt, FieldType::DateRange, "Fecha de creación")
            .placement(Placement::Drawer),
        FilterField::new(TicketFilterKey::HasImage, FieldType::Boolean, "Con imagen").placement(Placement::Drawer),
        FilterField::new(TicketFilterKey::Priority, FieldType::MultiSelect, "Prioridad")
            .options(priority_options())
            .placement(Placement::Drawer),
    ]
}

/// Inbox of unaccepted tickets.
pub fn work_requests_schema() -> FilterSchema<TicketFilterKey> {
    let mut fields = common_fields();
    fields.push(
        FilterField::new(TicketFilterKey::Accepted, FieldType::Boolean, "Aceptada")
            .default_value(FilterValue::Flag(false))
            .hidden(),
    );
    FilterSchema::new(fields)
}

/// Accepted work orders.
pub fn work_orders_schema() -> FilterSchema<TicketFilterKey> {
    let mut fields = common_fields();
    fields.push(
        FilterField::new(TicketFilterKey::Status, FieldType::MultiSelect, "Estado")
            .options(Status::KANBAN.iter().map(|s| SelectOption::new(s.label(), s.label())).collect())
            .placement(Placement::Drawer),
    );
    FilterSchema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names_round_trip() {
        for key in [
            TicketFilterKey::Search,
            TicketFilterKey::Location,
            TicketFilterKey::Accepted,
            TicketFilterKey::CreatedAt,
            TicketFilterKey::HasImage,
            TicketFilterKey::Priority,
            TicketFilterKey::Status,
        ] {
            assert_eq!(TicketFilterKey::from_name(key.name()), Some(key));
        }
    }

    #[test]
    fn test_search_lives_in_the_bar() {
        let schema = work_orders_schema();
        let bar: Vec<_> = schema.visible_fields(Placement::Bar).iter().map(|f| f.key).collect();
        assert_eq!(bar, vec![TicketFilterKey::Search, TicketFilterKey::Location]);
    }
}
