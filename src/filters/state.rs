//! Filter values of one view, kept in step with the URL query string.
//!
//! On load the query string is parsed best-effort: anything that doesn't parse for its
//! field type is dropped and the field keeps its default. After every change the full
//! value map is written back through a [`QuerySink`], hidden fields and empty values
//! left out. Successive writes are not coordinated; the last one wins.
use std::collections::HashMap;

use chrono::NaiveDate;
use url::form_urlencoded;

use crate::filters::schema::{DateRange, FieldType, FilterField, FilterKey, FilterSchema, FilterValue};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Receives the rewritten query string after each change (history replace).
pub trait QuerySink: Send {
    fn replace_query(&mut self, query: &str);
}

pub struct FilterState<K: FilterKey> {
    schema: FilterSchema<K>,
    values: HashMap<K, FilterValue>,
    sink: Option<Box<dyn QuerySink>>,
}

impl<K: FilterKey> FilterState<K> {
    /// Seeds defaults, then overlays whatever in `query` parses.
    pub fn initialize(schema: FilterSchema<K>, query: &str) -> Self {
        let mut values = defaults(&schema);

        for (name, raw) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let Some(key) = K::from_name(&name) else { continue };
            let Some(field) = schema.field(key) else { continue };
            if field.hidden {
                continue;
            }
            if let Some(value) = parse_param(field, &raw) {
                values.insert(key, value);
            }
        }

        FilterState { schema, values, sink: None }
    }

    pub fn with_sink(mut self, sink: Box<dyn QuerySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schema(&self) -> &FilterSchema<K> {
        &self.schema
    }

    pub fn get(&self, key: K) -> Option<&FilterValue> {
        self.values.get(&key)
    }

    pub fn values(&self) -> &HashMap<K, FilterValue> {
        &self.values
    }

    pub fn set_value(&mut self, key: K, value: FilterValue) {
        self.values.insert(key, value);
        self.sync_query();
    }

    pub fn clear(&mut self, key: K) {
        self.values.remove(&key);
        self.sync_query();
    }

    pub fn reset(&mut self) {
        self.values = defaults(&self.schema);
        self.sync_query();
    }

    /// Number of visible fields currently constraining the view.
    ///
    /// Hidden fields never count, matching the schema contract that keeps them out of
    /// both the URL and the tally; they still reach the composed query through `values`.
    pub fn active_count(&self) -> usize {
        self.schema
            .fields()
            .iter()
            .filter(|f| !f.hidden)
            .filter(|f| self.values.get(&f.key).is_some_and(FilterValue::is_set))
            .count()
    }

    /// Shareable query string: visible, non-empty fields in schema order.
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut written = Vec::new();

        for field in self.schema.fields().iter().filter(|f| !f.hidden) {
            if written.contains(&field.key) {
                continue;
            }
            written.push(field.key);
            if let Some(encoded) = self.values.get(&field.key).and_then(encode_value) {
                serializer.append_pair(field.key.name(), &encoded);
            }
        }

        serializer.finish()
    }

    fn sync_query(&mut self) {
        let query = self.to_query_string();
        if let Some(sink) = self.sink.as_mut() {
            sink.replace_query(&query);
        }
    }
}

fn defaults<K: FilterKey>(schema: &FilterSchema<K>) -> HashMap<K, FilterValue> {
    schema
        .fields()
        .iter()
        .filter_map(|f| f.default.clone().map(|v| (f.key, v)))
        .collect()
}

fn parse_param<K: FilterKey>(field: &FilterField<K>, raw: &str) -> Option<FilterValue> {
    match field.field_type {
        FieldType::Text => (!raw.is_empty()).then(|| FilterValue::Text(raw.to_string())),
        FieldType::Select => {
            (!raw.is_empty() && field.accepts_option(raw)).then(|| FilterValue::Text(raw.to_string()))
        }
        FieldType::MultiSelect => {
            let items: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && field.accepts_option(s))
                .map(str::to_string)
                .collect();
            (!items.is_empty()).then_some(FilterValue::Many(items))
        }
        FieldType::Boolean => Some(FilterValue::Flag(raw == "true")),
        FieldType::DateRange => {
            let (from, to) = raw.split_once('|')?;
            let range = DateRange { from: parse_date(from)?, to: parse_date(to)? };
            (range.from.is_some() || range.to.is_some()).then_some(FilterValue::Range(range))
        }
    }
}

/// `Some(None)` for an empty bound, `None` when the bound is malformed.
fn parse_date(raw: &str) -> Option<Option<NaiveDate>> {
    if raw.is_empty() {
        return Some(None);
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok().map(Some)
}

fn encode_value(value: &FilterValue) -> Option<String> {
    if !value.is_set() {
        return None;
    }
    Some(match value {
        FilterValue::Text(s) => s.clone(),
        FilterValue::Many(v) => v.join(","),
        FilterValue::Flag(b) => b.to_string(),
        FilterValue::Range(r) => format!(
            "{}|{}",
            r.from.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default(),
            r.to.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default(),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::tickets::{work_orders_schema, work_requests_schema, TicketFilterKey};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct History(Arc<Mutex<Vec<String>>>);

    impl QuerySink for History {
        fn replace_query(&mut self, query: &str) {
            self.0.lock().unwrap().push(query.to_string());
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parses_each_field_type() {
        let state = FilterState::initialize(
            work_orders_schema(),
            "q=bomba&location=M7&priority=alta,media&has_image=true&created=2024-01-01%7C2024-01-31",
        );

        assert_eq!(state.get(TicketFilterKey::Search), Some(&FilterValue::Text("bomba".to_string())));
        assert_eq!(state.get(TicketFilterKey::Location), Some(&FilterValue::Text("M7".to_string())));
        assert_eq!(
            state.get(TicketFilterKey::Priority),
            Some(&FilterValue::Many(vec!["alta".to_string(), "media".to_string()]))
        );
        assert_eq!(state.get(TicketFilterKey::HasImage), Some(&FilterValue::Flag(true)));
        assert_eq!(
            state.get(TicketFilterKey::CreatedAt),
            Some(&FilterValue::Range(DateRange { from: Some(date(2024, 1, 1)), to: Some(date(2024, 1, 31)) }))
        );
        assert_eq!(state.active_count(), 5);
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let state = FilterState::initialize(
            work_orders_schema(),
            "created=2024-13-01%7C&location=NOWHERE&priority=urgent&unknown=1",
        );
        assert_eq!(state.get(TicketFilterKey::CreatedAt), None);
        assert_eq!(state.get(TicketFilterKey::Location), None);
        assert_eq!(state.get(TicketFilterKey::Priority), None);
        assert_eq!(state.active_count(), 0);
    }

    #[test]
    fn test_boolean_is_true_only_for_true() {
        let state = FilterState::initialize(work_orders_schema(), "has_image=yes");
        assert_eq!(state.get(TicketFilterKey::HasImage), Some(&FilterValue::Flag(false)));
        assert_eq!(state.active_count(), 1);
    }

    #[test]
    fn test_open_ended_range() {
        let state = FilterState::initialize(work_orders_schema(), "created=%7C2024-02-10");
        assert_eq!(
            state.get(TicketFilterKey::CreatedAt),
            Some(&FilterValue::Range(DateRange { from: None, to: Some(date(2024, 2, 10)) }))
        );
        assert_eq!(state.to_query_string(), "created=%7C2024-02-10");
    }

    #[test]
    fn test_url_round_trip() {
        let history = History::default();
        let mut state = FilterState::initialize(work_orders_schema(), "").with_sink(Box::new(history.clone()));

        state.set_value(TicketFilterKey::Search, FilterValue::Text("aire acondicionado".to_string()));
        state.set_value(TicketFilterKey::Status, FilterValue::Many(vec!["Pendiente".to_string(), "En Ejecución".to_string()]));
        state.set_value(TicketFilterKey::Location, FilterValue::Text(String::new()));
        state.set_value(
            TicketFilterKey::CreatedAt,
            FilterValue::Range(DateRange { from: Some(date(2024, 3, 1)), to: None }),
        );

        let written = history.0.lock().unwrap().last().cloned().unwrap();
        assert_eq!(history.0.lock().unwrap().len(), 4);

        let reloaded = FilterState::initialize(work_orders_schema(), &written);
        let expected: HashMap<_, _> = state
            .values()
            .iter()
            .filter(|(_, v)| v.is_set())
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        assert_eq!(reloaded.values(), &expected);
        assert_eq!(reloaded.get(TicketFilterKey::Location), None);
    }

    #[test]
    fn test_hidden_field_isolation() {
        let mut state = FilterState::initialize(work_requests_schema(), "accepted=true");

        // default survives, URL value ignored
        assert_eq!(state.get(TicketFilterKey::Accepted), Some(&FilterValue::Flag(false)));
        assert!(!state.to_query_string().contains("accepted"));
        assert_eq!(state.active_count(), 0);
        assert!(state
            .schema()
            .visible_fields(crate::filters::schema::Placement::Both)
            .iter()
            .all(|f| f.key != TicketFilterKey::Accepted));

        state.set_value(TicketFilterKey::Search, FilterValue::Text("luz".to_string()));
        assert_eq!(state.to_query_string(), "q=luz");
        assert_eq!(state.active_count(), 1);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let history = History::default();
        let mut state =
            FilterState::initialize(work_requests_schema(), "q=fuga&location=M2").with_sink(Box::new(history.clone()));
        state.reset();
        assert_eq!(state.get(TicketFilterKey::Search), None);
        assert_eq!(state.get(TicketFilterKey::Accepted), Some(&FilterValue::Flag(false)));
        assert_eq!(history.0.lock().unwrap().last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_duplicate_keys_last_field_wins() {
        use crate::filters::schema::{FieldType, FilterField, FilterSchema};
        let schema = FilterSchema::new(vec![
            FilterField::new(TicketFilterKey::Search, FieldType::Text, "Buscar")
                .default_value(FilterValue::Text("a".to_string())),
            FilterField::new(TicketFilterKey::Search, FieldType::Text, "Buscar")
                .default_value(FilterValue::Text("b".to_string())),
        ]);
        let state = FilterState::initialize(schema, "");
        assert_eq!(state.get(TicketFilterKey::Search), Some(&FilterValue::Text("b".to_string())));
        assert_eq!(state.to_query_string(), "q=b");
    }
}
