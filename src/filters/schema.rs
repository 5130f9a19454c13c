//! Declarative description of the filterable fields of a view.
use std::fmt::Debug;
use std::hash::Hash;

use chrono::NaiveDate;

/// Typed key of a filter field, addressed by name in the URL.
pub trait FilterKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn name(self) -> &'static str;
    fn from_name(name: &str) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Select,
    MultiSelect,
    Boolean,
    DateRange,
}

/// Where the filter bar renders a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Bar,
    Drawer,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub group: Option<String>,
}

impl SelectOption {
    pub fn new(value: &str, label: &str) -> Self {
        SelectOption { value: value.to_string(), label: label.to_string(), group: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Many(Vec<String>),
    Flag(bool),
    Range(DateRange),
}

impl FilterValue {
    /// Whether the value constrains anything. A present boolean always does.
    pub fn is_set(&self) -> bool {
        match self {
            FilterValue::Text(s) => !s.is_empty(),
            FilterValue::Many(v) => !v.is_empty(),
            FilterValue::Flag(_) => true,
            FilterValue::Range(r) => r.from.is_some() || r.to.is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterField<K: FilterKey> {
    pub key: K,
    pub field_type: FieldType,
    pub label: String,
    pub options: Vec<SelectOption>,
    pub placement: Placement,
    pub default: Option<FilterValue>,
    /// Applied to queries but never rendered nor written to the URL.
    pub hidden: bool,
}

impl<K: FilterKey> FilterField<K> {
    pub fn new(key: K, field_type: FieldType, label: &str) -> Self {
        FilterField {
            key,
            field_type,
            label: label.to_string(),
            options: Vec::new(),
            placement: Placement::Both,
            default: None,
            hidden: false,
        }
    }

    pub fn options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = options;
        self
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn default_value(mut self, value: FilterValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Values outside a non-empty option list are treated as malformed input and ignored
    /// when parsing the URL, rather than kept as raw strings.
    pub fn accepts_option(&self, value: &str) -> bool {
        self.options.is_empty() || self.options.iter().any(|o| o.value == value)
    }
}

/// Fields are not checked for duplicate keys; the later one wins when values are resolved.
#[derive(Debug, Clone)]
pub struct FilterSchema<K: FilterKey> {
    fields: Vec<FilterField<K>>,
}

impl<K: FilterKey> FilterSchema<K> {
    pub fn new(fields: Vec<FilterField<K>>) -> Self {
        FilterSchema { fields }
    }

    pub fn fields(&self) -> &[FilterField<K>] {
        &self.fields
    }

    pub fn field(&self, key: K) -> Option<&FilterField<K>> {
        self.fields.iter().rev().find(|f| f.key == key)
    }

    /// Fields the filter bar shows at `placement`.
    pub fn visible_fields(&self, placement: Placement) -> Vec<&FilterField<K>> {
        self.fields
            .iter()
            .filter(|f| !f.hidden)
            .filter(|f| f.placement == Placement::Both || placement == Placement::Both || f.placement == placement)
            .collect()
    }
}
