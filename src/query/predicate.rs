//! Backend-neutral predicate tree.
//!
//! The composer builds one of these per request; the DynamoDB store renders it into a
//! filter expression and the in-memory store evaluates it directly, so both agree on
//! which rows match.
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Bool(bool),
    /// Epoch microseconds.
    Micros(i64),
}

impl Scalar {
    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Micros(a), Scalar::Micros(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A record whose fields can be read by name.
pub trait Filterable {
    fn field(&self, name: &str) -> Option<Scalar>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, Scalar),
    Neq(&'static str, Scalar),
    /// Case-insensitive substring match.
    IContains(&'static str, String),
    In(&'static str, Vec<Scalar>),
    Gte(&'static str, Scalar),
    Lte(&'static str, Scalar),
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
}

impl Predicate {
    /// Matches every row.
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    /// Conjunction that keeps the tree flat.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, Predicate::And(mut b)) => {
                b.insert(0, p);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    pub fn matches<R: Filterable + ?Sized>(&self, record: &R) -> bool {
        match self {
            Predicate::Eq(f, v) => record.field(f).as_ref() == Some(v),
            // Missing attributes never compare unequal.
            Predicate::Neq(f, v) => record.field(f).is_some_and(|x| &x != v),
            Predicate::IContains(f, needle) => match record.field(f) {
                Some(Scalar::Text(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Predicate::In(f, set) => record.field(f).is_some_and(|x| set.contains(&x)),
            Predicate::Gte(f, v) => record
                .field(f)
                .and_then(|x| x.compare(v))
                .is_some_and(|o| o != Ordering::Less),
            Predicate::Lte(f, v) => record
                .field(f)
                .and_then(|x| x.compare(v))
                .is_some_and(|o| o != Ordering::Greater),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(record)),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(record)),
        }
    }

    /// Top-level clauses, for inspecting a composed query.
    pub fn clauses(&self) -> &[Predicate] {
        match self {
            Predicate::And(ps) => ps,
            other => std::slice::from_ref(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Row(HashMap<&'static str, Scalar>);

    impl Filterable for Row {
        fn field(&self, name: &str) -> Option<Scalar> {
            self.0.get(name).cloned()
        }
    }

    fn row() -> Row {
        Row(HashMap::from([
            ("title", Scalar::Text("Fuga de Agua".to_string())),
            ("id", Scalar::Int(42)),
            ("image", Scalar::Text(String::new())),
        ]))
    }

    #[test]
    fn test_icontains_ignores_case() {
        assert!(Predicate::IContains("title", "agua".to_string()).matches(&row()));
        assert!(Predicate::IContains("title", "FUGA".to_string()).matches(&row()));
        assert!(!Predicate::IContains("title", "luz".to_string()).matches(&row()));
    }

    #[test]
    fn test_neq_on_missing_field_is_false() {
        assert!(!Predicate::Neq("missing", Scalar::Text(String::new())).matches(&row()));
        assert!(!Predicate::Neq("image", Scalar::Text(String::new())).matches(&row()));
    }

    #[test]
    fn test_ranges_compare_same_kind_only() {
        assert!(Predicate::Gte("id", Scalar::Int(42)).matches(&row()));
        assert!(Predicate::Lte("id", Scalar::Int(42)).matches(&row()));
        assert!(!Predicate::Gte("id", Scalar::Micros(0)).matches(&row()));
    }

    #[test]
    fn test_and_stays_flat() {
        let p = Predicate::all()
            .and(Predicate::Eq("id", Scalar::Int(1)))
            .and(Predicate::Eq("title", Scalar::Text("x".to_string())));
        assert_eq!(p.clauses().len(), 2);
        assert!(Predicate::all().matches(&row()));
        assert!(!Predicate::Or(vec![]).matches(&row()));
    }
}
