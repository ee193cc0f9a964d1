//! Queries over local collections.

use serde_json::Value;

/// Document filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals the value. A missing field compares as `null`.
    Eq(String, Value),
    /// Field differs from the value. A missing field compares as `null`.
    NotEq(String, Value),
    /// Field equals any of the values.
    In(String, Vec<Value>),
}

/// A query over one collection.
///
/// Results are always ordered by ascending entry id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filter: Filter,
    limit: Option<usize>,
}

impl Query {
    /// Matches every document.
    #[must_use]
    pub fn all() -> Self {
        Self {
            filter: Filter::All,
            limit: None,
        }
    }

    /// Matches documents whose `field` equals `value`.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            filter: Filter::Eq(field.into(), value),
            limit: None,
        }
    }

    /// Matches documents whose `field` differs from `value`.
    #[must_use]
    pub fn not_eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            filter: Filter::NotEq(field.into(), value),
            limit: None,
        }
    }

    /// Matches documents whose `field` equals one of `values`.
    #[must_use]
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            filter: Filter::In(field.into(), values),
            limit: None,
        }
    }

    /// Caps the number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Returns the result limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns true if the document passes the filter.
    pub fn matches(&self, doc: &Value) -> bool {
        match &self.filter {
            Filter::All => true,
            Filter::Eq(field, value) => field_value(doc, field) == value,
            Filter::NotEq(field, value) => field_value(doc, field) != value,
            Filter::In(field, values) => {
                let actual = field_value(doc, field);
                values.iter().any(|v| v == actual)
            }
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

/// Resolves a dotted field path inside a document.
///
/// ```rust
/// use serde_json::json;
/// use tidesync_store::project;
///
/// let doc = json!({"owner": {"name": "ada"}});
/// assert_eq!(project(&doc, "owner.name"), Some(&json!("ada")));
/// assert_eq!(project(&doc, "owner.email"), None);
/// ```
pub fn project<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.get(segment))
}

fn field_value<'a>(doc: &'a Value, path: &str) -> &'a Value {
    project(doc, path).unwrap_or(&Value::Null)
}
