//! The raw, untrusted query parameters of a listing request.

use std::iter::FromIterator;
use serde_json::{ Map, Value };

/// Parameter names which control the shape of the result rather than
/// filtering it. They never become filter predicates.
pub const RESERVED_KEYS: &[&str] = &["select", "sort", "page", "limit"];

/// Maximal number of bracketed segments after the name (`a[b][c]` has
/// two). A key with more brackets is taken literally, as a whole.
const MAX_DEPTH: usize = 5;

/// A mapping of field names to raw values (strings, numbers, arrays, or
/// nested mappings) as supplied by the client, plus the reserved keys
/// `select`, `sort`, `page` and `limit`.
///
/// ```
/// # extern crate resourcery;
/// # #[macro_use]
/// # extern crate serde_json;
/// #
/// # use resourcery::query::QueryRequest;
/// #
/// # fn main() {
/// let request = QueryRequest::from_pairs(vec![
///     ("tuition[gte]", "1000"),
///     ("careers[in]", "Business"),
///     ("careers[in]", "UI/UX"),
///     ("sort", "-createdAt"),
/// ]);
/// assert_eq!(request.get("tuition"), Some(&json!({ "gte": "1000" })));
/// assert_eq!(request.get("careers"), Some(&json!({ "in": ["Business", "UI/UX"] })));
/// assert_eq!(request.sort().as_ref().map(String::as_str), Some("-createdAt"));
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryRequest {
    /// Parameter name => raw value, in the order of appearance.
    params: Map<String, Value>,
}

impl QueryRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a request from decoded query string pairs. Bracketed keys
    /// nest (`tuition[lte]=5000` becomes `{"tuition": {"lte": "5000"}}`),
    /// `key[]` and repeated keys collect their values into an array.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
        where I: IntoIterator<Item = (K, V)>,
              K: AsRef<str>,
              V: Into<String>,
    {
        let mut request = Self::new();

        for (key, value) in pairs {
            let path = split_key(key.as_ref());
            insert_at(&mut request.params, &path, Value::String(value.into()));
        }

        request
    }

    /// Builder-style method for setting a parameter, replacing
    /// any previous value.
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value of a parameter.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Returns `true` if there are no parameters at all.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The comma-separated list of fields to return, if any.
    pub fn select(&self) -> Option<String> {
        self.params.get("select").and_then(text_of)
    }

    /// The comma-separated list of sort keys, if any.
    pub fn sort(&self) -> Option<String> {
        self.params.get("sort").and_then(text_of)
    }

    /// The raw requested page number.
    pub fn page(&self) -> Option<&Value> {
        self.params.get("page")
    }

    /// The raw requested page size.
    pub fn limit(&self) -> Option<&Value> {
        self.params.get("limit")
    }

    /// Iterates over the parameters which are subject to filtering,
    /// i.e. all of them except the reserved keys.
    pub fn filter_params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params
            .iter()
            .filter(|&(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.as_str(), value))
    }
}

impl From<Map<String, Value>> for QueryRequest {
    fn from(params: Map<String, Value>) -> Self {
        QueryRequest { params }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for QueryRequest {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        QueryRequest {
            params: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Textual value of a reserved parameter; repeated parameters are
/// joined as if they were a single comma-separated list.
fn text_of(value: &Value) -> Option<String> {
    match *value {
        Value::String(ref s) => Some(s.clone()),
        Value::Number(ref n) => Some(n.to_string()),
        Value::Array(ref items) => {
            let parts: Vec<_> = items.iter().filter_map(text_of).collect();
            if parts.is_empty() { None } else { Some(parts.join(",")) }
        }
        _ => None,
    }
}

/// Splits `a[b][c]` into `["a", "b", "c"]`. A key without a well-formed
/// bracket suffix is a single segment.
fn split_key(key: &str) -> Vec<&str> {
    let open = match key.find('[') {
        Some(i) if i > 0 => i,
        _ => return vec![key],
    };
    let mut segments = vec![&key[..open]];
    let mut rest = &key[open..];

    while segments.len() <= MAX_DEPTH && rest.starts_with('[') {
        match rest.find(']') {
            Some(close) => {
                segments.push(&rest[1..close]);
                rest = &rest[close + 1..];
            }
            None => break,
        }
    }

    if rest.is_empty() {
        segments
    } else {
        vec![key]
    }
}

/// Inserts `value` at the nested `path`, turning repeated leaves into arrays.
fn insert_at(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let (head, tail) = match path.split_first() {
        Some(split) => split,
        None => return,
    };

    match tail.first() {
        None => append(map, head, value),
        Some(&"") if tail.len() == 1 => {
            match map.entry(head.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
                &mut Value::Array(ref mut items) => items.push(value),
                other => *other = Value::Array(vec![other.take(), value]),
            }
        }
        Some(_) => {
            let slot = map.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(ref mut inner) = *slot {
                insert_at(inner, tail, value);
            }
        }
    }
}

/// Sets a leaf, collecting repeated values into an array.
fn append(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(&mut Value::Array(ref mut items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_not_filter_params() {
        let request = QueryRequest::new()
            .with("select", "name,description")
            .with("sort", "-averageCost")
            .with("page", "2")
            .with("limit", "5")
            .with("housing", "true");

        let filters: Vec<_> = request.filter_params().collect();
        assert_eq!(filters, vec![("housing", &json!("true"))]);
        assert_eq!(request.select(), Some(String::from("name,description")));
        assert_eq!(request.page(), Some(&json!("2")));
        assert_eq!(request.limit(), Some(&json!("5")));
    }

    #[test]
    fn bracketed_and_repeated_keys() {
        let request = QueryRequest::from_pairs(vec![
            ("averageCost[lte]", "10000"),
            ("averageCost[gt]", "500"),
            ("location.state", "MA"),
            ("careers[]", "Business"),
            ("careers[]", "Other"),
            ("select", "name"),
            ("select", "housing"),
        ]);

        assert_eq!(request.get("averageCost"), Some(&json!({ "lte": "10000", "gt": "500" })));
        assert_eq!(request.get("location.state"), Some(&json!("MA")));
        assert_eq!(request.get("careers"), Some(&json!(["Business", "Other"])));
        assert_eq!(request.select(), Some(String::from("name,housing")));
    }

    #[test]
    fn malformed_brackets_are_literal_keys() {
        assert_eq!(split_key("a[b"), vec!["a[b"]);
        assert_eq!(split_key("[b]"), vec!["[b]"]);
        assert_eq!(split_key("a[b]c"), vec!["a[b]c"]);
        assert_eq!(split_key("a[b][c]"), vec!["a", "b", "c"]);
        assert_eq!(split_key("plain"), vec!["plain"]);
    }

    #[test]
    fn bracket_depth_is_bounded() {
        assert_eq!(split_key("a[1][2][3][4][5]"), vec!["a", "1", "2", "3", "4", "5"]);
        assert_eq!(split_key("a[1][2][3][4][5][6]"), vec!["a[1][2][3][4][5][6]"]);
    }

    #[test]
    fn structure_conflicts_let_later_values_win() {
        let request = QueryRequest::from_pairs(vec![
            ("rating", "5"),
            ("rating[gte]", "7"),
        ]);

        assert_eq!(request.get("rating"), Some(&json!({ "gte": "7" })));
    }
}
