//! Process-wide defaults for listing queries.

/// Defaults and limits applied to every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryConfig {
    /// Page size when the client does not request one.
    pub default_limit: u64,
    /// Upper bound on the requested page size.
    pub max_limit: Option<u64>,
    /// Field holding the creation timestamp; the default sort key,
    /// descending. Set on documents at creation if absent.
    pub created_at_field: String,
    /// Allow-list mode: reject filters on fields not declared
    /// in the collection schema.
    pub strict_fields: bool,
    /// Server-side time limit of every store operation, in milliseconds.
    /// Read by `MongoStore::with_config()`.
    pub max_time_ms: Option<i64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_limit: 10,
            max_limit: None,
            created_at_field: String::from("createdAt"),
            strict_fields: false,
            max_time_ms: None,
        }
    }
}
