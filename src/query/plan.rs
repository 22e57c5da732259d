//! Composing filter, projection, sort, page window and relation expansion
//! into a single executable plan.

use bson::{ Bson, Document };
use crate::{
    literal::Order,
    query::{ filter::FilterExpression, page::PageSpec },
};

/// Splits a field list on commas and whitespace, dropping empty items.
fn split_fields(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
}

/// The fields to include in returned documents; empty means all fields.
/// The `_id` is always included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Projection {
    /// Distinct field paths in the order requested.
    fields: Vec<String>,
}

impl Projection {
    /// Parses a comma- or space-separated field list.
    ///
    /// ```
    /// # use resourcery::query::Projection;
    /// let projection = Projection::parse("name, description,name housing");
    /// assert_eq!(projection.fields(), &["name", "description", "housing"]);
    /// ```
    pub fn parse(list: &str) -> Self {
        split_fields(list).fold(Self::default(), Self::with)
    }

    /// Builder-style method for including a field.
    pub fn with<S: AsRef<str>>(mut self, field: S) -> Self {
        let field = field.as_ref();

        if !self.fields.iter().any(|f| f == field) {
            self.fields.push(field.to_string());
        }

        self
    }

    /// The included fields.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Whether every field is returned.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `field` is explicitly included.
    pub fn includes(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// The inclusion projection document, `None` if every field is returned.
    pub fn to_document(&self) -> Option<Document> {
        if self.fields.is_empty() {
            None
        } else {
            Some(self.fields.iter().map(|f| (f.clone(), Bson::I32(1))).collect())
        }
    }
}

/// Sort keys in order of precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SortSpec {
    /// Field path and direction pairs.
    keys: Vec<(String, Order)>,
}

impl SortSpec {
    /// Parses a comma- or space-separated list of fields, each optionally
    /// prefixed with `-` for descending order.
    ///
    /// ```
    /// # use resourcery::query::SortSpec;
    /// # use resourcery::literal::Order;
    /// let spec = SortSpec::parse("-averageCost,name");
    /// assert_eq!(spec.keys(), &[
    ///     (String::from("averageCost"), Order::Descending),
    ///     (String::from("name"), Order::Ascending),
    /// ]);
    /// ```
    pub fn parse(list: &str) -> Self {
        split_fields(list).fold(Self::default(), |spec, token| {
            if token.starts_with('-') {
                spec.then(&token[1..], Order::Descending)
            } else {
                spec.then(token.trim_start_matches('+'), Order::Ascending)
            }
        })
    }

    /// Sorting by a single field.
    pub fn by<S: AsRef<str>>(field: S, order: Order) -> Self {
        Self::default().then(field, order)
    }

    /// Builder-style method for adding a lower-precedence key. Empty
    /// and repeated fields are ignored.
    pub fn then<S: AsRef<str>>(mut self, field: S, order: Order) -> Self {
        let field = field.as_ref();

        if !field.is_empty() && !self.keys.iter().any(|&(ref f, _)| f == field) {
            self.keys.push((field.to_string(), order));
        }

        self
    }

    /// The sort keys.
    pub fn keys(&self) -> &[(String, Order)] {
        &self.keys
    }

    /// Whether there are no sort keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The sort specification document.
    pub fn to_document(&self) -> Document {
        self.keys.iter().map(|&(ref f, order)| (f.clone(), Bson::from(order))).collect()
    }
}

/// A relation-expansion directive: the relation to expand, and which
/// fields of the related documents to include.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PopulateRepr", into = "PopulateRepr")]
pub struct Populate {
    /// The name of the relation (the field it is stored in).
    pub path: String,
    /// Projection applied to the related documents.
    pub select: Projection,
}

impl Populate {
    /// Expands the relation with all fields of the related documents.
    pub fn new<S: Into<String>>(path: S) -> Self {
        Populate { path: path.into(), select: Projection::default() }
    }

    /// Builder-style setter for the projection of related documents.
    pub fn select(mut self, select: Projection) -> Self {
        self.select = select;
        self
    }
}

impl<'a> From<&'a str> for Populate {
    fn from(path: &'a str) -> Self {
        Populate::new(path)
    }
}

/// Configuration-file form of `Populate`: either just the relation name,
/// or `{ "path": ..., "select": "a b" }`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PopulateRepr {
    /// Only the relation name.
    Path(String),
    /// Relation name and field list.
    Full {
        /// The relation name.
        path: String,
        /// Comma- or space-separated field list.
        #[serde(default)]
        select: Option<String>,
    },
}

impl From<PopulateRepr> for Populate {
    fn from(repr: PopulateRepr) -> Self {
        match repr {
            PopulateRepr::Path(path) => Populate::new(path),
            PopulateRepr::Full { path, select } => Populate {
                path,
                select: select.as_ref().map(String::as_str).map(Projection::parse).unwrap_or_default(),
            },
        }
    }
}

impl From<Populate> for PopulateRepr {
    fn from(populate: Populate) -> Self {
        if populate.select.is_empty() {
            PopulateRepr::Path(populate.path)
        } else {
            PopulateRepr::Full {
                path: populate.path,
                select: Some(populate.select.fields().join(" ")),
            }
        }
    }
}

/// Everything needed to execute one listing read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// The collection to read.
    pub collection: String,
    /// Client filter, not yet bound to the schema.
    pub filter: FilterExpression,
    /// Trusted equality conditions ANDed to the filter, e.g. the parent
    /// of a nested listing.
    pub scope: Document,
    /// Fields to return.
    pub projection: Projection,
    /// Result order; never empty.
    pub sort: SortSpec,
    /// The page window.
    pub page: PageSpec,
    /// Relation to expand in the returned documents.
    pub populate: Option<Populate>,
}

impl QueryPlan {
    /// Starts building a plan for reading `collection`.
    pub fn builder<S: Into<String>>(collection: S) -> QueryPlanBuilder {
        QueryPlanBuilder::new(collection)
    }
}

/// Builder for `QueryPlan`s. Performs no validation of filter values;
/// those are checked when the plan is executed.
#[derive(Debug, Clone)]
pub struct QueryPlanBuilder {
    /// The plan under construction.
    plan: QueryPlan,
    /// The field sorted by (descending) when no sort is requested.
    created_at_field: String,
}

impl QueryPlanBuilder {
    /// A plan reading every document of `collection`, first page,
    /// newest first.
    pub fn new<S: Into<String>>(collection: S) -> Self {
        QueryPlanBuilder {
            plan: QueryPlan {
                collection: collection.into(),
                filter: FilterExpression::new(),
                scope: Document::new(),
                projection: Projection::default(),
                sort: SortSpec::default(),
                page: PageSpec::default(),
                populate: None,
            },
            created_at_field: String::from("createdAt"),
        }
    }

    /// Sets the client filter.
    pub fn filter(mut self, filter: FilterExpression) -> Self {
        self.plan.filter = filter;
        self
    }

    /// Restricts the plan to documents whose `field` equals `value`.
    pub fn scope<S: Into<String>>(mut self, field: S, value: Bson) -> Self {
        self.plan.scope.insert(field.into(), value);
        self
    }

    /// Sets the projection from a comma-separated field list, if given.
    pub fn select(mut self, list: Option<&str>) -> Self {
        self.plan.projection = list.map(Projection::parse).unwrap_or_default();
        self
    }

    /// Sets the order from a sort string, if given.
    pub fn sort(mut self, list: Option<&str>) -> Self {
        self.plan.sort = list.map(SortSpec::parse).unwrap_or_default();
        self
    }

    /// Sets the field of the default (descending) order.
    pub fn created_at_field<S: Into<String>>(mut self, field: S) -> Self {
        self.created_at_field = field.into();
        self
    }

    /// Sets the page window.
    pub fn page(mut self, page: PageSpec) -> Self {
        self.plan.page = page;
        self
    }

    /// Sets the relation to expand.
    pub fn populate(mut self, populate: Option<Populate>) -> Self {
        self.plan.populate = populate;
        self
    }

    /// Finishes the plan, falling back to the default order if no
    /// (non-empty) sort was requested.
    pub fn build(self) -> QueryPlan {
        let QueryPlanBuilder { mut plan, created_at_field } = self;

        if plan.sort.is_empty() {
            plan.sort = SortSpec::by(created_at_field, Order::Descending);
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use crate::literal::Order;
    use crate::query::page::PageSpec;
    use super::*;

    #[test]
    fn default_sort_is_newest_first() {
        let plan = QueryPlan::builder("bootcamps").build();
        assert_eq!(plan.sort.to_document(), doc!{ "createdAt": -1 });

        let plan = QueryPlan::builder("bootcamps")
            .sort(Some(" , "))
            .created_at_field("created")
            .build();
        assert_eq!(plan.sort.to_document(), doc!{ "created": -1 });

        let plan = QueryPlan::builder("bootcamps").sort(Some("name -averageCost")).build();
        assert_eq!(plan.sort.keys(), &[
            (String::from("name"), Order::Ascending),
            (String::from("averageCost"), Order::Descending),
        ]);
    }

    #[test]
    fn projection_documents() {
        assert_eq!(Projection::parse("").to_document(), None);
        assert_eq!(Projection::parse("name,description").to_document(),
                   Some(doc!{ "name": 1, "description": 1 }));
        assert!(Projection::parse("a b").includes("b"));
    }

    #[test]
    fn builder_sets_every_part() {
        let plan = QueryPlan::builder("courses")
            .select(Some("title,tuition"))
            .page(PageSpec::new(3, 20))
            .populate(Some(Populate::from("bootcamp")))
            .scope("bootcamp", Bson::from("b1"))
            .build();

        assert_eq!(plan.collection, "courses");
        assert_eq!(plan.projection.fields(), &["title", "tuition"]);
        assert_eq!(plan.page.offset(), 40);
        assert_eq!(plan.populate.map(|p| p.path), Some(String::from("bootcamp")));
        assert_eq!(plan.scope, doc!{ "bootcamp": "b1" });
    }

    #[test]
    fn populate_config_forms() -> serde_json::Result<()> {
        let short: Populate = serde_json::from_value(json!("courses"))?;
        let full: Populate = serde_json::from_value(json!({
            "path": "bootcamp",
            "select": "name description",
        }))?;

        assert_eq!(short, Populate::new("courses"));
        assert_eq!(full, Populate::new("bootcamp").select(Projection::parse("name,description")));
        assert_eq!(serde_json::to_value(&full)?, json!({
            "path": "bootcamp",
            "select": "name description",
        }));

        Ok(())
    }
}
