//! Running a `QueryPlan` against a document store.

use bson::{ Bson, Document };
use tracing::debug;
use crate::{
    query::{ QueryPlan, Pagination },
    registry::ResourceSpec,
    store::{ DocumentStore, FindQuery },
    error::{ Result, ResultExt },
};

/// The response envelope of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResponse {
    /// Always `"success"`.
    pub status: &'static str,
    /// The number of documents on this page.
    pub count: usize,
    /// The number of documents matching the filter, across all pages.
    pub total: u64,
    /// The neighboring pages.
    pub pagination: Pagination,
    /// The documents on this page.
    pub data: Vec<Document>,
}

impl ListResponse {
    /// Wraps a page of documents.
    pub fn new(data: Vec<Document>, total: u64, pagination: Pagination) -> Self {
        ListResponse {
            status: "success",
            count: data.len(),
            total,
            pagination,
            data,
        }
    }
}

/// ANDs trusted equality conditions to a bound client filter. A field
/// already constrained by the client goes into `$and` so neither
/// condition replaces the other.
fn merge_scope(mut filter: Document, scope: &Document) -> Document {
    for (field, value) in scope {
        if !filter.contains_key(field) {
            filter.insert(field.clone(), value.clone());
            continue;
        }

        let clause = Bson::Document(doc!{ field.clone(): value.clone() });

        match filter.get_mut("$and") {
            Some(&mut Bson::Array(ref mut clauses)) => {
                clauses.push(clause);
                continue;
            }
            _ => {}
        }

        filter.insert("$and", Bson::Array(vec![clause]));
    }

    filter
}

impl QueryPlan {
    /// Executes the plan: binds the filter to the schema of `resource`,
    /// counts the matching documents, fetches the requested page and
    /// expands the requested relation.
    ///
    /// Every validation (binding, relation lookup) happens before the
    /// first store call, so an invalid plan never partially executes.
    pub fn execute<S>(&self, store: &S, resource: &ResourceSpec) -> Result<ListResponse>
        where S: DocumentStore + ?Sized
    {
        let filter = merge_scope(self.filter.bind(&resource.schema)?, &self.scope);
        let relation = match self.populate {
            Some(ref populate) => Some((resource.find_relation(&populate.path)?, &populate.select)),
            None => None,
        };
        let sort = self.sort.to_document();
        let skip = self.page.offset();
        let limit = self.page.limit;

        debug!(
            collection = %self.collection,
            filter = %filter,
            sort = %sort,
            skip,
            limit,
            "executing query plan"
        );

        let total = store.count(&self.collection, &filter).chain(
            || format!("can't count documents of `{}`", self.collection)
        )?;
        // A window past the last match is empty; don't send the offset.
        let mut data = if skip >= total {
            Vec::new()
        } else {
            let query = FindQuery::new(filter)
                .projection(self.projection.to_document())
                .sort(Some(sort))
                .window(skip, Some(limit));

            store.find(&self.collection, &query).chain(
                || format!("can't list documents of `{}`", self.collection)
            )?
        };

        if let Some((relation, select)) = relation {
            store.populate(relation, select, &mut data)?;
        }

        Ok(ListResponse::new(data, total, self.page.paginate(total)))
    }
}
