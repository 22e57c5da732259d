//! The document store: the narrow collection interface every read and
//! write of this crate goes through.
//!
//! Each method is a single atomic operation on one collection; there are
//! no cross-collection transactions. Filters, projections and sort
//! specifications are query documents in the MongoDB dialect, restricted
//! to what `query::FilterExpression::bind()` and the rest of this crate
//! produce: `$eq`, `$gt`, `$gte`, `$lt`, `$lte`, `$in` and `$and`.

use std::sync::Arc;
use bson::{ Bson, Document };
use crate::{
    error::{ Error, ErrorKind, Result },
    query::Projection,
    registry::Relation,
    populate,
};

pub mod eval;
pub mod memory;
pub mod mongo;

pub use self::memory::MemoryStore;
pub use self::mongo::MongoStore;

/// Parameters of a `find()` read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Which documents to return.
    pub filter: Document,
    /// Inclusion projection (`{ field: 1 }`); `None` returns whole documents.
    pub projection: Option<Document>,
    /// Sort specification (`{ field: 1 | -1 }`), applied before skip and limit.
    pub sort: Option<Document>,
    /// The number of matching documents to skip.
    pub skip: u64,
    /// The maximal number of documents to return.
    pub limit: Option<u64>,
}

impl FindQuery {
    /// A query returning every document matching `filter`, in natural order.
    pub fn new(filter: Document) -> Self {
        FindQuery { filter, ..Default::default() }
    }

    /// Builder-style setter for the projection.
    pub fn projection(mut self, projection: Option<Document>) -> Self {
        self.projection = projection;
        self
    }

    /// Builder-style setter for the sort specification.
    pub fn sort(mut self, sort: Option<Document>) -> Self {
        self.sort = sort;
        self
    }

    /// Builder-style setter for the page window.
    pub fn window(mut self, skip: u64, limit: Option<u64>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

/// How the values of a group are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accumulator {
    /// Arithmetic mean of the numeric values; `null` if there are none.
    Avg,
    /// Sum of the numeric values.
    Sum,
    /// The number of documents in the group.
    Count,
}

/// A single-stage "match, then group" aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    /// Only documents matching this filter take part.
    pub filter: Document,
    /// The field whose value identifies the group.
    pub key: String,
    /// The combination applied to `field` in each group.
    pub accumulator: Accumulator,
    /// The field whose values are combined. Ignored by `Count`.
    pub field: String,
}

/// One group of a `GroupBy` result.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// The common value of the group key.
    pub key: Bson,
    /// The accumulated value.
    pub value: Bson,
}

/// A collection-oriented document store.
pub trait DocumentStore {
    /// Returns the documents matching the query.
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>>;

    /// Returns the number of documents matching the filter.
    fn count(&self, collection: &str, filter: &Document) -> Result<u64>;

    /// Groups the documents matching `group.filter` by `group.key`.
    fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>>;

    /// Inserts a document, generating an `ObjectId` for it unless it has
    /// an `_id` already. Returns the `_id`.
    fn insert_one(&self, collection: &str, document: Document) -> Result<Bson>;

    /// Sets the given top-level fields of the document with the given
    /// `_id`, returning the document as it is after the update. Fails with
    /// `NotFound` if there is no such document.
    fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document>;

    /// Deletes every document matching the filter. Returns their number.
    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64>;

    /// Deletes the document with the given `_id`, returning it. Fails with
    /// `NotFound` if there is no such document.
    fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document>;

    /// Returns the document with the given `_id`, if any.
    fn find_by_id(&self, collection: &str, id: &Bson) -> Result<Option<Document>> {
        let query = FindQuery::new(doc!{ "_id": id.clone() }).window(0, Some(1));
        self.find(collection, &query).map(|docs| docs.into_iter().next())
    }

    /// Replaces the relation field of each document with the related
    /// document(s), projected to `select` (all fields if empty).
    fn populate(&self, relation: &Relation, select: &Projection, docs: &mut [Document]) -> Result<()> {
        populate::expand(self, relation, select, docs)
    }
}

/// The `NotFound` error reported for a missing `_id`.
pub(crate) fn not_found(collection: &str, id: &Bson) -> Error {
    Error::new(
        ErrorKind::NotFound,
        format!("no document with _id {} in `{}`", id, collection)
    )
}

/// Implementing `DocumentStore` for pointer-like types by forwarding.
macro_rules! impl_store_for_pointer {
    ($($ptr:ty),*) => {$(
        impl<S: DocumentStore + ?Sized> DocumentStore for $ptr {
            fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>> {
                (**self).find(collection, query)
            }

            fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
                (**self).count(collection, filter)
            }

            fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>> {
                (**self).aggregate_group_by(collection, group)
            }

            fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
                (**self).insert_one(collection, document)
            }

            fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document> {
                (**self).update_by_id(collection, id, fields)
            }

            fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
                (**self).delete_many(collection, filter)
            }

            fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document> {
                (**self).delete_by_id(collection, id)
            }

            fn find_by_id(&self, collection: &str, id: &Bson) -> Result<Option<Document>> {
                (**self).find_by_id(collection, id)
            }

            fn populate(&self, relation: &Relation, select: &Projection, docs: &mut [Document]) -> Result<()> {
                (**self).populate(relation, select, docs)
            }
        }
    )*}
}

impl_store_for_pointer! { &S, Box<S>, Arc<S> }
