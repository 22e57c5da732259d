//! The Resourcery prelude provides re-exports of the most commonly used
//! traits and types for convenience, including ones from crate `bson`.

pub use crate::doc::Doc;
pub use crate::schema::{ Schema, FieldType };
pub use crate::config::QueryConfig;
pub use crate::registry::{ Registry, RegistryBuilder, ResourceSpec, Relation };
pub use crate::query::{
    QueryRequest, FilterExpression, FieldPolicy, QueryPlan,
    PageSpec, PageRef, Pagination, Projection, SortSpec, Populate, ListResponse,
};
pub use crate::store::{ DocumentStore, FindQuery, MemoryStore, MongoStore };
pub use crate::aggregate::{ AggregateSpec, AggregateFn, AggregateEngine, EmptyValue };
pub use crate::cascade::{ CascadeSpec, CascadeCoordinator, CascadeReport, Cancellation };
pub use crate::resource::{ Resources, Mutation };
pub use crate::literal::{ Order, Operator, Triggers };
pub use crate::error::{ Error, ErrorKind, ErrorExt, Result, ResultExt };
pub use bson::{ Bson, Document, oid::ObjectId };
