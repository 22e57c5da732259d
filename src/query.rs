//! Turning untrusted listing parameters into a validated, executable
//! query plan, and executing it.
//!
//! The pipeline is `QueryRequest` → `FilterExpression` (structural
//! operator detection) → `QueryPlan` (projection, sort, page window,
//! relation expansion) → `ListResponse`.

pub mod request;
pub mod filter;
pub mod page;
pub mod plan;
pub mod execute;

pub use self::request::{ QueryRequest, RESERVED_KEYS };
pub use self::filter::{ FilterExpression, FieldPolicy, Predicate };
pub use self::page::{ PageSpec, PageRef, Pagination };
pub use self::plan::{ Projection, SortSpec, Populate, QueryPlan, QueryPlanBuilder };
pub use self::execute::ListResponse;
