//! Resourcery: paginated, filtered, relation-aware listings over document
//! stores, with derived aggregates kept consistent across child mutations.
//!
//! A [`Registry`](registry/struct.Registry.html) declares the collections
//! (their schemas and relations), the derived aggregates and the cascading
//! deletions. A [`Resources`](resource/struct.Resources.html) service wraps
//! a [`DocumentStore`](store/trait.DocumentStore.html) and the registry:
//!
//! ```
//! # #[macro_use]
//! # extern crate bson;
//! # #[macro_use]
//! # extern crate serde_json;
//! # extern crate resourcery;
//! #
//! # use std::sync::Arc;
//! # use resourcery::prelude::*;
//! #
//! # fn main() -> resourcery::error::Result<()> {
//! let registry = Registry::builder()
//!     .resource(ResourceSpec::new("bootcamps"))
//!     .resource(ResourceSpec::new("courses")
//!         .schema(Schema::new().field("tuition", FieldType::Number))
//!         .relation(Relation::reference("bootcamp", "bootcamps")))
//!     .aggregate(AggregateSpec::new(
//!         "bootcamps", "courses", "bootcamp", "tuition", "averageCost", AggregateFn::MeanCeil
//!     ))
//!     .cascade(CascadeSpec::new("bootcamps", "courses", "bootcamp"))
//!     .build()?;
//! let resources = Resources::new(MemoryStore::new(), Arc::new(registry));
//!
//! let bootcamp = resources.create("bootcamps", doc!{ "name": "Devworks" })?.document;
//! let id = bootcamp.get("_id").cloned().unwrap_or(Bson::Null);
//!
//! for tuition in &[8000, 9000, 10000] {
//!     resources.create("courses", doc!{ "bootcamp": id.clone(), "tuition": *tuition })?;
//! }
//!
//! let request = QueryRequest::new()
//!     .with("tuition", json!({ "gte": "9000" }))
//!     .with("limit", "1");
//! let listing = resources.list("courses", &request)?;
//!
//! assert_eq!(listing.total, 2);
//! assert_eq!(listing.count, 1);
//! assert!(listing.pagination.next.is_some());
//! assert_eq!(resources.get("bootcamps", &id, None)?.get("averageCost"), Some(&Bson::I64(9000)));
//! #
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/resourcery/0.1.0")]
#![deny(missing_debug_implementations, missing_copy_implementations,
        trivial_casts, trivial_numeric_casts,
        unsafe_code,
        unstable_features,
        unused_import_braces, unused_qualifications, missing_docs)]
#![allow(clippy::single_match, clippy::match_same_arms, clippy::match_ref_pats,
         clippy::clone_on_ref_ptr, clippy::needless_pass_by_value)]
#![deny(clippy::wrong_pub_self_convention, clippy::used_underscore_binding,
        clippy::similar_names, clippy::pub_enum_variant_names,
        clippy::missing_docs_in_private_items,
        clippy::non_ascii_literal, clippy::unicode_not_nfc,
        clippy::result_unwrap_used, clippy::option_unwrap_used,
        clippy::option_map_unwrap_or_else, clippy::option_map_unwrap_or,
        clippy::shadow_unrelated,
        clippy::int_plus_one, clippy::string_add_assign, clippy::if_not_else,
        clippy::invalid_upcast_comparisons,
        clippy::cast_lossless,
        clippy::cast_possible_wrap, clippy::cast_possible_truncation,
        clippy::mutex_integer, clippy::mut_mut, clippy::items_after_statements,
        clippy::print_stdout, clippy::mem_forget, clippy::maybe_infinite_iter)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate bson;
extern crate mongodb;
#[macro_use]
extern crate serde_derive;
extern crate serde;
#[cfg_attr(test, macro_use)]
extern crate serde_json;
extern crate backtrace;
extern crate typemap;
extern crate chrono;
extern crate tracing;

pub mod error;
pub mod utils;
pub mod bsn;
pub mod literal;
pub mod ext;
pub mod schema;
pub mod config;
pub mod doc;
pub mod registry;
pub mod query;
pub mod store;
pub mod populate;
pub mod aggregate;
pub mod cascade;
pub mod resource;
pub mod prelude;
