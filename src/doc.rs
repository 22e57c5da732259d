//! A document is a direct member of a collection.

use serde::{ Serialize, Deserialize };
use crate::{
    schema::Schema,
    registry::Relation,
    query::Populate,
};

/// Implemented by strongly-typed top-level (direct collection member)
/// documents. These types always have an associated collection name,
/// and their registry entry can be derived from the type.
pub trait Doc: Serialize + for<'a> Deserialize<'a> {
    /// The name of the collection within the database.
    const NAME: &'static str;

    /// Returns the declared field types of the collection. If not
    /// provided, nothing but `_id` is declared, so filter values are
    /// passed to the store verbatim.
    fn schema() -> Schema {
        Schema::new()
    }

    /// Returns the relations which may be expanded on listings and reads.
    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    /// The relation expanded by default, if any.
    fn populate() -> Option<Populate> {
        None
    }
}
