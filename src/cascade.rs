//! Deleting a parent document together with its dependent children.
//!
//! The order of operations is fixed: children are removed (and the
//! removal acknowledged) strictly before the parent. If the children
//! can't be removed, the parent stays, so a failed or cancelled cascade
//! leaves at worst orphaned children, never an orphaning parent deletion
//! half-way done. Running the cascade again finishes the job.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use bson::{ Bson, Document };
use tracing::{ debug, warn };
use crate::{
    aggregate::{ AggregateEngine, AggregateSpec },
    registry::Registry,
    store::{ DocumentStore, FindQuery, eval },
    error::{ Error, ErrorExt, ErrorKind, Result, ResultExt, ParentId, CollectionName },
};

/// A flag the caller raises to abandon a cascade. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A flag which is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag was raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns a `Cancelled` error if the flag was raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::new(ErrorKind::Cancelled, "cascade cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Children of `child_collection` whose `foreign_key_field` references
/// a deleted parent of `parent_collection` are deleted along with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeSpec {
    /// The collection of the deleted document.
    pub parent_collection: String,
    /// The collection of the dependent documents.
    pub child_collection: String,
    /// The field of the dependents referencing the parent's `_id`.
    pub foreign_key_field: String,
}

impl CascadeSpec {
    /// Declares a dependency.
    pub fn new<P, C, K>(parent_collection: P, child_collection: C, foreign_key_field: K) -> Self
        where P: Into<String>,
              C: Into<String>,
              K: Into<String>,
    {
        CascadeSpec {
            parent_collection: parent_collection.into(),
            child_collection: child_collection.into(),
            foreign_key_field: foreign_key_field.into(),
        }
    }

    /// The filter selecting the dependents of `parent_id`.
    fn children_of(&self, parent_id: &Bson) -> Document {
        doc!{ self.foreign_key_field.clone(): parent_id.clone() }
    }
}

/// The outcome of a completed cascade.
#[derive(Debug)]
pub struct CascadeReport {
    /// The deleted parent; `None` if it did not exist (anymore).
    pub parent: Option<Document>,
    /// The number of children removed, per child collection.
    pub children_removed: Vec<(String, u64)>,
    /// Aggregate recomputations that failed after the deletion.
    pub warnings: Vec<Error>,
}

/// An aggregate owned by a document other than the deleted parent, which
/// one of the removed children contributed to.
struct Owner<'a> {
    /// The aggregate.
    spec: &'a AggregateSpec,
    /// The `_id` of the owner.
    id: Bson,
}

/// Runs cascading deletions declared in a registry.
#[derive(Debug)]
pub struct CascadeCoordinator<'a, S: ?Sized> {
    /// Where parents and children live.
    store: &'a S,
    /// Where the cascade and aggregate specs come from.
    registry: &'a Registry,
}

impl<'a, S: DocumentStore + ?Sized> CascadeCoordinator<'a, S> {
    /// Creates a coordinator for the cascades declared in `registry`.
    pub fn new(store: &'a S, registry: &'a Registry) -> Self {
        CascadeCoordinator { store, registry }
    }

    /// Deletes the document `parent_id` of `collection` and every
    /// dependent declared for `collection`, then recomputes the
    /// aggregates the removed children contributed to elsewhere.
    ///
    /// If a child removal fails, stops with `CascadeIncomplete` and
    /// leaves the parent in place. `cancellation` is checked before every
    /// store call up to and including the deletion of the parent.
    pub fn delete_parent_cascade(
        &self,
        collection: &str,
        parent_id: &Bson,
        cancellation: &Cancellation,
    ) -> Result<CascadeReport> {
        let with_context = |error: Error| error
            .with_context::<ParentId>(parent_id.clone())
            .with_context::<CollectionName>(collection.to_string());
        let specs: Vec<_> = self.registry.cascades_for_parent(collection).collect();
        let mut owners = Vec::new();

        for spec in &specs {
            cancellation.check().map_err(with_context)?;
            self.collect_owners(collection, spec, parent_id, &mut owners).map_err(with_context)?;
        }

        let mut children_removed = Vec::with_capacity(specs.len());

        for spec in &specs {
            cancellation.check().map_err(with_context)?;

            let filter = spec.children_of(parent_id);
            let removed = self.store
                .delete_many(&spec.child_collection, &filter)
                .chain_as(ErrorKind::CascadeIncomplete, || format!(
                    "can't remove `{}` of {} in `{}`; the parent was kept",
                    spec.child_collection, parent_id, collection
                ))
                .map_err(with_context)
                .map_err(|error| {
                    warn!(
                        collection = %collection,
                        parent_id = %parent_id,
                        child_collection = %spec.child_collection,
                        error = %error,
                        "cascade aborted"
                    );
                    error
                })?;

            debug!(
                collection = %collection,
                parent_id = %parent_id,
                child_collection = %spec.child_collection,
                removed,
                "removed dependents"
            );
            children_removed.push((spec.child_collection.clone(), removed));
        }

        cancellation.check().map_err(with_context)?;

        let parent = match self.store.delete_by_id(collection, parent_id) {
            Ok(doc) => Some(doc),
            Err(ref error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(error).chain(
                || format!("removed dependents of {}, but not the parent", parent_id)
            ).map_err(with_context),
        };

        let engine = AggregateEngine::new(self.store, self.registry);
        let mut warnings = Vec::new();

        for owner in owners {
            if let Err(error) = engine.recompute(owner.spec, &owner.id) {
                warn!(
                    collection = %owner.spec.parent_collection,
                    parent_id = %owner.id,
                    error = %error,
                    "derived aggregate is stale after cascade"
                );
                warnings.push(error);
            }
        }

        // The parent may itself be the child of another aggregate.
        if let Some(ref doc) = parent {
            warnings.extend(engine.after_delete(collection, doc));
        }

        Ok(CascadeReport { parent, children_removed, warnings })
    }

    /// Collects the owners of other aggregates the dependents of
    /// `parent_id` contribute to. Must run before the dependents are gone.
    fn collect_owners<'b>(
        &'b self,
        collection: &str,
        cascade: &'b CascadeSpec,
        parent_id: &Bson,
        owners: &mut Vec<Owner<'b>>,
    ) -> Result<()> {
        let aggregates = self.registry
            .aggregates_for_child(&cascade.child_collection)
            .filter(|spec| {
                spec.parent_collection != collection
                    || spec.foreign_key_field != cascade.foreign_key_field
            });

        for spec in aggregates {
            let query = FindQuery::new(cascade.children_of(parent_id))
                .projection(Some(doc!{ spec.foreign_key_field.clone(): 1 }));
            let children = self.store.find(&cascade.child_collection, &query).chain_as(
                ErrorKind::CascadeIncomplete,
                || format!("can't read `{}` of {}", cascade.child_collection, parent_id)
            )?;

            for child in &children {
                if let Some(id) = spec.parent_of(child) {
                    let seen = owners.iter().any(|owner| {
                        owner.spec == spec && eval::equal(&owner.id, id)
                    });

                    if !seen {
                        owners.push(Owner { spec, id: id.clone() });
                    }
                }
            }
        }

        Ok(())
    }
}
