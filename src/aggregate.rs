//! Derived aggregates: summary fields of a parent document computed over
//! all of its children (e.g. the average tuition of a bootcamp's courses).
//!
//! Recomputation always re-reads the complete child set, so it is
//! idempotent. After writing, it reads the child set once more and
//! rewrites until the two agree, so a value computed from a stale child
//! set never stays on the parent: whichever recompute writes last has
//! also verified its value against every child committed before its
//! final read.

use bson::{ Bson, Document };
use tracing::{ debug, warn };
use crate::{
    ext::DocumentExt,
    literal::Triggers,
    registry::Registry,
    store::{ DocumentStore, GroupBy, Accumulator, eval },
    bsn::BsonExt,
    error::{ Error, ErrorExt, ErrorKind, Result, ResultExt, ParentId, ChildId, CollectionName },
};

/// How the source values of the children are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateFn {
    /// Arithmetic mean.
    Mean,
    /// Arithmetic mean, rounded up to an integer.
    MeanCeil,
    /// Sum.
    Sum,
    /// The number of children.
    Count,
}

impl AggregateFn {
    /// The store-side accumulator computing this function.
    fn accumulator(self) -> Accumulator {
        match self {
            AggregateFn::Mean | AggregateFn::MeanCeil => Accumulator::Avg,
            AggregateFn::Sum => Accumulator::Sum,
            AggregateFn::Count => Accumulator::Count,
        }
    }

    /// Whether the function reads a source field at all.
    pub fn needs_source(self) -> bool {
        self != AggregateFn::Count
    }
}

/// The value written when a parent has no children (or none of them
/// has a numeric source value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyValue {
    /// `null`
    Null,
    /// The integer `0`.
    Zero,
}

impl Default for EmptyValue {
    fn default() -> Self {
        EmptyValue::Null
    }
}

impl From<EmptyValue> for Bson {
    fn from(value: EmptyValue) -> Self {
        match value {
            EmptyValue::Null => Bson::Null,
            EmptyValue::Zero => Bson::I32(0),
        }
    }
}

/// Declares a parent field derived from one field of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    /// The collection of the documents holding the aggregate.
    pub parent_collection: String,
    /// The collection of the documents aggregated over.
    pub child_collection: String,
    /// The field of the children referencing the parent's `_id`.
    pub foreign_key_field: String,
    /// The field of the children being aggregated.
    #[serde(default)]
    pub source_field: String,
    /// The field of the parent the result is written to.
    pub aggregate_field: String,
    /// The combining function.
    pub aggregate_fn: AggregateFn,
    /// The value written for an empty set of children.
    #[serde(default)]
    pub on_empty: EmptyValue,
    /// The child mutations after which the aggregate is recomputed.
    #[serde(default)]
    pub triggers: Triggers,
}

impl AggregateSpec {
    /// An aggregate recomputed after every kind of mutation, with a
    /// `null` empty value.
    pub fn new<P, C, K, S, A>(
        parent_collection: P,
        child_collection: C,
        foreign_key_field: K,
        source_field: S,
        aggregate_field: A,
        aggregate_fn: AggregateFn,
    ) -> Self
        where P: Into<String>,
              C: Into<String>,
              K: Into<String>,
              S: Into<String>,
              A: Into<String>,
    {
        AggregateSpec {
            parent_collection: parent_collection.into(),
            child_collection: child_collection.into(),
            foreign_key_field: foreign_key_field.into(),
            source_field: source_field.into(),
            aggregate_field: aggregate_field.into(),
            aggregate_fn,
            on_empty: EmptyValue::default(),
            triggers: Triggers::default(),
        }
    }

    /// Builder-style setter for the empty value.
    pub fn on_empty(mut self, on_empty: EmptyValue) -> Self {
        self.on_empty = on_empty;
        self
    }

    /// Builder-style setter for the triggering mutations.
    pub fn triggers(mut self, triggers: Triggers) -> Self {
        self.triggers = triggers;
        self
    }

    /// The parent referenced by a child, unless it references none.
    pub fn parent_of<'a>(&self, child: &'a Document) -> Option<&'a Bson> {
        match child.get_path(&self.foreign_key_field) {
            None | Some(&Bson::Null) => None,
            Some(id) => Some(id),
        }
    }

    /// Whether an update of a child changed the source field or moved
    /// the child to another parent.
    pub fn affected_by_update(&self, before: &Document, after: &Document) -> bool {
        let changed = |path: &str| match (before.get_path(path), after.get_path(path)) {
            (Some(a), Some(b)) => !eval::equal(a, b),
            (None, None) => false,
            _ => true,
        };

        changed(&self.foreign_key_field) || (self.aggregate_fn.needs_source() && changed(&self.source_field))
    }

    /// The grouping computing the aggregate of one parent.
    fn group_by(&self, parent_id: &Bson) -> GroupBy {
        GroupBy {
            filter: doc!{ self.foreign_key_field.clone(): parent_id.clone() },
            key: self.foreign_key_field.clone(),
            accumulator: self.aggregate_fn.accumulator(),
            field: self.source_field.clone(),
        }
    }

    /// Turns the accumulated value (if there was a group) into the value
    /// to be written.
    #[allow(clippy::cast_possible_truncation)]
    fn finish(&self, value: Option<Bson>) -> Bson {
        let value = match value {
            None | Some(Bson::Null) => return self.on_empty.into(),
            Some(value) => value,
        };

        match self.aggregate_fn {
            AggregateFn::MeanCeil => match value.try_as_f64() {
                Some(x) if x.is_finite() => Bson::I64(x.ceil() as i64),
                _ => self.on_empty.into(),
            },
            _ => value,
        }
    }
}

/// The result of recomputing one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    /// The value computed (and written, if the parent exists).
    pub value: Bson,
    /// Whether the parent still existed.
    pub parent_found: bool,
}

/// How many times a recompute rewrites a value that the children
/// changed under before giving up. Every extra round needs another child
/// mutation committed between a write and its verification.
const MAX_SETTLE_ROUNDS: usize = 64;

/// Recomputes derived aggregates after child mutations.
///
/// Failures never undo the child mutation that triggered them: the
/// `after_*` hooks log them and hand them back as warnings.
#[derive(Debug)]
pub struct AggregateEngine<'a, S: ?Sized> {
    /// Where children and parents live.
    store: &'a S,
    /// Where the aggregate specs come from.
    registry: &'a Registry,
}

impl<'a, S: DocumentStore + ?Sized> AggregateEngine<'a, S> {
    /// Creates an engine for the aggregates declared in `registry`.
    pub fn new(store: &'a S, registry: &'a Registry) -> Self {
        AggregateEngine { store, registry }
    }

    /// Recomputes the aggregate over every child of `parent_id` and writes
    /// it onto the parent. A parent which no longer exists is not an
    /// error; nothing is written then.
    ///
    /// The value is verified after the write. If the children changed in
    /// the meantime, the fresh value is written and verified in turn.
    pub fn recompute(&self, spec: &AggregateSpec, parent_id: &Bson) -> Result<Recomputed> {
        let with_context = |error: Error| error
            .with_context::<ParentId>(parent_id.clone())
            .with_context::<CollectionName>(spec.parent_collection.clone());

        let mut value = self.compute(spec, parent_id).map_err(with_context)?;

        for round in 1..=MAX_SETTLE_ROUNDS {
            let fields = doc!{ spec.aggregate_field.clone(): value.clone() };

            match self.store.update_by_id(&spec.parent_collection, parent_id, fields) {
                Ok(_) => {}
                Err(ref error) if error.kind() == ErrorKind::NotFound => {
                    debug!(
                        collection = %spec.parent_collection,
                        parent_id = %parent_id,
                        field = %spec.aggregate_field,
                        "parent of aggregate is gone"
                    );
                    return Ok(Recomputed { value, parent_found: false });
                }
                Err(error) => return Err(error)
                    .chain_as(ErrorKind::AggregateWriteFailed, || format!(
                        "can't write `{}.{}`", spec.parent_collection, spec.aggregate_field
                    ))
                    .map_err(with_context),
            }

            let settled = self.compute(spec, parent_id).map_err(with_context)?;

            if eval::equal(&settled, &value) {
                debug!(
                    collection = %spec.parent_collection,
                    parent_id = %parent_id,
                    field = %spec.aggregate_field,
                    value = %value,
                    round,
                    "recomputed aggregate"
                );
                return Ok(Recomputed { value, parent_found: true });
            }

            debug!(
                collection = %spec.parent_collection,
                parent_id = %parent_id,
                field = %spec.aggregate_field,
                stale = %value,
                fresh = %settled,
                "children changed during recompute"
            );
            value = settled;
        }

        Err(Error::new(
            ErrorKind::AggregateWriteFailed,
            format!(
                "`{}.{}` did not settle after {} rewrites",
                spec.parent_collection, spec.aggregate_field, MAX_SETTLE_ROUNDS
            )
        )).map_err(with_context)
    }

    /// Reads the children of `parent_id` and computes the value to write.
    fn compute(&self, spec: &AggregateSpec, parent_id: &Bson) -> Result<Bson> {
        let rows = self.store
            .aggregate_group_by(&spec.child_collection, &spec.group_by(parent_id))
            .chain_as(ErrorKind::AggregateWriteFailed, || format!(
                "can't aggregate `{}.{}`", spec.child_collection, spec.source_field
            ))?;
        let group = rows.into_iter().find(|row| eval::equal(&row.key, parent_id));

        Ok(spec.finish(group.map(|row| row.value)))
    }

    /// Recomputes `spec` for one parent, turning a failure into a warning.
    fn settle(&self, spec: &AggregateSpec, parent_id: &Bson, child_id: Option<&Bson>, warnings: &mut Vec<Error>) {
        if let Err(mut error) = self.recompute(spec, parent_id) {
            warn!(
                collection = %spec.parent_collection,
                parent_id = %parent_id,
                child_id = ?child_id,
                error = %error,
                "derived aggregate is stale"
            );

            if let Some(id) = child_id {
                error.set_context::<ChildId>(id.clone());
            }

            warnings.push(error);
        }
    }

    /// The aggregates over `collection` recomputed after `trigger`.
    fn specs_for<'b>(&'b self, collection: &'b str, trigger: Triggers) -> Vec<&'b AggregateSpec> {
        self.registry
            .aggregates_for_child(collection)
            .filter(|spec| spec.triggers.contains(trigger))
            .collect()
    }

    /// Call after `child` was inserted into `collection`.
    pub fn after_create(&self, collection: &str, child: &Document) -> Vec<Error> {
        let mut warnings = Vec::new();

        for spec in self.specs_for(collection, Triggers::CREATE) {
            if let Some(parent_id) = spec.parent_of(child) {
                self.settle(spec, parent_id, child.get("_id"), &mut warnings);
            }
        }

        warnings
    }

    /// Call after a child of `collection` was modified from `before` to
    /// `after`. When the child moved, both parents are recomputed.
    pub fn after_update(&self, collection: &str, before: &Document, after: &Document) -> Vec<Error> {
        let mut warnings = Vec::new();

        for spec in self.specs_for(collection, Triggers::UPDATE) {
            if !spec.affected_by_update(before, after) {
                continue;
            }

            let old_parent = spec.parent_of(before);
            let new_parent = spec.parent_of(after);

            if let Some(parent_id) = new_parent {
                self.settle(spec, parent_id, after.get("_id"), &mut warnings);
            }
            if let Some(parent_id) = old_parent {
                if new_parent.map_or(true, |new_id| !eval::equal(new_id, parent_id)) {
                    self.settle(spec, parent_id, before.get("_id"), &mut warnings);
                }
            }
        }

        warnings
    }

    /// Call after `child` was removed from `collection`.
    pub fn after_delete(&self, collection: &str, child: &Document) -> Vec<Error> {
        let mut warnings = Vec::new();

        for spec in self.specs_for(collection, Triggers::DELETE) {
            if let Some(parent_id) = spec.parent_of(child) {
                self.settle(spec, parent_id, child.get("_id"), &mut warnings);
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use bson::Bson;
    use crate::{
        literal::Triggers,
        registry::{ Registry, ResourceSpec },
        store::{ DocumentStore, MemoryStore, FindQuery, GroupRow },
        error::{ ErrorExt, ErrorKind, Result },
    };
    use super::*;

    fn registry(specs: Vec<AggregateSpec>) -> Result<Registry> {
        specs.into_iter().fold(
            Registry::builder()
                .resource(ResourceSpec::new("bootcamps"))
                .resource(ResourceSpec::new("courses")),
            |builder, spec| builder.aggregate(spec),
        ).build()
    }

    fn average_cost() -> AggregateSpec {
        AggregateSpec::new("bootcamps", "courses", "bootcamp", "tuition", "averageCost", AggregateFn::MeanCeil)
    }

    #[test]
    fn mean_rounded_up() -> Result<()> {
        let store = MemoryStore::new();
        let registry = registry(vec![average_cost()])?;
        let engine = AggregateEngine::new(&store, &registry);

        store.insert_many("bootcamps", vec![doc!{ "_id": 1 }])?;
        store.insert_many("courses", vec![
            doc!{ "bootcamp": 1, "tuition": 8000 },
            doc!{ "bootcamp": 1, "tuition": 9001 },
            doc!{ "bootcamp": 2, "tuition": 100 },
        ])?;

        let result = engine.recompute(&average_cost(), &Bson::I32(1))?;

        assert_eq!(result, Recomputed { value: Bson::I64(8501), parent_found: true });
        assert_eq!(store.find_by_id("bootcamps", &Bson::I32(1))?, Some(doc!{ "_id": 1, "averageCost": 8501_i64 }));

        Ok(())
    }

    #[test]
    fn empty_group_writes_empty_value() -> Result<()> {
        let store = MemoryStore::new();
        let zero = average_cost().on_empty(EmptyValue::Zero);
        let registry = registry(vec![average_cost()])?;
        let engine = AggregateEngine::new(&store, &registry);

        store.insert_many("bootcamps", vec![doc!{ "_id": 1, "averageCost": 5000 }])?;

        assert_eq!(engine.recompute(&average_cost(), &Bson::I32(1))?.value, Bson::Null);
        assert_eq!(store.find_by_id("bootcamps", &Bson::I32(1))?,
                   Some(doc!{ "_id": 1, "averageCost": Bson::Null }));

        assert_eq!(engine.recompute(&zero, &Bson::I32(1))?.value, Bson::I32(0));

        Ok(())
    }

    #[test]
    fn missing_parent_is_a_no_op() -> Result<()> {
        let store = MemoryStore::new();
        let registry = registry(vec![average_cost()])?;
        let engine = AggregateEngine::new(&store, &registry);

        let result = engine.recompute(&average_cost(), &Bson::I32(7))?;

        assert!(!result.parent_found);
        assert!(store.documents("bootcamps")?.is_empty());

        Ok(())
    }

    #[test]
    fn moved_child_recomputes_both_parents() -> Result<()> {
        let store = MemoryStore::new();
        let count = AggregateSpec::new("bootcamps", "courses", "bootcamp", "", "courseCount", AggregateFn::Count)
            .on_empty(EmptyValue::Zero);
        let registry = registry(vec![count])?;
        let engine = AggregateEngine::new(&store, &registry);

        store.insert_many("bootcamps", vec![doc!{ "_id": 1 }, doc!{ "_id": 2 }])?;
        store.insert_many("courses", vec![doc!{ "_id": 10, "bootcamp": 2 }])?;

        let before = doc!{ "_id": 10, "bootcamp": 1 };
        let after = doc!{ "_id": 10, "bootcamp": 2 };
        let warnings = engine.after_update("courses", &before, &after);

        assert!(warnings.is_empty());
        assert_eq!(store.documents("bootcamps")?, vec![
            doc!{ "_id": 1, "courseCount": 0 },
            doc!{ "_id": 2, "courseCount": 1_i64 },
        ]);

        Ok(())
    }

    #[test]
    fn unrelated_updates_and_disabled_triggers_are_skipped() -> Result<()> {
        let store = MemoryStore::new();
        let spec = average_cost().triggers(Triggers::CREATE);
        let registry = registry(vec![spec.clone()])?;
        let engine = AggregateEngine::new(&store, &registry);

        store.insert_many("bootcamps", vec![doc!{ "_id": 1 }])?;

        assert!(!spec.affected_by_update(
            &doc!{ "bootcamp": 1, "tuition": 1, "title": "a" },
            &doc!{ "bootcamp": 1, "tuition": 1, "title": "b" },
        ));
        assert!(spec.affected_by_update(
            &doc!{ "bootcamp": 1, "tuition": 1 },
            &doc!{ "bootcamp": 1, "tuition": 2 },
        ));

        engine.after_delete("courses", &doc!{ "bootcamp": 1, "tuition": 1 });
        assert_eq!(store.documents("bootcamps")?, vec![doc!{ "_id": 1 }]);

        Ok(())
    }

    #[test]
    fn failed_recompute_is_aggregate_write_failed() -> Result<()> {
        let store = MemoryStore::new();
        let broken = AggregateSpec::new("bootcamps", "courses", "$bootcamp", "tuition", "averageCost", AggregateFn::Mean);
        let registry = registry(vec![average_cost()])?;
        let engine = AggregateEngine::new(&store, &registry);

        // `$bootcamp` compiles to an unknown top-level operator.
        let error = engine.recompute(&broken, &Bson::I32(1)).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::AggregateWriteFailed);
        assert_eq!(error.context::<ParentId>(), Some(&Bson::I32(1)));

        Ok(())
    }

    /// Commits one more child right after the first group read, so the
    /// value computed from that read is stale by the time it is written.
    struct LateChild {
        inner: MemoryStore,
        late: Mutex<Option<Document>>,
    }

    impl DocumentStore for LateChild {
        fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>> {
            self.inner.find(collection, query)
        }

        fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
            self.inner.count(collection, filter)
        }

        fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>> {
            let rows = self.inner.aggregate_group_by(collection, group)?;

            if let Some(child) = self.late.lock().unwrap().take() {
                self.inner.insert_one(collection, child)?;
            }

            Ok(rows)
        }

        fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
            self.inner.insert_one(collection, document)
        }

        fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document> {
            self.inner.update_by_id(collection, id, fields)
        }

        fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
            self.inner.delete_many(collection, filter)
        }

        fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document> {
            self.inner.delete_by_id(collection, id)
        }
    }

    #[test]
    fn stale_write_is_corrected_before_returning() -> Result<()> {
        let spec = AggregateSpec::new("bootcamps", "courses", "bootcamp", "tuition", "averageCost", AggregateFn::Mean);
        let store = LateChild {
            inner: MemoryStore::new(),
            late: Mutex::new(Some(doc!{ "_id": 11, "bootcamp": 1, "tuition": 10 })),
        };
        let registry = registry(vec![spec.clone()])?;
        let engine = AggregateEngine::new(&store, &registry);

        store.inner.insert_many("bootcamps", vec![doc!{ "_id": 1 }])?;
        store.inner.insert_many("courses", vec![doc!{ "_id": 10, "bootcamp": 1, "tuition": 2 }])?;

        let result = engine.recompute(&spec, &Bson::I32(1))?;

        assert_eq!(result, Recomputed { value: Bson::FloatingPoint(6.0), parent_found: true });
        assert_eq!(store.inner.count("courses", &doc!{})?, 2);
        assert_eq!(store.inner.documents("bootcamps")?, vec![doc!{ "_id": 1, "averageCost": 6.0 }]);

        Ok(())
    }
}
