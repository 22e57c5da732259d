//! An in-process document store.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::{ RwLock, RwLockReadGuard, RwLockWriteGuard };
use bson::{ Bson, Document, oid::ObjectId };
use crate::{
    ext::DocumentExt,
    bsn::BsonExt,
    store::{ DocumentStore, FindQuery, GroupBy, GroupRow, Accumulator, not_found },
    store::eval::{ self, Filter },
    error::{ Error, ErrorKind, Result },
};

/// Collections of documents held in memory, in insertion order.
///
/// Queries are evaluated with the same semantics as MongoDB applies to
/// the subset of the query language this crate generates. Every method
/// holds the lock for its whole duration, so each is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Collection name => documents.
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    /// Creates a store without any collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every document of a collection in natural order.
    pub fn documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.read()?;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    /// Inserts many documents, returning their `_id`s in order.
    pub fn insert_many<I>(&self, collection: &str, documents: I) -> Result<Vec<Bson>>
        where I: IntoIterator<Item = Document>
    {
        documents
            .into_iter()
            .map(|doc| self.insert_one(collection, doc))
            .collect()
    }

    /// Acquires the lock for reading.
    fn read(&self) -> Result<RwLockReadGuard<HashMap<String, Vec<Document>>>> {
        self.collections.read().map_err(|_| Error::new(
            ErrorKind::LockPoisoned, "memory store lock poisoned"
        ))
    }

    /// Acquires the lock for writing.
    fn write(&self) -> Result<RwLockWriteGuard<HashMap<String, Vec<Document>>>> {
        self.collections.write().map_err(|_| Error::new(
            ErrorKind::LockPoisoned, "memory store lock poisoned"
        ))
    }
}

/// Whether `doc` has the given `_id`.
fn has_id(doc: &Document, id: &Bson) -> bool {
    doc.get("_id").map_or(false, |own| eval::equal(own, id))
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>> {
        let filter = Filter::compile(&query.filter)?;
        let collections = self.read()?;
        let all = collections.get(collection).map_or(&[][..], Vec::as_slice);
        let mut docs: Vec<_> = all.iter().filter(|d| filter.matches(d)).cloned().collect();
        drop(collections);

        if let Some(ref sort) = query.sort {
            eval::sort_documents(&mut docs, sort)?;
        }

        let skip = usize::try_from(query.skip).unwrap_or(usize::max_value());
        let limit = query.limit.map_or(usize::max_value(), |n| {
            usize::try_from(n).unwrap_or(usize::max_value())
        });
        let window = docs.into_iter().skip(skip).take(limit);

        Ok(match query.projection {
            Some(ref projection) => window.map(|d| eval::project(&d, projection)).collect(),
            None => window.collect(),
        })
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        let filter = Filter::compile(filter)?;
        let collections = self.read()?;
        let n = collections
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|d| filter.matches(d)).count());

        Ok(n as u64)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>> {
        let filter = Filter::compile(&group.filter)?;
        let collections = self.read()?;
        let docs = collections.get(collection).map_or(&[][..], Vec::as_slice);
        let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();

        for doc in docs.iter().filter(|d| filter.matches(d)) {
            let key = doc.get_path(&group.key).cloned().unwrap_or(Bson::Null);

            match groups.iter_mut().find(|entry| eval::equal(&entry.0, &key)) {
                Some(entry) => entry.1.push(doc),
                None => groups.push((key, vec![doc])),
            }
        }

        let rows = groups.into_iter().map(|(key, members)| {
            let numbers = members
                .iter()
                .filter_map(|&d| d.get_path(&group.field));
            let value = match group.accumulator {
                Accumulator::Count => Bson::I64(members.len() as i64),
                Accumulator::Avg => {
                    let xs: Vec<f64> = numbers.filter_map(BsonExt::try_as_f64).collect();
                    if xs.is_empty() {
                        Bson::Null
                    } else {
                        Bson::FloatingPoint(xs.iter().sum::<f64>() / xs.len() as f64)
                    }
                }
                Accumulator::Sum => sum(numbers),
            };

            GroupRow { key, value }
        });

        Ok(rows.collect())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        let mut document = document;
        let id = match document.remove("_id") {
            Some(id) => id,
            None => Bson::ObjectId(ObjectId::new()?),
        };
        let mut stored = doc!{ "_id": id.clone() };

        for (key, value) in document {
            stored.insert(key, value);
        }

        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_insert_with(Vec::new);

        if docs.iter().any(|d| has_id(d, &id)) {
            return Err(Error::new(
                ErrorKind::DuplicateKey,
                format!("_id {} already exists in `{}`", id, collection)
            ));
        }

        docs.push(stored);
        Ok(id)
    }

    fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document> {
        if fields.contains_key("_id") {
            return Err(Error::new(ErrorKind::MalformedQuery, "the `_id` field is immutable"));
        }

        let mut collections = self.write()?;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| has_id(d, id)))
            .ok_or_else(|| not_found(collection, id))?;

        for (path, value) in fields {
            doc.set_path(&path, value);
        }

        Ok(doc.clone())
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        let filter = Filter::compile(filter)?;
        let mut collections = self.write()?;
        let docs = match collections.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };
        let before = docs.len();

        docs.retain(|d| !filter.matches(d));

        Ok((before - docs.len()) as u64)
    }

    fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document> {
        let mut collections = self.write()?;
        let docs = collections.get_mut(collection).ok_or_else(|| not_found(collection, id))?;
        let index = docs.iter().position(|d| has_id(d, id)).ok_or_else(|| not_found(collection, id))?;

        Ok(docs.remove(index))
    }
}

/// Sums the numeric values; an integer if every value is an integer.
#[allow(clippy::cast_precision_loss)]
fn sum<'a, I: Iterator<Item = &'a Bson>>(values: I) -> Bson {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;

    for value in values {
        match *value {
            Bson::I32(n) => {
                int_sum = int_sum.and_then(|s| s.checked_add(i64::from(n)));
                float_sum += f64::from(n);
            }
            Bson::I64(n) => {
                int_sum = int_sum.and_then(|s| s.checked_add(n));
                float_sum += n as f64;
            }
            Bson::FloatingPoint(x) => {
                int_sum = None;
                float_sum += x;
            }
            _ => {}
        }
    }

    int_sum.map_or(Bson::FloatingPoint(float_sum), Bson::I64)
}
