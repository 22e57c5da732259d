//! A document store backed by a MongoDB database.

use std::{ cmp, fmt, i32 };
use std::fmt::Write;
use bson::{ Bson, Document };
use mongodb::common::WriteConcern;
use mongodb::db::{ Database, ThreadedDatabase };
use mongodb::coll::options::{
    FindOptions,
    CountOptions,
    AggregateOptions,
    FindOneAndDeleteOptions,
    FindOneAndUpdateOptions,
    ReturnDocument,
};
use crate::{
    config::QueryConfig,
    store::{ DocumentStore, FindQuery, GroupBy, GroupRow, Accumulator, not_found },
    utils::{ int_to_usize_with_msg, u64_to_i64_saturating },
    error::{ Error, ErrorKind, Result, ResultExt, server_error_kind },
};

/// A `DocumentStore` over the collections of one MongoDB database.
#[derive(Clone)]
pub struct MongoStore {
    /// The backing database handle.
    db: Database,
    /// Server-side time limit of every operation.
    max_time_ms: Option<i64>,
}

impl MongoStore {
    /// Wraps a database handle. Operations are not time-limited.
    pub fn new(db: Database) -> Self {
        MongoStore { db, max_time_ms: None }
    }

    /// Wraps a database handle, limiting every operation to the
    /// `max_time_ms` of `config`.
    pub fn with_config(db: Database, config: &QueryConfig) -> Self {
        Self::new(db).max_time_ms(config.max_time_ms)
    }

    /// Builder-style setter for the server-side time limit. Reads and
    /// find-and-modify writes pass it as `maxTimeMS`; plain inserts and
    /// bulk deletes as the `wtimeout` of their write concern.
    pub fn max_time_ms(mut self, max_time_ms: Option<i64>) -> Self {
        self.max_time_ms = max_time_ms;
        self
    }

    /// The server-side time limit, if any.
    pub fn time_limit(&self) -> Option<i64> {
        self.max_time_ms
    }

    /// The write concern of inserts and bulk deletes.
    #[allow(clippy::cast_possible_truncation)]
    fn write_concern(&self) -> Option<WriteConcern> {
        self.max_time_ms.map(|ms| WriteConcern {
            w_timeout: cmp::max(cmp::min(ms, i64::from(i32::MAX)), 0) as i32,
            ..Default::default()
        })
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MongoStore")
            .field("max_time_ms", &self.max_time_ms)
            .finish()
    }
}

/// Drains a driver cursor. The driver reports some server errors as an
/// `Ok` document with an `$err` field; those are turned into errors here.
fn drain(cursor: mongodb::cursor::Cursor, message: &str) -> Result<Vec<Document>> {
    cursor
        .map(|result| {
            let mut doc = result.chain("can't step cursor")?;

            if let Some(Bson::String(mut errmsg)) = doc.remove("$err") {
                if let Ok(code) = doc.get_i32("code") {
                    write!(errmsg, " (code: {})", code).ok();
                } else if let Ok(code) = doc.get_i64("code") {
                    write!(errmsg, " (code: {})", code).ok();
                }

                let kind = doc.get_i32("code").map(i64::from)
                    .or_else(|_| doc.get_i64("code"))
                    .map_or(ErrorKind::MongoDbError, server_error_kind);

                return Err(Error::new(kind, format!("{}: {}", message, errmsg)));
            }

            Ok(doc)
        })
        .collect()
}

impl DocumentStore for MongoStore {
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>> {
        let message = || format!("error in {}::find({:?})", collection, query);
        let options = FindOptions {
            projection: query.projection.clone(),
            sort: query.sort.clone(),
            skip: if query.skip > 0 {
                Some(u64_to_i64_saturating(query.skip))
            } else {
                None
            },
            limit: query.limit.map(u64_to_i64_saturating),
            max_time_ms: self.max_time_ms,
            ..Default::default()
        };

        self.db
            .collection(collection)
            .find(Some(query.filter.clone()), Some(options))
            .chain(&message)
            .and_then(|cursor| drain(cursor, &message()))
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        let options = CountOptions {
            max_time_ms: self.max_time_ms,
            ..Default::default()
        };

        self.db
            .collection(collection)
            .count(Some(filter.clone()), Some(options))
            .chain(|| format!("error in {}::count({})", collection, filter))
            .and_then(|n| int_to_usize_with_msg(n, "# of counted documents"))
            .map(|n| n as u64)
    }

    fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>> {
        let key = format!("${}", group.key);
        let accumulator = match group.accumulator {
            Accumulator::Avg   => doc!{ "$avg": format!("${}", group.field) },
            Accumulator::Sum   => doc!{ "$sum": format!("${}", group.field) },
            Accumulator::Count => doc!{ "$sum": 1 },
        };
        let pipeline = vec![
            doc!{ "$match": group.filter.clone() },
            doc!{ "$group": { "_id": key, "value": accumulator } },
        ];
        let message = || format!("error in {}::aggregate_group_by({:?})", collection, group);
        let options = AggregateOptions {
            max_time_ms: self.max_time_ms,
            ..Default::default()
        };

        let docs = self.db
            .collection(collection)
            .aggregate(pipeline, Some(options))
            .chain(&message)
            .and_then(|cursor| drain(cursor, &message()))?;

        Ok(docs.into_iter()
            .map(|mut doc| GroupRow {
                key: doc.remove("_id").unwrap_or(Bson::Null),
                value: doc.remove("value").unwrap_or(Bson::Null),
            })
            .collect())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        let message = || format!("error in {}::insert_one()", collection);

        self.db
            .collection(collection)
            .insert_one(document, self.write_concern())
            .chain(&message)
            .and_then(|result| {
                if let Some(error) = result.write_exception {
                    Err(Error::with_cause(message(), error))
                } else if let Some(id) = result.inserted_id {
                    Ok(id)
                } else {
                    Err(Error::new(ErrorKind::MissingId, message() + ": missing `inserted_id`"))
                }
            })
    }

    fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document> {
        let options = FindOneAndUpdateOptions {
            return_document: Some(ReturnDocument::After),
            max_time_ms: self.max_time_ms,
            upsert: Some(false),
            ..Default::default()
        };

        self.db
            .collection(collection)
            .find_one_and_update(doc!{ "_id": id.clone() }, doc!{ "$set": fields }, Some(options))
            .chain(|| format!("error in {}::update_by_id({})", collection, id))
            .and_then(|opt| opt.ok_or_else(|| not_found(collection, id)))
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        let message = || format!("error in {}::delete_many({})", collection, filter);

        self.db
            .collection(collection)
            .delete_many(filter.clone(), self.write_concern())
            .chain(&message)
            .and_then(|result| {
                if let Some(error) = result.write_exception {
                    Err(Error::with_cause(message(), error))
                } else {
                    int_to_usize_with_msg(result.deleted_count, "# of deleted documents")
                        .map(|n| n as u64)
                }
            })
    }

    fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document> {
        let options = FindOneAndDeleteOptions {
            max_time_ms: self.max_time_ms,
            projection: None,
            sort: None,
            write_concern: None,
        };

        self.db
            .collection(collection)
            .find_one_and_delete(doc!{ "_id": id.clone() }, Some(options))
            .chain(|| format!("error in {}::delete_by_id({})", collection, id))
            .and_then(|opt| opt.ok_or_else(|| not_found(collection, id)))
    }
}
