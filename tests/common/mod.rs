//! Fixtures shared by the integration tests: the bootcamp/course/review
//! models, their registry, and a store wrapper which injects faults.

#![allow(dead_code)]

use std::sync::Mutex;
use bson::{ Bson, Document, oid::ObjectId };
use resourcery::prelude::*;
use resourcery::store::{ GroupBy, GroupRow };

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootcamp {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

impl Doc for Bootcamp {
    const NAME: &'static str = "bootcamps";

    fn schema() -> Schema {
        Schema::new()
            .field("name", FieldType::String)
            .field("description", FieldType::String)
            .field("housing", FieldType::Boolean)
            .field("averageCost", FieldType::Number)
            .field("averageRating", FieldType::Number)
            .field("createdAt", FieldType::Date)
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::virtual_field("courses", "courses", "bootcamp"),
            Relation::virtual_field("reviews", "reviews", "bootcamp"),
        ]
    }

    fn populate() -> Option<Populate> {
        Some(Populate::new("courses"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub weeks: String,
    pub tuition: f64,
    pub minimum_skill: String,
    #[serde(default)]
    pub scholarship_available: bool,
    pub bootcamp: ObjectId,
}

impl Doc for Course {
    const NAME: &'static str = "courses";

    fn schema() -> Schema {
        Schema::new()
            .field("title", FieldType::String)
            .field("weeks", FieldType::String)
            .field("tuition", FieldType::Number)
            .field("minimumSkill", FieldType::String)
            .field("scholarshipAvailable", FieldType::Boolean)
            .field("createdAt", FieldType::Date)
            .field("bootcamp", FieldType::Id)
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::reference("bootcamp", "bootcamps")]
    }

    fn populate() -> Option<Populate> {
        Some(Populate::new("bootcamp").select(Projection::parse("name description")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub text: String,
    pub rating: i32,
    pub bootcamp: ObjectId,
}

impl Doc for Review {
    const NAME: &'static str = "reviews";

    fn schema() -> Schema {
        Schema::new()
            .field("title", FieldType::String)
            .field("text", FieldType::String)
            .field("rating", FieldType::Number)
            .field("createdAt", FieldType::Date)
            .field("bootcamp", FieldType::Id)
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::reference("bootcamp", "bootcamps")]
    }
}

/// Bootcamps own courses and reviews; their average cost (rounded up)
/// and average rating are derived.
pub fn registry() -> Result<Registry> {
    Registry::builder()
        .config(QueryConfig { max_limit: Some(100), ..QueryConfig::default() })
        .register::<Bootcamp>()
        .register::<Course>()
        .register::<Review>()
        .aggregate(AggregateSpec::new(
            "bootcamps", "courses", "bootcamp", "tuition", "averageCost", AggregateFn::MeanCeil
        ))
        .aggregate(AggregateSpec::new(
            "bootcamps", "reviews", "bootcamp", "rating", "averageRating", AggregateFn::Mean
        ))
        .cascade(CascadeSpec::new("bootcamps", "courses", "bootcamp"))
        .cascade(CascadeSpec::new("bootcamps", "reviews", "bootcamp"))
        .build()
}

pub fn bootcamp(name: &str) -> Bootcamp {
    Bootcamp {
        id: None,
        name: name.to_string(),
        description: format!("{} bootcamp", name),
        average_cost: None,
        average_rating: None,
    }
}

pub fn course(bootcamp: &ObjectId, title: &str, tuition: f64) -> Course {
    Course {
        id: None,
        title: title.to_string(),
        weeks: String::from("8"),
        tuition,
        minimum_skill: String::from("beginner"),
        scholarship_available: false,
        bootcamp: bootcamp.clone(),
    }
}

pub fn review(bootcamp: &ObjectId, rating: i32) -> Review {
    Review {
        id: None,
        title: format!("rated {}", rating),
        text: String::from("Lorem ipsum"),
        rating,
        bootcamp: bootcamp.clone(),
    }
}

/// The `ObjectId` of a stored document.
pub fn object_id(doc: &Document) -> ObjectId {
    doc.get_object_id("_id").expect("document has no ObjectId").clone()
}

/// A store operation which can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Find,
    Aggregate,
    Update,
    DeleteMany,
    DeleteById,
}

#[derive(Debug)]
struct Fault {
    op: Op,
    collection: &'static str,
    remaining: usize,
}

/// A `MemoryStore` whose operations fail on demand, the way a store
/// which times out would.
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls of `op` on `collection` fail.
    pub fn fail(&self, op: Op, collection: &'static str, times: usize) {
        self.faults.lock().unwrap().push(Fault { op, collection, remaining: times });
    }

    fn check(&self, op: Op, collection: &str) -> Result<()> {
        let mut faults = self.faults.lock().unwrap();

        match faults.iter_mut().find(|f| f.op == op && f.collection == collection && f.remaining > 0) {
            Some(fault) => {
                fault.remaining -= 1;
                Err(Error::new(ErrorKind::StoreUnavailable, format!("injected {:?} fault", op)))
            }
            None => Ok(()),
        }
    }
}

impl DocumentStore for FaultyStore {
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>> {
        self.check(Op::Find, collection)?;
        self.inner.find(collection, query)
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        self.inner.count(collection, filter)
    }

    fn aggregate_group_by(&self, collection: &str, group: &GroupBy) -> Result<Vec<GroupRow>> {
        self.check(Op::Aggregate, collection)?;
        self.inner.aggregate_group_by(collection, group)
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        self.inner.insert_one(collection, document)
    }

    fn update_by_id(&self, collection: &str, id: &Bson, fields: Document) -> Result<Document> {
        self.check(Op::Update, collection)?;
        self.inner.update_by_id(collection, id, fields)
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        self.check(Op::DeleteMany, collection)?;
        self.inner.delete_many(collection, filter)
    }

    fn delete_by_id(&self, collection: &str, id: &Bson) -> Result<Document> {
        self.check(Op::DeleteById, collection)?;
        self.inner.delete_by_id(collection, id)
    }
}
