//! The entry points of a resource service: listing, reading and mutating
//! the documents of the declared collections, with derived aggregates
//! kept up to date after every mutation.

use std::slice;
use std::sync::Arc;
use bson::{ Bson, Document };
use chrono::Utc;
use tracing::debug;
use crate::{
    doc::Doc,
    bsn::serialize_document,
    query::{ QueryRequest, QueryPlan, FilterExpression, FieldPolicy, PageSpec, Populate, ListResponse },
    registry::{ Registry, ResourceSpec },
    store::{ DocumentStore, not_found },
    aggregate::AggregateEngine,
    cascade::{ CascadeCoordinator, CascadeReport, Cancellation },
    error::{ Error, Result, ResultExt },
};

/// The result of a successful create, update or remove.
#[derive(Debug)]
pub struct Mutation {
    /// The created or updated document, or the removed one.
    pub document: Document,
    /// Follow-up work (aggregate recomputation) which failed. The
    /// mutation itself is committed regardless.
    pub warnings: Vec<Error>,
}

/// A document store together with the registry describing its contents.
#[derive(Debug, Clone)]
pub struct Resources<S> {
    /// The backing store.
    store: S,
    /// The resource declarations.
    registry: Arc<Registry>,
}

impl<S: DocumentStore> Resources<S> {
    /// Serves the collections of `registry` out of `store`.
    pub fn new(store: S, registry: Arc<Registry>) -> Self {
        Resources { store, registry }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The resource declarations.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Plans a listing of `collection` from raw request parameters,
    /// expanding the collection's default relation if it has one.
    pub fn plan(&self, collection: &str, request: &QueryRequest) -> Result<QueryPlan> {
        let resource = self.registry.resource(collection)?;
        let config = self.registry.config();
        let policy = if config.strict_fields {
            FieldPolicy::Declared(&resource.schema)
        } else {
            FieldPolicy::Open
        };
        let select = request.select();
        let sort = request.sort();

        Ok(QueryPlan::builder(collection)
            .filter(FilterExpression::translate(request, policy)?)
            .select(select.as_ref().map(String::as_str))
            .sort(sort.as_ref().map(String::as_str))
            .created_at_field(config.created_at_field.as_str())
            .page(PageSpec::parse(request.page(), request.limit(), config))
            .populate(resource.populate.clone())
            .build())
    }

    /// Lists one page of `collection`.
    pub fn list(&self, collection: &str, request: &QueryRequest) -> Result<ListResponse> {
        let resource = self.registry.resource(collection)?;
        self.plan(collection, request)?.execute(&self.store, resource)
    }

    /// Lists one page of the children of one parent, i.e. the documents
    /// of `collection` whose `foreign_key` equals `parent_id`, in addition
    /// to whatever the request filters on.
    pub fn list_by_parent(
        &self,
        collection: &str,
        foreign_key: &str,
        parent_id: &Bson,
        request: &QueryRequest,
    ) -> Result<ListResponse> {
        let resource = self.registry.resource(collection)?;
        let mut plan = self.plan(collection, request)?;

        plan.scope.insert(foreign_key, parent_id.clone());
        plan.execute(&self.store, resource)
    }

    /// Reads one document, expanding `populate` or, if that is `None`,
    /// the default relation of the collection.
    pub fn get(&self, collection: &str, id: &Bson, populate: Option<&Populate>) -> Result<Document> {
        let resource = self.registry.resource(collection)?;
        let populate = populate.or_else(|| resource.populate.as_ref());
        let relation = match populate {
            Some(populate) => Some(resource.find_relation(&populate.path)?),
            None => None,
        };

        let mut doc = self.store
            .find_by_id(collection, id)?
            .ok_or_else(|| not_found(collection, id))?;

        if let (Some(relation), Some(populate)) = (relation, populate) {
            self.store.populate(relation, &populate.select, slice::from_mut(&mut doc))?;
        }

        Ok(doc)
    }

    /// Reads one strongly-typed document, without relation expansion.
    pub fn get_doc<T: Doc>(&self, id: &Bson) -> Result<T> {
        self.registry.resource(T::NAME)?;

        let doc = self.store
            .find_by_id(T::NAME, id)?
            .ok_or_else(|| not_found(T::NAME, id))?;

        bson::from_bson(Bson::Document(doc)).chain(
            || format!("can't deserialize document of `{}`", T::NAME)
        )
    }

    /// Inserts a document, stamping it with the creation time unless it
    /// has one, then recomputes the aggregates it contributes to.
    pub fn create(&self, collection: &str, mut document: Document) -> Result<Mutation> {
        let resource = self.registry.resource(collection)?;
        let created_at_field = &self.registry.config().created_at_field;

        if !document.contains_key(created_at_field) {
            document.insert(created_at_field.clone(), Bson::UtcDatetime(Utc::now()));
        }

        let id = self.store.insert_one(collection, document.clone())?;
        let document = with_id(id, document);

        debug!(collection = %resource.name, id = ?document.get("_id"), "created document");

        let warnings = self.engine().after_create(collection, &document);

        Ok(Mutation { document, warnings })
    }

    /// Inserts a strongly-typed document.
    pub fn create_doc<T: Doc>(&self, value: &T) -> Result<Mutation> {
        let document = serialize_document(value)?;
        self.create(T::NAME, document)
    }

    /// Sets the given fields of a document (its `_id` can't be changed),
    /// then recomputes the aggregates affected by the change.
    pub fn update(&self, collection: &str, id: &Bson, mut fields: Document) -> Result<Mutation> {
        self.registry.resource(collection)?;
        fields.remove("_id");

        let before = self.store
            .find_by_id(collection, id)?
            .ok_or_else(|| not_found(collection, id))?;

        if fields.is_empty() {
            return Ok(Mutation { document: before, warnings: Vec::new() });
        }

        let document = self.store.update_by_id(collection, id, fields)?;
        let warnings = self.engine().after_update(collection, &before, &document);

        Ok(Mutation { document, warnings })
    }

    /// Removes a document. If the collection owns dependents, they are
    /// removed first (see `remove_cascade()`).
    pub fn remove(&self, collection: &str, id: &Bson) -> Result<Mutation> {
        self.registry.resource(collection)?;

        if self.registry.cascades_for_parent(collection).next().is_some() {
            self.store
                .find_by_id(collection, id)?
                .ok_or_else(|| not_found(collection, id))?;

            let report = self.remove_cascade(collection, id, &Cancellation::new())?;
            let document = report.parent.ok_or_else(|| not_found(collection, id))?;

            return Ok(Mutation { document, warnings: report.warnings });
        }

        let document = self.store.delete_by_id(collection, id)?;
        let warnings = self.engine().after_delete(collection, &document);

        Ok(Mutation { document, warnings })
    }

    /// Removes a document and its dependents; see
    /// `CascadeCoordinator::delete_parent_cascade()`.
    pub fn remove_cascade(&self, collection: &str, id: &Bson, cancellation: &Cancellation) -> Result<CascadeReport> {
        self.registry.resource(collection)?;
        CascadeCoordinator::new(&self.store, &*self.registry).delete_parent_cascade(collection, id, cancellation)
    }

    /// The resource declaration of a collection.
    pub fn resource(&self, collection: &str) -> Result<&ResourceSpec> {
        self.registry.resource(collection)
    }

    /// An aggregate engine over this store and registry.
    fn engine(&self) -> AggregateEngine<S> {
        AggregateEngine::new(&self.store, &*self.registry)
    }
}

/// Puts the `_id` first, followed by the remaining fields in order.
fn with_id(id: Bson, document: Document) -> Document {
    let mut out = Document::new();

    out.insert("_id", id);

    for (key, value) in document {
        if key != "_id" {
            out.insert(key, value);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use bson::Bson;
    use crate::{
        schema::{ Schema, FieldType },
        registry::{ Registry, ResourceSpec, Relation },
        aggregate::{ AggregateSpec, AggregateFn },
        cascade::CascadeSpec,
        store::{ DocumentStore, MemoryStore },
        query::QueryRequest,
        error::{ ErrorExt, ErrorKind, Result },
    };
    use super::*;

    fn resources() -> Result<Resources<MemoryStore>> {
        let registry = Registry::builder()
            .resource(ResourceSpec::new("bootcamps")
                .relation(Relation::virtual_field("courses", "courses", "bootcamp")))
            .resource(ResourceSpec::new("courses")
                .schema(Schema::new().field("tuition", FieldType::Number))
                .relation(Relation::reference("bootcamp", "bootcamps")))
            .aggregate(AggregateSpec::new(
                "bootcamps", "courses", "bootcamp", "tuition", "averageCost", AggregateFn::MeanCeil
            ))
            .cascade(CascadeSpec::new("bootcamps", "courses", "bootcamp"))
            .build()?;

        Ok(Resources::new(MemoryStore::new(), Arc::new(registry)))
    }

    #[test]
    fn create_stamps_and_recomputes() -> Result<()> {
        let resources = resources()?;
        let bootcamp = resources.create("bootcamps", doc!{ "name": "Devworks" })?.document;
        let id = bootcamp.get("_id").cloned().unwrap_or(Bson::Null);

        assert!(bootcamp.get_utc_datetime("createdAt").is_ok());
        assert_eq!(bootcamp.keys().next().map(String::as_str), Some("_id"));

        let course = resources.create("courses", doc!{ "bootcamp": id.clone(), "tuition": 1001 })?;
        assert!(course.warnings.is_empty());
        resources.create("courses", doc!{ "bootcamp": id.clone(), "tuition": 2000 })?;

        let bootcamp = resources.get("bootcamps", &id, None)?;
        assert_eq!(bootcamp.get("averageCost"), Some(&Bson::I64(1501)));

        Ok(())
    }

    #[test]
    fn update_moves_and_remove_cascades() -> Result<()> {
        let resources = resources()?;
        let first = resources.create("bootcamps", doc!{})?.document.get("_id").cloned().unwrap_or(Bson::Null);
        let second = resources.create("bootcamps", doc!{})?.document.get("_id").cloned().unwrap_or(Bson::Null);
        let course = resources.create("courses", doc!{ "bootcamp": first.clone(), "tuition": 500 })?.document;
        let course_id = course.get("_id").cloned().unwrap_or(Bson::Null);

        resources.update("courses", &course_id, doc!{ "bootcamp": second.clone(), "_id": 3 })?;

        assert_eq!(resources.get("bootcamps", &first, None)?.get("averageCost"), Some(&Bson::Null));
        assert_eq!(resources.get("bootcamps", &second, None)?.get("averageCost"), Some(&Bson::I64(500)));

        let removed = resources.remove("bootcamps", &second)?;
        assert!(removed.warnings.is_empty());
        assert_eq!(resources.store().count("courses", &doc!{})?, 0);

        let error = resources.remove("bootcamps", &second).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        Ok(())
    }

    #[test]
    fn get_expands_requested_relation() -> Result<()> {
        let resources = resources()?;
        let bootcamp = resources.create("bootcamps", doc!{ "name": "Devworks" })?.document;
        let id = bootcamp.get("_id").cloned().unwrap_or(Bson::Null);

        resources.create("courses", doc!{ "bootcamp": id.clone(), "title": "Rust", "tuition": 1 })?;

        let populate = Populate::new("courses").select(crate::query::Projection::parse("title"));
        let doc = resources.get("bootcamps", &id, Some(&populate))?;
        let courses = doc.get_array("courses")?;

        assert_eq!(courses.len(), 1);

        let missing = resources.get("bootcamps", &Bson::I32(0), None).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let unknown = resources.list("users", &QueryRequest::new()).unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::UnknownCollection);

        Ok(())
    }

    #[test]
    fn nested_listing_is_scoped() -> Result<()> {
        let resources = resources()?;
        let first = resources.create("bootcamps", doc!{})?.document.get("_id").cloned().unwrap_or(Bson::Null);
        let second = resources.create("bootcamps", doc!{})?.document.get("_id").cloned().unwrap_or(Bson::Null);

        for tuition in 1..=3 {
            resources.create("courses", doc!{ "bootcamp": first.clone(), "tuition": tuition })?;
        }
        resources.create("courses", doc!{ "bootcamp": second.clone(), "tuition": 2 })?;

        let request = QueryRequest::new().with("tuition", json!({ "gte": "2" }));
        let listing = resources.list_by_parent("courses", "bootcamp", &first, &request)?;

        assert_eq!(listing.total, 2);
        assert_eq!(listing.count, 2);
        assert_eq!(resources.list("courses", &request)?.total, 3);

        Ok(())
    }
}
