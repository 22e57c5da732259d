//! The immutable, process-wide description of every resource: schemas,
//! relations, derived aggregates, cascades and query defaults.
//!
//! A `Registry` is built once at startup, either programmatically or from
//! a JSON document, validated, and then passed explicitly (usually behind
//! an `Arc`) to whatever needs it.

use std::collections::BTreeMap;
use crate::{
    doc::Doc,
    schema::Schema,
    config::QueryConfig,
    aggregate::AggregateSpec,
    cascade::CascadeSpec,
    query::Populate,
    error::{ Error, ErrorKind, Result, ResultExt },
};

/// A named relation-expansion target of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Relation {
    /// The field at `path` stores the `_id` (or an array of `_id`s) of
    /// documents in `target`.
    Reference {
        /// The field holding the identifier(s), also the relation name.
        path: String,
        /// The referenced collection.
        target: String,
    },
    /// The documents of `target` whose `foreign_field` equals the `_id` of
    /// this document. Nothing is stored; `path` is where the expansion
    /// puts the array of related documents.
    Virtual {
        /// The relation name.
        path: String,
        /// The collection of the referencing documents.
        target: String,
        /// The field of the referencing documents holding this `_id`.
        #[serde(rename = "foreignField")]
        foreign_field: String,
    },
}

impl Relation {
    /// A forward reference stored at `path`.
    pub fn reference<P: Into<String>, T: Into<String>>(path: P, target: T) -> Self {
        Relation::Reference { path: path.into(), target: target.into() }
    }

    /// A reverse relation expanded into `path`.
    pub fn virtual_field<P, T, F>(path: P, target: T, foreign_field: F) -> Self
        where P: Into<String>,
              T: Into<String>,
              F: Into<String>,
    {
        Relation::Virtual {
            path: path.into(),
            target: target.into(),
            foreign_field: foreign_field.into(),
        }
    }

    /// The relation name.
    pub fn path(&self) -> &str {
        match *self {
            Relation::Reference { ref path, .. } | Relation::Virtual { ref path, .. } => path,
        }
    }

    /// The related collection.
    pub fn target(&self) -> &str {
        match *self {
            Relation::Reference { ref target, .. } | Relation::Virtual { ref target, .. } => target,
        }
    }
}

/// Everything the registry knows about one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// The collection name.
    pub name: String,
    /// Declared field types.
    #[serde(default)]
    pub schema: Schema,
    /// Relations which may be expanded.
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// The expansion applied to listings and single reads by default.
    #[serde(default)]
    pub populate: Option<Populate>,
}

impl ResourceSpec {
    /// A resource with an empty schema and no relations.
    pub fn new<S: Into<String>>(name: S) -> Self {
        ResourceSpec {
            name: name.into(),
            schema: Schema::new(),
            relations: Vec::new(),
            populate: None,
        }
    }

    /// Builder-style setter for the schema.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Builder-style method for declaring a relation.
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Builder-style setter for the default expansion.
    pub fn populate<P: Into<Populate>>(mut self, populate: P) -> Self {
        self.populate = Some(populate.into());
        self
    }

    /// Looks up a relation by name.
    pub fn find_relation(&self, path: &str) -> Result<&Relation> {
        self.relations.iter().find(|r| r.path() == path).ok_or_else(|| Error::new(
            ErrorKind::UnknownRelation,
            format!("`{}` has no relation named `{}`", self.name, path)
        ))
    }
}

/// The validated registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    /// Query defaults.
    query: QueryConfig,
    /// Collection name => resource.
    resources: BTreeMap<String, ResourceSpec>,
    /// Derived aggregates.
    aggregates: Vec<AggregateSpec>,
    /// Parent deletion cascades.
    cascades: Vec<CascadeSpec>,
}

/// The JSON form of a registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RegistryRepr {
    /// Query defaults.
    query: QueryConfig,
    /// Resource list.
    resources: Vec<ResourceSpec>,
    /// Derived aggregates.
    aggregates: Vec<AggregateSpec>,
    /// Parent deletion cascades.
    cascades: Vec<CascadeSpec>,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Parses and validates a JSON registry document:
    ///
    /// ```
    /// # use resourcery::registry::Registry;
    /// # fn main() -> resourcery::error::Result<()> {
    /// let registry = Registry::from_json(r#"{
    ///     "query": { "maxLimit": 100 },
    ///     "resources": [
    ///         { "name": "bootcamps", "schema": { "averageCost": "number" } },
    ///         { "name": "courses", "schema": { "tuition": "number", "bootcamp": "id" } }
    ///     ],
    ///     "aggregates": [{
    ///         "parentCollection": "bootcamps",
    ///         "childCollection": "courses",
    ///         "foreignKeyField": "bootcamp",
    ///         "sourceField": "tuition",
    ///         "aggregateField": "averageCost",
    ///         "aggregateFn": "meanCeil"
    ///     }],
    ///     "cascades": [{
    ///         "parentCollection": "bootcamps",
    ///         "childCollection": "courses",
    ///         "foreignKeyField": "bootcamp"
    ///     }]
    /// }"#)?;
    ///
    /// assert_eq!(registry.config().max_limit, Some(100));
    /// assert_eq!(registry.aggregates_for_child("courses").count(), 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let repr: RegistryRepr = serde_json::from_str(json).chain_as(
            ErrorKind::InvalidConfig, "can't parse registry"
        )?;

        RegistryBuilder {
            query: repr.query,
            resources: repr.resources,
            aggregates: repr.aggregates,
            cascades: repr.cascades,
        }.build()
    }

    /// Query defaults.
    pub fn config(&self) -> &QueryConfig {
        &self.query
    }

    /// Looks up a resource; `UnknownCollection` if it is not declared.
    pub fn resource(&self, name: &str) -> Result<&ResourceSpec> {
        self.resources.get(name).ok_or_else(|| Error::new(
            ErrorKind::UnknownCollection,
            format!("collection `{}` is not declared", name)
        ))
    }

    /// Every declared resource, by name.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.values()
    }

    /// Every derived aggregate.
    pub fn aggregates(&self) -> &[AggregateSpec] {
        &self.aggregates
    }

    /// The aggregates computed over documents of `collection`.
    pub fn aggregates_for_child<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a AggregateSpec> {
        self.aggregates.iter().filter(move |spec| spec.child_collection == collection)
    }

    /// The cascades triggered by deleting a document of `collection`.
    pub fn cascades_for_parent<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a CascadeSpec> {
        self.cascades.iter().filter(move |spec| spec.parent_collection == collection)
    }
}

/// Accumulates resources and specs, then validates them all at once.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    /// Query defaults.
    query: QueryConfig,
    /// Resources in declaration order.
    resources: Vec<ResourceSpec>,
    /// Derived aggregates.
    aggregates: Vec<AggregateSpec>,
    /// Parent deletion cascades.
    cascades: Vec<CascadeSpec>,
}

impl RegistryBuilder {
    /// Sets the query defaults.
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Declares a resource.
    pub fn resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    /// Declares the resource described by a strongly-typed document.
    pub fn register<T: Doc>(self) -> Self {
        let mut resource = ResourceSpec::new(T::NAME).schema(T::schema());
        resource.relations = T::relations();
        resource.populate = T::populate();
        self.resource(resource)
    }

    /// Declares a derived aggregate.
    pub fn aggregate(mut self, spec: AggregateSpec) -> Self {
        self.aggregates.push(spec);
        self
    }

    /// Declares a deletion cascade.
    pub fn cascade(mut self, spec: CascadeSpec) -> Self {
        self.cascades.push(spec);
        self
    }

    /// Validates the declarations: names are unique, and every
    /// collection referred to by a relation, aggregate or cascade is
    /// declared, as is every default expansion.
    pub fn build(self) -> Result<Registry> {
        let RegistryBuilder { query, resources, aggregates, cascades } = self;
        let mut by_name = BTreeMap::new();

        if query.default_limit == 0 {
            return Err(invalid("`defaultLimit` must be positive"));
        }
        if query.max_limit == Some(0) {
            return Err(invalid("`maxLimit` must be positive"));
        }

        for resource in resources {
            if resource.name.is_empty() {
                return Err(invalid("resource with an empty name"));
            }
            if by_name.contains_key(&resource.name) {
                return Err(invalid(format!("resource `{}` declared twice", resource.name)));
            }
            by_name.insert(resource.name.clone(), resource);
        }

        let declared = |name: &str, what: &str| if by_name.contains_key(name) {
            Ok(())
        } else {
            Err(invalid(format!("{} refers to undeclared collection `{}`", what, name)))
        };

        for resource in by_name.values() {
            for relation in &resource.relations {
                declared(relation.target(), &format!("relation `{}.{}`", resource.name, relation.path()))?;
            }
            if let Some(ref populate) = resource.populate {
                resource.find_relation(&populate.path).chain_as(
                    ErrorKind::InvalidConfig, "default expansion is not a declared relation"
                )?;
            }
        }

        for spec in &aggregates {
            let what = format!("aggregate `{}.{}`", spec.parent_collection, spec.aggregate_field);
            declared(&spec.parent_collection, &what)?;
            declared(&spec.child_collection, &what)?;

            if spec.foreign_key_field.is_empty() || spec.aggregate_field.is_empty() {
                return Err(invalid(format!("{} has an empty field name", what)));
            }
            if spec.source_field.is_empty() && spec.aggregate_fn.needs_source() {
                return Err(invalid(format!("{} has no source field", what)));
            }
        }

        for spec in &cascades {
            let what = format!("cascade `{}` -> `{}`", spec.parent_collection, spec.child_collection);
            declared(&spec.parent_collection, &what)?;
            declared(&spec.child_collection, &what)?;

            if spec.foreign_key_field.is_empty() {
                return Err(invalid(format!("{} has an empty foreign key", what)));
            }
        }

        Ok(Registry { query, resources: by_name, aggregates, cascades })
    }
}

/// An `InvalidConfig` error.
fn invalid<S: Into<String>>(message: S) -> Error {
    Error::new(ErrorKind::InvalidConfig, message.into())
}
