//! Relation expansion: replacing stored references with the referenced
//! documents, and attaching reverse (virtual) relations.
//!
//! Either kind of expansion costs exactly one extra `find()`, regardless
//! of the number of documents being expanded.

use bson::{ Bson, Document };
use tracing::debug;
use crate::{
    ext::DocumentExt,
    query::Projection,
    registry::Relation,
    store::{ DocumentStore, FindQuery, eval },
    error::{ Result, ResultExt },
};

/// Expands `relation` in each of `docs`, projecting the related documents
/// to `select` (all fields if it is empty).
pub fn expand<S>(store: &S, relation: &Relation, select: &Projection, docs: &mut [Document]) -> Result<()>
    where S: DocumentStore + ?Sized
{
    if docs.is_empty() {
        return Ok(());
    }

    match *relation {
        Relation::Reference { ref path, ref target } => {
            expand_reference(store, path, target, select, docs)
        }
        Relation::Virtual { ref path, ref target, ref foreign_field } => {
            expand_virtual(store, path, target, foreign_field, select, docs)
        }
    }
}

/// Pushes `value` onto `ids` unless an equal value is already there.
fn push_distinct(ids: &mut Vec<Bson>, value: &Bson) {
    if !ids.iter().any(|id| eval::equal(id, value)) {
        ids.push(value.clone());
    }
}

/// Whether the value of a reference field is an identifier, as opposed
/// to a missing reference or an already expanded document.
fn is_reference(value: &Bson) -> bool {
    match *value {
        Bson::Null | Bson::Document(_) => false,
        _ => true,
    }
}

/// Finds the related documents for the given identifiers.
fn find_related<S>(store: &S, target: &str, field: &str, ids: Vec<Bson>, projection: Option<Document>) -> Result<Vec<Document>>
    where S: DocumentStore + ?Sized
{
    let query = FindQuery::new(doc!{ field: { "$in": ids } }).projection(projection);

    store.find(target, &query).chain(
        || format!("can't expand relation into `{}`", target)
    )
}

/// The field at `path` holds one identifier or an array of them.
fn expand_reference<S>(
    store: &S,
    path: &str,
    target: &str,
    select: &Projection,
    docs: &mut [Document],
) -> Result<()>
    where S: DocumentStore + ?Sized
{
    let mut ids = Vec::new();

    for doc in docs.iter() {
        match doc.get_path(path) {
            Some(&Bson::Array(ref items)) => {
                for item in items.iter().filter(|item| is_reference(item)) {
                    push_distinct(&mut ids, item);
                }
            }
            Some(value) if is_reference(value) => push_distinct(&mut ids, value),
            _ => {}
        }
    }

    if ids.is_empty() {
        return Ok(());
    }

    let related = find_related(store, target, "_id", ids, select.to_document())?;
    let lookup = |id: &Bson| related.iter().find(
        |rel| rel.get("_id").map_or(false, |rel_id| eval::equal(rel_id, id))
    );

    debug!(target_collection = %target, path = %path, found = related.len(), "expanded reference");

    for doc in docs.iter_mut() {
        let expanded = match doc.get_path(path) {
            Some(&Bson::Array(ref items)) => Bson::Array(
                items.iter()
                    .filter_map(|item| if is_reference(item) {
                        lookup(item).cloned().map(Bson::Document)
                    } else {
                        Some(item.clone())
                    })
                    .collect()
            ),
            Some(value) if is_reference(value) => {
                lookup(value).cloned().map_or(Bson::Null, Bson::Document)
            }
            _ => continue,
        };

        doc.set_path(path, expanded);
    }

    Ok(())
}

/// The documents of `target` whose `foreign_field` equals the `_id`
/// of each document are attached as an array at `path`.
fn expand_virtual<S>(
    store: &S,
    path: &str,
    target: &str,
    foreign_field: &str,
    select: &Projection,
    docs: &mut [Document],
) -> Result<()>
    where S: DocumentStore + ?Sized
{
    let mut ids = Vec::new();

    for id in docs.iter().filter_map(|doc| doc.get("_id")) {
        push_distinct(&mut ids, id);
    }

    // The foreign key is needed for matching even if it was not selected.
    let strip_foreign_key = !select.is_empty() && !select.includes(foreign_field);
    let projection = if select.is_empty() {
        None
    } else {
        select.clone().with(foreign_field).to_document()
    };

    let related = if ids.is_empty() {
        Vec::new()
    } else {
        find_related(store, target, foreign_field, ids, projection)?
    };

    debug!(target_collection = %target, path = %path, found = related.len(), "expanded virtual relation");

    for doc in docs.iter_mut() {
        let children: Vec<_> = match doc.get("_id") {
            Some(id) => related
                .iter()
                .filter(|rel| eval::values_at(rel, foreign_field).into_iter().any(|v| eval::equal(v, id)))
                .map(|rel| {
                    let mut rel = rel.clone();
                    if strip_foreign_key {
                        rel.remove(foreign_field);
                    }
                    Bson::Document(rel)
                })
                .collect(),
            None => Vec::new(),
        };

        doc.set_path(path, Bson::Array(children));
    }

    Ok(())
}
