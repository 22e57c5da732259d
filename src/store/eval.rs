//! Evaluation of query documents against in-memory documents, following
//! the comparison rules of MongoDB: values of different types are ordered
//! by type bracket, range operators only match values of the operand's
//! bracket, integers and floats compare numerically, and a condition on
//! an array field matches if the array itself or any element matches.

use std::cmp::Ordering;
use bson::{ Bson, Document };
use crate::{
    bsn::BsonExt,
    ext::DocumentExt,
    literal::Operator,
    error::{ Error, ErrorKind, Result },
};

/// A validated query document, ready to be matched against documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Every clause must hold.
    clauses: Vec<Clause>,
}

/// A single clause of a filter.
#[derive(Debug, Clone, PartialEq)]
enum Clause {
    /// `$and`: every sub-filter must hold.
    And(Vec<Filter>),
    /// Every test must hold for the value(s) at `path`.
    Field {
        /// Dotted field path.
        path: String,
        /// Operator and operand pairs.
        tests: Vec<(Operator, Bson)>,
    },
}

impl Filter {
    /// Validates a query document. Unknown operators, and `$in` or `$and`
    /// without an array operand, are `MalformedQuery` errors.
    pub fn compile(filter: &Document) -> Result<Self> {
        let clauses = filter
            .iter()
            .map(|(key, cond)| Clause::compile(key, cond))
            .collect::<Result<_>>()?;

        Ok(Filter { clauses })
    }

    /// Whether `doc` satisfies every clause.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| clause.matches(doc))
    }
}

impl Clause {
    /// Validates one top-level key of a query document.
    fn compile(key: &str, cond: &Bson) -> Result<Self> {
        if key == "$and" {
            return match *cond {
                Bson::Array(ref items) if !items.is_empty() => items
                    .iter()
                    .map(|item| match *item {
                        Bson::Document(ref doc) => Filter::compile(doc),
                        _ => Err(malformed("`$and` clauses must be documents")),
                    })
                    .collect::<Result<_>>()
                    .map(Clause::And),
                _ => Err(malformed("`$and` requires a non-empty array")),
            };
        }
        if key.starts_with('$') {
            return Err(malformed(format!("unknown top-level operator `{}`", key)));
        }

        let tests = match *cond {
            Bson::Document(ref ops) if ops.keys().next().map_or(false, |k| k.starts_with('$')) => {
                ops.iter().map(|(name, operand)| {
                    let op = Operator::from_store_name(name).ok_or_else(
                        || malformed(format!("unknown operator `{}` on `{}`", name, key))
                    )?;

                    match (op, operand) {
                        (Operator::In, &Bson::Array(_)) => {}
                        (Operator::In, _) => return Err(malformed(
                            format!("`$in` on `{}` requires an array", key)
                        )),
                        _ => {}
                    }

                    Ok((op, operand.clone()))
                }).collect::<Result<_>>()?
            }
            ref literal => vec![(Operator::Eq, literal.clone())],
        };

        Ok(Clause::Field { path: key.to_string(), tests })
    }

    /// Evaluates the clause.
    fn matches(&self, doc: &Document) -> bool {
        match *self {
            Clause::And(ref filters) => filters.iter().all(|f| f.matches(doc)),
            Clause::Field { ref path, ref tests } => {
                let values = values_at(doc, path);
                tests.iter().all(|&(op, ref operand)| test_values(op, operand, &values))
            }
        }
    }
}

/// A `MalformedQuery` error.
fn malformed<S: Into<String>>(message: S) -> Error {
    Error::new(ErrorKind::MalformedQuery, message.into())
}

/// Collects the values at a dotted path, descending into arrays of
/// embedded documents on the way.
pub fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    let mut segments = path.splitn(2, '.');
    let head = segments.next().unwrap_or("");
    let rest = segments.next();

    if let Some(value) = doc.get(head) {
        collect_values(value, rest, &mut out);
    }

    out
}

/// Helper for `values_at()`.
fn collect_values<'a>(value: &'a Bson, rest: Option<&str>, out: &mut Vec<&'a Bson>) {
    match (rest, value) {
        (None, _) => out.push(value),
        (Some(path), &Bson::Document(ref doc)) => out.extend(values_at(doc, path)),
        (Some(_), &Bson::Array(ref items)) => for item in items {
            if let Bson::Document(_) = *item {
                collect_values(item, rest, out);
            }
        },
        (Some(_), _) => {}
    }
}

/// Tests a condition against the values found at a path. A missing field
/// behaves like `null` for equality and membership, and matches nothing else.
fn test_values(op: Operator, operand: &Bson, values: &[&Bson]) -> bool {
    if values.is_empty() {
        return test_one(op, operand, &Bson::Null);
    }

    values.iter().any(|value| {
        test_one(op, operand, value) || match **value {
            Bson::Array(ref items) => items.iter().any(|item| test_one(op, operand, item)),
            _ => false,
        }
    })
}

/// Tests a condition against a single value.
fn test_one(op: Operator, operand: &Bson, value: &Bson) -> bool {
    match op {
        Operator::Eq  => equal(value, operand),
        Operator::In  => match *operand {
            Bson::Array(ref set) => set.iter().any(|item| equal(value, item)),
            _ => false,
        },
        Operator::Gt  => compare_bracketed(value, operand) == Some(Ordering::Greater),
        Operator::Lt  => compare_bracketed(value, operand) == Some(Ordering::Less),
        Operator::Gte => compare_bracketed(value, operand).map_or(false, |o| o != Ordering::Less),
        Operator::Lte => compare_bracketed(value, operand).map_or(false, |o| o != Ordering::Greater),
    }
}

/// Equality with numeric comparison across integer widths and floats.
pub fn equal(a: &Bson, b: &Bson) -> bool {
    compare_bracketed(a, b) == Some(Ordering::Equal)
}

/// Ordering of values of the same type bracket, `None` across brackets.
fn compare_bracketed(a: &Bson, b: &Bson) -> Option<Ordering> {
    if bracket(a) == bracket(b) {
        Some(compare(a, b))
    } else {
        None
    }
}

/// The position of a value's type in the cross-type sort order.
fn bracket(value: &Bson) -> u8 {
    match *value {
        Bson::Null => 1,
        Bson::I32(_) | Bson::I64(_) | Bson::FloatingPoint(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(..) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::UtcDatetime(_) => 9,
        Bson::TimeStamp(_) => 10,
        Bson::RegExp(..) => 11,
        _ => 12,
    }
}

/// Total order over all values, as used for sorting.
pub fn compare(a: &Bson, b: &Bson) -> Ordering {
    let (ba, bb) = (bracket(a), bracket(b));

    if ba != bb {
        return ba.cmp(&bb);
    }

    match (a, b) {
        (&Bson::String(ref x), &Bson::String(ref y)) |
        (&Bson::Symbol(ref x), &Bson::Symbol(ref y)) |
        (&Bson::String(ref x), &Bson::Symbol(ref y)) |
        (&Bson::Symbol(ref x), &Bson::String(ref y)) => x.cmp(y),
        (&Bson::Document(ref x), &Bson::Document(ref y)) => compare_documents(x, y),
        (&Bson::Array(ref x), &Bson::Array(ref y)) => compare_arrays(x, y),
        (&Bson::ObjectId(ref x), &Bson::ObjectId(ref y)) => x.bytes().cmp(&y.bytes()),
        (&Bson::Boolean(x), &Bson::Boolean(y)) => x.cmp(&y),
        (&Bson::UtcDatetime(ref x), &Bson::UtcDatetime(ref y)) => x.cmp(y),
        (&Bson::TimeStamp(x), &Bson::TimeStamp(y)) => x.cmp(&y),
        _ => compare_numbers(a, b),
    }
}

/// Compares numbers exactly when both are integers, as floats otherwise.
/// NaN is smaller than every other number. Non-numbers are equal.
fn compare_numbers(a: &Bson, b: &Bson) -> Ordering {
    match (as_i64(a), as_i64(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => match (a.try_as_f64(), b.try_as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or_else(|| {
                x.is_nan().cmp(&y.is_nan()).reverse()
            }),
            _ => Ordering::Equal,
        },
    }
}

/// Integer value, if any.
fn as_i64(value: &Bson) -> Option<i64> {
    match *value {
        Bson::I32(n) => Some(i64::from(n)),
        Bson::I64(n) => Some(n),
        _ => None,
    }
}

/// Field by field: values first, then names, then length.
fn compare_documents(x: &Document, y: &Document) -> Ordering {
    for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
        let ord = compare(vx, vy).then_with(|| kx.cmp(ky));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    x.len().cmp(&y.len())
}

/// Lexicographic comparison of arrays.
fn compare_arrays(x: &[Bson], y: &[Bson]) -> Ordering {
    for (a, b) in x.iter().zip(y) {
        let ord = compare(a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    x.len().cmp(&y.len())
}

/// Sorts documents stably by a sort specification (`{ field: 1 | -1 }`).
/// A missing field sorts like `null`; an array field sorts by its smallest
/// element when ascending and by its largest element when descending.
pub fn sort_documents(docs: &mut [Document], spec: &Document) -> Result<()> {
    let keys = spec
        .iter()
        .map(|(path, dir)| match dir.try_as_f64() {
            Some(x) if x > 0.0 => Ok((path.as_str(), false)),
            Some(x) if x < 0.0 => Ok((path.as_str(), true)),
            _ => Err(malformed(format!("invalid sort direction for `{}`: {}", path, dir))),
        })
        .collect::<Result<Vec<_>>>()?;

    docs.sort_by(|a, b| {
        keys.iter().fold(Ordering::Equal, |ord, &(path, descending)| {
            ord.then_with(|| {
                let ka = sort_key(a, path, descending);
                let kb = sort_key(b, path, descending);
                let o = compare(&ka, &kb);
                if descending { o.reverse() } else { o }
            })
        })
    });

    Ok(())
}

/// The value a document is sorted by.
fn sort_key(doc: &Document, path: &str, descending: bool) -> Bson {
    let pick = |a: &Bson, b: &Bson| {
        let o = compare(a, b);
        if (o == Ordering::Greater) == descending { a.clone() } else { b.clone() }
    };
    let values = values_at(doc, path);

    values
        .into_iter()
        .flat_map(|value| match *value {
            Bson::Array(ref items) if !items.is_empty() => items.iter().collect::<Vec<_>>(),
            ref scalar => vec![scalar],
        })
        .fold(None, |best: Option<Bson>, v| Some(match best {
            None => v.clone(),
            Some(b) => pick(&b, v),
        }))
        .unwrap_or(Bson::Null)
}

/// Applies a projection document: inclusion (`{ a: 1, b: 1 }`, `_id` is
/// kept unless `_id: 0`) or exclusion (`{ a: 0 }`).
pub fn project(doc: &Document, projection: &Document) -> Document {
    let included: Vec<&str> = projection
        .iter()
        .filter(|&(k, v)| k != "_id" && v.try_as_bool() != Some(false))
        .map(|(k, _)| k.as_str())
        .collect();
    let drop_id = projection.get("_id").and_then(BsonExt::try_as_bool) == Some(false);

    let mut out = if included.is_empty() {
        let mut out = doc.clone();
        for (k, _) in projection.iter().filter(|&(k, _)| k != "_id") {
            remove_path(&mut out, k);
        }
        out
    } else {
        doc.project(&included)
    };

    if drop_id {
        out.remove("_id");
    }

    out
}

/// Removes the value at a dotted path, if present.
fn remove_path(doc: &mut Document, path: &str) {
    match path.find('.') {
        None => {
            doc.remove(path);
        }
        Some(dot) => {
            if let Some(&mut Bson::Document(ref mut inner)) = doc.get_mut(&path[..dot]) {
                remove_path(inner, &path[dot + 1..]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::{ Bson, Document, oid::ObjectId };
    use crate::error::{ ErrorExt, ErrorKind, Result };
    use super::*;

    fn check(filter: Document, doc: &Document) -> bool {
        Filter::compile(&filter).map(|f| f.matches(doc)).unwrap_or(false)
    }

    #[test]
    fn comparisons_respect_type_brackets() {
        let doc = doc!{ "tuition": 8000, "title": "8000", "weeks": 12.5 };

        assert!(check(doc!{ "tuition": 8000_i64 }, &doc));
        assert!(check(doc!{ "tuition": 8000.0 }, &doc));
        assert!(check(doc!{ "tuition": { "$gte": 8000_i64, "$lt": 9000 } }, &doc));
        assert!(!check(doc!{ "tuition": { "$gt": "1" } }, &doc));
        assert!(!check(doc!{ "title": { "$gt": 1 } }, &doc));
        assert!(check(doc!{ "title": { "$gt": "10" } }, &doc));
        assert!(check(doc!{ "weeks": { "$lte": 13_i64 } }, &doc));
    }

    #[test]
    fn arrays_missing_fields_and_membership() {
        let doc = doc!{
            "careers": ["Web Development", "Business"],
            "location": { "state": "MA" },
            "housing": null,
        };

        assert!(check(doc!{ "careers": "Business" }, &doc));
        assert!(check(doc!{ "careers": { "$eq": ["Web Development", "Business"] } }, &doc));
        assert!(check(doc!{ "careers": { "$in": ["Other", "Business"] } }, &doc));
        assert!(!check(doc!{ "careers": { "$in": ["Other"] } }, &doc));
        assert!(check(doc!{ "location.state": "MA" }, &doc));
        assert!(check(doc!{ "missing": null }, &doc));
        assert!(check(doc!{ "housing": { "$in": [null] } }, &doc));
        assert!(!check(doc!{ "missing": { "$gte": 0 } }, &doc));
        assert!(check(doc!{ "$and": [{ "careers": "Business" }, { "location.state": "MA" }] }, &doc));
    }

    #[test]
    fn literal_operator_documents_are_inert() {
        let doc = doc!{ "minimumSkill": "advanced" };

        assert!(!check(doc!{ "minimumSkill": { "$eq": { "$ne": "x" } } }, &doc));
    }

    #[test]
    fn invalid_operators_are_malformed() {
        for filter in vec![
            doc!{ "tuition": { "$ne": 1 } },
            doc!{ "tuition": { "$in": 1 } },
            doc!{ "$where": "sleep(100)" },
            doc!{ "$and": 1 },
        ] {
            assert_eq!(Filter::compile(&filter).unwrap_err().kind(), ErrorKind::MalformedQuery);
        }
    }

    #[test]
    fn sorting_is_stable_and_typed() -> Result<()> {
        let mut docs = vec![
            doc!{ "n": 1, "v": 2 },
            doc!{ "n": 2, "v": "a" },
            doc!{ "n": 3 },
            doc!{ "n": 4, "v": 1.5 },
            doc!{ "n": 5, "v": 2_i64 },
        ];

        sort_documents(&mut docs, &doc!{ "v": 1 })?;
        let order: Vec<_> = docs.iter().map(|d| d.get("n").cloned()).collect();
        assert_eq!(order, vec![3, 4, 1, 5, 2].into_iter().map(|n| Some(Bson::I32(n))).collect::<Vec<_>>());

        sort_documents(&mut docs, &doc!{ "v": -1 })?;
        let order: Vec<_> = docs.iter().map(|d| d.get("n").cloned()).collect();
        assert_eq!(order, vec![2, 1, 5, 4, 3].into_iter().map(|n| Some(Bson::I32(n))).collect::<Vec<_>>());

        assert!(sort_documents(&mut docs, &doc!{ "v": "up" }).is_err());

        Ok(())
    }

    #[test]
    fn object_ids_and_projection() -> Result<()> {
        let id = ObjectId::new()?;
        let doc = doc!{ "_id": id.clone(), "name": "x", "location": { "city": "Boston", "zip": "02118" } };

        assert!(check(doc!{ "_id": { "$in": [id.clone()] } }, &doc));
        assert_eq!(project(&doc, &doc!{ "name": 1 }), doc!{ "_id": id.clone(), "name": "x" });
        assert_eq!(project(&doc, &doc!{ "name": 1, "_id": 0 }), doc!{ "name": "x" });
        assert_eq!(project(&doc, &doc!{ "location.zip": 0, "name": 0 }),
                   doc!{ "_id": id, "location": { "city": "Boston" } });

        Ok(())
    }
}
