//! Translating raw query parameters into a structured filter.
//!
//! Operators are detected structurally: a parameter whose value is a
//! mapping consisting *only* of the bare tokens `gt`, `gte`, `lt`, `lte`
//! and `in` yields one predicate per token. Anything else, including a
//! mapping with a single unrecognized or `$`-prefixed key, is a literal
//! equality, so client input can never smuggle a store operator in.

use std::mem;
use serde_json::Value;
use bson::{ Bson, Document };
use crate::{
    schema::Schema,
    literal::Operator,
    query::request::QueryRequest,
    error::{ Error, ErrorKind, Result },
};

/// A single `(field, operator, value)` condition. The value is the raw
/// client value; it is only cast to the field's type when the filter is
/// bound to a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// The (possibly dotted) field path.
    pub field: String,
    /// The comparison.
    pub op: Operator,
    /// The raw value to compare with.
    pub value: Value,
}

/// An ordered conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    /// The predicates, in the order of the request parameters.
    predicates: Vec<Predicate>,
}

/// Which fields a filter may name.
#[derive(Debug, Clone, Copy)]
pub enum FieldPolicy<'a> {
    /// Any field may be filtered on.
    Open,
    /// Only fields declared in the schema (allow-list mode).
    Declared(&'a Schema),
}

impl FilterExpression {
    /// An empty filter, matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates the non-reserved parameters of a request.
    ///
    /// ```
    /// # #[macro_use]
    /// # extern crate serde_json;
    /// # extern crate resourcery;
    /// #
    /// # use resourcery::literal::Operator;
    /// # use resourcery::query::{ FilterExpression, FieldPolicy, QueryRequest };
    /// #
    /// # fn main() -> resourcery::error::Result<()> {
    /// let request = QueryRequest::new()
    ///     .with("averageCost", json!({ "gte": "1000", "lt": "10000" }))
    ///     .with("name", json!({ "$ne": "x" }))
    ///     .with("page", "2");
    /// let filter = FilterExpression::translate(&request, FieldPolicy::Open)?;
    ///
    /// let ops: Vec<_> = filter.predicates().iter().map(|p| (p.field.as_str(), p.op)).collect();
    /// assert_eq!(ops, vec![
    ///     ("averageCost", Operator::Gte),
    ///     ("averageCost", Operator::Lt),
    ///     ("name", Operator::Eq),
    /// ]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn translate(request: &QueryRequest, policy: FieldPolicy) -> Result<Self> {
        let mut filter = Self::new();

        for (field, value) in request.filter_params() {
            check_field(field, policy)?;

            match operator_tokens(value) {
                Some(ops) => for (op, operand) in ops {
                    filter.push(field, op, operand.clone());
                },
                None => filter.push(field, Operator::Eq, value.clone()),
            }
        }

        Ok(filter)
    }

    /// Appends a predicate.
    pub fn push<S: Into<String>>(&mut self, field: S, op: Operator, value: Value) {
        self.predicates.push(Predicate { field: field.into(), op, value });
    }

    /// Builder-style method for appending a predicate.
    pub fn and<S: Into<String>>(mut self, field: S, op: Operator, value: Value) -> Self {
        self.push(field, op, value);
        self
    }

    /// The predicates in order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Whether this filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Casts every value to the type declared for its field and renders
    /// the filter as a store query document.
    ///
    /// Predicates on the same field are merged into one operator document
    /// (`{ "tuition": { "$gte": 1000, "$lt": 5000 } }`); a repeated
    /// operator on the same field goes into a top-level `$and`. `in` with
    /// a scalar value means membership in a one-element set. Values of
    /// equality predicates that are documents or arrays are wrapped in an
    /// explicit `$eq`.
    pub fn bind(&self, schema: &Schema) -> Result<Document> {
        let mut doc = Document::new();
        let mut overflow = Vec::new();

        for p in &self.predicates {
            let raw = match (p.op, &p.value) {
                (Operator::In, &Value::Array(_)) => p.value.clone(),
                (Operator::In, scalar) => Value::Array(vec![scalar.clone()]),
                (_, value) => value.clone(),
            };
            let value = schema.cast(&p.field, raw)?;
            let op = p.op.as_str();

            check_inert(&p.field, &value)?;

            match doc.get_mut(&p.field) {
                None => {
                    if p.op == Operator::Eq && !is_structured(&value) {
                        doc.insert(p.field.clone(), value);
                    } else {
                        doc.insert(p.field.clone(), doc!{ op: value });
                    }
                }
                // Documents at this level are always operator documents
                // created here; literal documents are wrapped in `$eq`.
                Some(&mut Bson::Document(ref mut ops)) => {
                    if ops.contains_key(op) {
                        overflow.push(Bson::from(doc!{ p.field.clone(): { op: value } }));
                    } else {
                        ops.insert(op, value);
                    }
                }
                Some(literal) => {
                    if p.op == Operator::Eq {
                        overflow.push(Bson::from(doc!{ p.field.clone(): { op: value } }));
                    } else {
                        let previous = mem::replace(literal, Bson::Null);
                        *literal = Bson::from(doc!{ "$eq": previous, op: value });
                    }
                }
            }
        }

        if !overflow.is_empty() {
            doc.insert("$and", overflow);
        }

        Ok(doc)
    }
}

/// Rejects names which aren't fields, and in allow-list mode, fields
/// which aren't declared.
fn check_field(field: &str, policy: FieldPolicy) -> Result<()> {
    if field.is_empty() || field.split('.').any(|seg| seg.is_empty() || seg.starts_with('$')) {
        return Err(Error::new(
            ErrorKind::InvalidFilterField,
            format!("`{}` is not a valid field name", field)
        ));
    }

    match policy {
        FieldPolicy::Open => Ok(()),
        FieldPolicy::Declared(schema) => if schema.declares(field) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::InvalidFilterField,
                format!("can't filter on undeclared field `{}`", field)
            ))
        },
    }
}

/// If `value` is a non-empty mapping whose keys are all operator tokens,
/// returns the operators with their operands in order.
fn operator_tokens(value: &Value) -> Option<Vec<(Operator, &Value)>> {
    let map = match *value {
        Value::Object(ref map) if !map.is_empty() => map,
        _ => return None,
    };

    map.iter()
        .map(|(token, operand)| Operator::from_token(token).map(|op| (op, operand)))
        .collect()
}

/// Rejects pattern and code values anywhere in a bound value. A bare
/// regular expression is a pattern match in the store, even inside `$in`.
fn check_inert(field: &str, value: &Bson) -> Result<()> {
    match *value {
        Bson::RegExp(..) | Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(..) => Err(Error::new(
            ErrorKind::MalformedQuery,
            format!("value for `{}` is not plain data", field)
        )),
        Bson::Array(ref items) => items.iter().try_for_each(|item| check_inert(field, item)),
        Bson::Document(ref doc) => doc.values().try_for_each(|item| check_inert(field, item)),
        _ => Ok(()),
    }
}

/// Whether a value would be mistaken for an operator document or an
/// element match if it were used as a bare equality value.
fn is_structured(value: &Bson) -> bool {
    match *value {
        Bson::Document(_) | Bson::Array(_) => true,
        _ => false,
    }
}
