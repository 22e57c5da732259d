//! Declared field types of a collection, and the casting of untrusted
//! filter values to those types.
//!
//! Query parameters arrive as strings. Before a filter reaches the store,
//! each value is cast to the declared type of its field the way a typed
//! document mapper would: `"1000"` becomes a number for a `number` field,
//! `"2020-01-01"` a date for a `date` field, and so on. A value which can't
//! be cast makes the whole query `MalformedQuery`. Fields without a declared
//! type are passed through verbatim.

use std::collections::BTreeMap;
use serde_json::Value;
use bson::{ Bson, oid::ObjectId };
use chrono::{ DateTime, NaiveDate, TimeZone, Utc };
use crate::{
    bsn::JsonExt,
    error::{ Error, ErrorKind, Result },
};

/// The type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    /// Text. Numbers and booleans are cast to their textual form.
    String,
    /// An integer or floating-point number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// A UTC timestamp.
    Date,
    /// A document identifier (`ObjectId`).
    Id,
    /// Declared, but values are not cast.
    Any,
}

/// The declared fields of a collection, keyed by (possibly dotted) path.
///
/// The `_id` field is always implicitly declared with type `Id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    /// Field path => type.
    fields: BTreeMap<String, FieldType>,
}

impl Schema {
    /// Creates an empty schema (only `_id` is declared).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method for declaring a field.
    pub fn field<S: Into<String>>(mut self, path: S, ty: FieldType) -> Self {
        self.fields.insert(path.into(), ty);
        self
    }

    /// Returns the declared type of the field at exactly `path`.
    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        if path == "_id" {
            Some(FieldType::Id)
        } else {
            self.fields.get(path).cloned()
        }
    }

    /// Whether the field at `path`, or one of the documents enclosing it,
    /// is declared. (`location.city` is declared if `location` is.)
    pub fn declares(&self, path: &str) -> bool {
        path.match_indices('.')
            .map(|(i, _)| &path[..i])
            .chain(Some(path))
            .any(|prefix| self.field_type(prefix).is_some())
    }

    /// Iterates over the declared field paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Casts a raw value to the declared type of `path`. Arrays are cast
    /// element-wise; `null` is left alone.
    pub fn cast(&self, path: &str, value: Value) -> Result<Bson> {
        match self.field_type(path) {
            None | Some(FieldType::Any) => value.try_into_bson(),
            Some(ty) => cast_value(path, ty, value),
        }
    }
}

/// Casts a single value (or array of values) to `ty`.
fn cast_value(path: &str, ty: FieldType, value: Value) -> Result<Bson> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Array(items) => items
            .into_iter()
            .map(|item| cast_value(path, ty, item))
            .collect::<Result<Vec<_>>>()
            .map(Bson::Array),
        scalar => cast_scalar(ty, &scalar).ok_or_else(|| Error::new(
            ErrorKind::MalformedQuery,
            format!("can't cast {} to {:?} for field `{}`", scalar, ty, path)
        )),
    }
}

/// Casts a non-null, non-array value; `None` if it's incompatible.
fn cast_scalar(ty: FieldType, value: &Value) -> Option<Bson> {
    match ty {
        FieldType::String => match *value {
            Value::String(ref s) => Some(Bson::from(s.as_str())),
            Value::Number(ref n) => Some(Bson::from(n.to_string())),
            Value::Bool(b) => Some(Bson::from(b.to_string())),
            _ => None,
        },
        FieldType::Number => match *value {
            Value::Number(ref n) => number_to_bson(n.as_i64(), n.as_f64()),
            Value::String(ref s) => {
                let s = s.trim();
                number_to_bson(s.parse().ok(), s.parse().ok())
            }
            _ => None,
        },
        FieldType::Boolean => match *value {
            Value::Bool(b) => Some(Bson::Boolean(b)),
            Value::Number(ref n) => match n.as_i64() {
                Some(1) => Some(Bson::Boolean(true)),
                Some(0) => Some(Bson::Boolean(false)),
                _ => None,
            },
            Value::String(ref s) => match s.trim() {
                "true" | "1" | "yes" => Some(Bson::Boolean(true)),
                "false" | "0" | "no" => Some(Bson::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
        FieldType::Date => match *value {
            Value::Number(ref n) => n.as_i64().and_then(millis_to_date),
            Value::String(ref s) => parse_date(s.trim()),
            _ => None,
        }.map(Bson::UtcDatetime),
        FieldType::Id => match *value {
            Value::String(ref s) => ObjectId::with_string(s.trim()).ok().map(Bson::ObjectId),
            _ => None,
        },
        FieldType::Any => value.clone().try_into_bson().ok(),
    }
}

/// Prefers an integer representation; rejects non-finite floats.
fn number_to_bson(int: Option<i64>, float: Option<f64>) -> Option<Bson> {
    match (int, float) {
        (Some(n), _) => Some(Bson::I64(n)),
        (None, Some(x)) if x.is_finite() => Some(Bson::FloatingPoint(x)),
        _ => None,
    }
}

/// Milliseconds since the Unix epoch to a UTC timestamp.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_to_date(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// RFC 3339 timestamps, plain `YYYY-MM-DD` dates (midnight UTC),
/// or milliseconds since the epoch.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    s.parse().ok().and_then(millis_to_date)
}

#[cfg(test)]
mod tests {
    use bson::Bson;
    use chrono::{ TimeZone, Utc };
    use crate::error::{ ErrorExt, ErrorKind, Result };
    use super::*;

    fn course_schema() -> Schema {
        Schema::new()
            .field("title", FieldType::String)
            .field("tuition", FieldType::Number)
            .field("scholarshipAvailable", FieldType::Boolean)
            .field("createdAt", FieldType::Date)
            .field("bootcamp", FieldType::Id)
            .field("location", FieldType::Any)
    }

    #[test]
    fn declared_paths() {
        let schema = course_schema();

        assert!(schema.declares("_id"));
        assert!(schema.declares("tuition"));
        assert!(schema.declares("location.city"));
        assert!(!schema.declares("tuitions"));
        assert!(!schema.declares("title2.foo"));
    }

    #[test]
    fn casts_strings_to_declared_types() -> Result<()> {
        let schema = course_schema();
        let oid = "5d713995b721c3bb38c1f5d0";

        assert_eq!(schema.cast("tuition", json!("1000"))?, Bson::I64(1000));
        assert_eq!(schema.cast("tuition", json!(" 12.5 "))?, Bson::FloatingPoint(12.5));
        assert_eq!(schema.cast("tuition", json!(["1", 2]))?, bson!([1_i64, 2_i64]));
        assert_eq!(schema.cast("title", json!(42))?, Bson::from("42"));
        assert_eq!(schema.cast("scholarshipAvailable", json!("true"))?, Bson::Boolean(true));
        assert_eq!(schema.cast("bootcamp", json!(oid))?,
                   Bson::ObjectId(ObjectId::with_string(oid)?));
        assert_eq!(schema.cast("createdAt", json!("2020-01-02"))?,
                   Bson::UtcDatetime(Utc.ymd(2020, 1, 2).and_hms(0, 0, 0)));
        assert_eq!(schema.cast("createdAt", json!(1000))?,
                   Bson::UtcDatetime(Utc.timestamp(1, 0)));
        assert_eq!(schema.cast("tuition", json!(null))?, Bson::Null);

        Ok(())
    }

    #[test]
    fn undeclared_and_any_fields_pass_through() -> Result<()> {
        let schema = course_schema();

        assert_eq!(schema.cast("weeks", json!("8"))?, Bson::from("8"));
        assert_eq!(schema.cast("location", json!({ "city": "Boston" }))?,
                   bson!({ "city": "Boston" }));

        Ok(())
    }

    #[test]
    fn incompatible_values_are_malformed() {
        let schema = course_schema();

        for &(path, ref value) in &[
            ("tuition", json!("cheap")),
            ("tuition", json!({ "$gt": 0 })),
            ("tuition", json!(true)),
            ("scholarshipAvailable", json!("maybe")),
            ("bootcamp", json!("not-an-object-id")),
            ("createdAt", json!("yesterday")),
        ] {
            let err = schema.cast(path, value.clone()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedQuery, "{} = {}", path, value);
        }
    }
}
