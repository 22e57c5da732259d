//! BSON serialization and deserialization helpers.

use serde_json::Value;
use bson::{ Bson, Document, ValueAccessError };
use serde::Serialize;
use crate::error::{ Error, ErrorKind, Result };

/// Methods for dynamically type-checking JSON.
pub trait JsonExt: Sized {
    /// Ensures that this tree of values doesn't contain integers
    /// which are not expressible by `i64` (e.g. too big `u64`s).
    /// Since the `bson` crate just blindly casts integers to `i64`,
    /// the presence of such values would result in over- or underflow
    /// or truncation, leading to potentially hard-to-debug errors.
    ///
    /// If this check succeeds, `self` is converted into a `Bson` tree.
    /// Preservation of the order of keys in maps is ensured by the
    /// `preserve_order` feature of the `serde_json` crate.
    ///
    /// Objects always become plain documents. Extended JSON keys such as
    /// `$regex`, `$code` or `$oid` are kept as data, never decoded into
    /// the special BSON types they would denote.
    fn try_into_bson(self) -> Result<Bson>;
}

/// Methods for dynamically type-checking BSON.
pub trait BsonExt: Sized {
    /// Ensures that the BSON value is a `Document` and unwraps it.
    fn try_into_doc(self) -> Result<Document>;

    /// Ensures that the BSON value can be interpreted as a boolean,
    /// and performs the conversion.
    fn try_as_bool(&self) -> Option<bool>;

    /// Returns the value as an `f64` if it is of any numeric type.
    fn try_as_f64(&self) -> Option<f64>;
}

impl JsonExt for Value {
    fn try_into_bson(self) -> Result<Bson> {
        match self {
            // We need the value to be representable by either an `i64` or an `f64`.
            Value::Number(n) => if n.is_i64() || n.is_f64() {
                bson::to_bson(&n).map_err(Into::into)
            } else {
                Err(Error::new(
                    ErrorKind::BsonNumberRepr,
                    format!("Value `{}` can't be represented in BSON", n)
                ))
            },

            // Check transitively if every element of the array is correct.
            Value::Array(values) => values
                .into_iter()
                .map(JsonExt::try_into_bson)
                .collect::<Result<Vec<_>>>()
                .map(Bson::from),

            // Map keys are always OK because they're strings;
            // therefore, we only need to check the associated values.
            Value::Object(values) => values
                .into_iter()
                .map(|(k, v)| v.try_into_bson().map(|v| (k, v)))
                .collect::<Result<Document>>()
                .map(Bson::Document),

            // Anything else non-recursive is OK.
            value => Ok(value.into()),
        }
    }
}

impl BsonExt for Bson {
    #[allow(clippy::float_cmp)]
    fn try_as_bool(&self) -> Option<bool> {
        match *self {
            Bson::Boolean(b) => Some(b),
            Bson::I32(0) | Bson::I64(0) => Some(false),
            Bson::I32(1) | Bson::I64(1) => Some(true),
            Bson::FloatingPoint(x) if x == 0.0 => Some(false),
            Bson::FloatingPoint(x) if x == 1.0 => Some(true),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
    fn try_as_f64(&self) -> Option<f64> {
        match *self {
            Bson::I32(n) => Some(f64::from(n)),
            Bson::I64(n) => Some(n as f64),
            Bson::FloatingPoint(x) => Some(x),
            _ => None,
        }
    }

    fn try_into_doc(self) -> Result<Document> {
        match self {
            Bson::Document(doc) => Ok(doc),
            value => Err(Error::with_cause(
                format!("expected Document, got {:?}", value.element_type()),
                ValueAccessError::UnexpectedType,
            ))
        }
    }
}

/// Creates a BSON `Document` out of a serializable value.
pub fn serialize_document<T: Serialize>(value: &T) -> Result<Document> {
    bson::to_bson(value)
        .map_err(From::from)
        .and_then(BsonExt::try_into_doc)
}

#[cfg(test)]
mod tests {
    use std::u64;
    use bson::oid::ObjectId;
    use crate::error::{ ErrorExt, ErrorKind, Result };
    use super::*;

    #[test]
    fn json_ext_try_into_bson() -> Result<()> {
        let good = json!([{ "tuition": { "gte": 1000 } }, "a", 2.5, null]);
        let bad = serde_json::to_value(&u64::MAX)?;

        assert_eq!(good.try_into_bson()?,
                   bson!([{ "tuition": { "gte": 1000_i64 } }, "a", 2.5, null]));
        assert!(bad.try_into_bson().is_err());

        Ok(())
    }

    #[test]
    fn bson_ext_try_into_doc() -> Result<()> {
        let doc = bson!({ "foo": "bar", "qux": 3.14 });
        let other = bson!([{ "key": "value" }, false, null]);

        assert_eq!(doc.try_into_doc()?,
                   doc!{ "foo": "bar", "qux": 3.14 });

        assert!(other.try_into_doc().is_err());

        Ok(())
    }

    #[test]
    fn bson_ext_numbers_and_bools() {
        assert_eq!(Bson::I32(7).try_as_f64(),              Some(7.0));
        assert_eq!(Bson::I64(-3).try_as_f64(),             Some(-3.0));
        assert_eq!(Bson::FloatingPoint(0.5).try_as_f64(),  Some(0.5));
        assert_eq!(Bson::from("12").try_as_f64(),          None);
        assert_eq!(Bson::Null.try_as_f64(),                None);

        assert_eq!(Bson::Boolean(true).try_as_bool(),      Some(true));
        assert_eq!(Bson::I64(0).try_as_bool(),             Some(false));
        assert_eq!(Bson::FloatingPoint(0.999).try_as_bool(), None);
    }

    #[test]
    fn extended_json_keys_stay_data() -> Result<()> {
        let value = json!({ "$regex": ".*", "$options": "i" });
        let code = json!([{ "$code": "sleep(1000)" }]);

        assert_eq!(value.try_into_bson()?, Bson::Document(doc!{ "$regex": ".*", "$options": "i" }));
        assert_eq!(code.try_into_bson()?, bson!([{ "$code": "sleep(1000)" }]));

        Ok(())
    }

    #[test]
    fn serialize_one_document() -> Result<()> {
        #[derive(Serialize)]
        struct Number { value: u64 }

        #[derive(Serialize)]
        struct Child { parent: ObjectId }

        let good = Number { value: 1 << 40 };
        let bad_64 = Number { value: u64::MAX };
        let bad_nodoc: i64 = 0;
        let parent = ObjectId::with_string("5d725a037b292f5f8ceff787")?;

        assert_eq!(serialize_document(&good)?, doc!{ "value": (1_i64 << 40) });
        assert_eq!(serialize_document(&Child { parent: parent.clone() })?,
                   doc!{ "parent": parent });
        assert_eq!(serialize_document(&bad_64).unwrap_err().kind(),
                   ErrorKind::BsonEncoding);
        assert!(serialize_document(&bad_nodoc)
                .unwrap_err()
                .to_string()
                .contains("expected Document, got Integer64Bit"));

        Ok(())
    }
}
