//! Helper types for making the construction of filter, sort, and
//! configuration documents a little less stringly-typed.

use std::fmt;
use bson::Bson;
use serde::{
    ser::{ Serialize, Serializer, SerializeSeq },
    de::{ Deserialize, Deserializer, Visitor, SeqAccess },
};

/// Ordering, for specifying in which order to sort results yielded by a query.
/// ```
/// # #[macro_use]
/// # extern crate bson;
/// # extern crate resourcery;
/// #
/// # use resourcery::literal::Order;
/// #
/// # fn main() {
/// let sorting = doc! {
///     "createdAt": Order::Descending,
///     "name": Order::Ascending,
/// };
/// assert_eq!(sorting, doc!{
///     "createdAt": -1,
///     "name": 1,
/// });
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Order {
    /// Order smaller values first.
    Ascending  =  1,
    /// Order greater values first.
    Descending = -1,
}

/// The default ordering is `Ascending`.
impl Default for Order {
    fn default() -> Self {
        Order::Ascending
    }
}

/// This impl is provided so that you can use these more expressive ordering
/// names instead of the not very clear `1` and `-1` when constructing literal
/// BSON sort documents.
impl From<Order> for Bson {
    fn from(order: Order) -> Self {
        Bson::I32(order as _)
    }
}

impl Serialize for Order {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i32(*self as _)
    }
}

impl<'a> Deserialize<'a> for Order {
    fn deserialize<D: Deserializer<'a>>(de: D) -> Result<Self, D::Error> {
        de.deserialize_i32(OrderVisitor)
    }
}

/// A serde visitor that produces an `Order` from +1 or -1.
struct OrderVisitor;

impl<'a> Visitor<'a> for OrderVisitor {
    type Value = Order;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "an integer expressing ordering: {} or {}",
            Order::Ascending as i32,
            Order::Descending as i32,
        )
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v == Order::Ascending as i64 {
            Ok(Order::Ascending)
        } else if v == Order::Descending as i64 {
            Ok(Order::Descending)
        } else {
            Err(E::custom(format!("invalid ordering: {}", v)))
        }
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        if v == Order::Ascending as u64 {
            Ok(Order::Ascending)
        } else {
            Err(E::custom(format!("invalid ordering: {}", v)))
        }
    }
}

/// A comparison operator of a filter predicate.
///
/// Only the operators in `Operator::TOKENS` can be requested by a client,
/// and only by their bare token (`gte`, never `$gte`). Equality has no
/// token: it is what a plain value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal to the value.
    Eq,
    /// Strictly greater than the value.
    Gt,
    /// Greater than or equal to the value.
    Gte,
    /// Strictly less than the value.
    Lt,
    /// Less than or equal to the value.
    Lte,
    /// Equal to any element of the (array) value.
    In,
}

impl Operator {
    /// The client-facing operator vocabulary.
    pub const TOKENS: &'static [(&'static str, Operator)] = &[
        ("gt",  Operator::Gt),
        ("gte", Operator::Gte),
        ("lt",  Operator::Lt),
        ("lte", Operator::Lte),
        ("in",  Operator::In),
    ];

    /// Looks up a client-facing operator token. Anything outside
    /// the vocabulary, including `$`-prefixed store syntax, is `None`.
    /// ```
    /// # use resourcery::literal::Operator;
    /// assert_eq!(Operator::from_token("gte"), Some(Operator::Gte));
    /// assert_eq!(Operator::from_token("$gte"), None);
    /// assert_eq!(Operator::from_token("ne"), None);
    /// assert_eq!(Operator::from_token("GT"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Self> {
        Self::TOKENS
            .iter()
            .find(|&&(t, _)| t == token)
            .map(|&(_, op)| op)
    }

    /// The name of the operator in the store's query language.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq  => "$eq",
            Operator::Gt  => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt  => "$lt",
            Operator::Lte => "$lte",
            Operator::In  => "$in",
        }
    }

    /// Looks up an operator by its name in the store's query language.
    pub fn from_store_name(name: &str) -> Option<Self> {
        Some(match name {
            "$eq"  => Operator::Eq,
            "$gt"  => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt"  => Operator::Lt,
            "$lte" => Operator::Lte,
            "$in"  => Operator::In,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// The kinds of child mutations after which a derived aggregate
    /// is recomputed.
    ///
    /// ```
    /// # extern crate serde_json;
    /// # extern crate resourcery;
    /// #
    /// # use resourcery::literal::Triggers;
    /// #
    /// # fn main() -> Result<(), serde_json::Error> {
    /// let triggers: Triggers = serde_json::from_str(r#"["create", "delete"]"#)?;
    /// assert_eq!(triggers, Triggers::CREATE | Triggers::DELETE);
    /// assert_eq!(serde_json::to_string(&triggers)?, r#"["create","delete"]"#);
    /// assert_eq!(Triggers::default(), Triggers::all());
    /// # Ok(())
    /// # }
    /// ```
    pub struct Triggers: u8 {
        /// A child was inserted.
        const CREATE = 0b0000_0001;
        /// A child was modified in a way that affects the aggregate.
        const UPDATE = 0b0000_0010;
        /// A child was removed.
        const DELETE = 0b0000_0100;
    }
}

/// By default, every kind of mutation triggers recomputation.
impl Default for Triggers {
    fn default() -> Self {
        Triggers::all()
    }
}

/// All distinct trigger bitflags, along with their names.
static TRIGGER_NAMES: &[(Triggers, &str)] = &[
    (Triggers::CREATE, "create"),
    (Triggers::UPDATE, "update"),
    (Triggers::DELETE, "delete"),
];

impl Serialize for Triggers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let n = self.bits().count_ones() as usize;
        let mut seq = serializer.serialize_seq(Some(n))?;

        for &(flag, name) in TRIGGER_NAMES {
            if self.contains(flag) {
                seq.serialize_element(name)?;
            }
        }

        seq.end()
    }
}

impl<'a> Deserialize<'a> for Triggers {
    fn deserialize<D: Deserializer<'a>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(TriggersVisitor)
    }
}

/// A `Visitor` for converting an array of trigger names to a `Triggers` bitflag.
#[derive(Debug, Clone, Copy)]
struct TriggersVisitor;

impl TriggersVisitor {
    /// Attempts to convert a trigger name to a `Triggers` bitflag.
    fn bitflag_for_name<E: serde::de::Error>(name: &str) -> Result<Triggers, E> {
        match TRIGGER_NAMES.iter().find(|&&(_, n)| n == name) {
            Some(&(flag, _)) => Ok(flag),
            None => Err(E::custom(format!("unknown trigger: '{}'", name))),
        }
    }
}

impl<'a> Visitor<'a> for TriggersVisitor {
    type Value = Triggers;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array of mutation names: create, update, delete")
    }

    fn visit_seq<A: SeqAccess<'a>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut flags = Triggers::empty();

        while let Some(name) = seq.next_element::<String>()? {
            flags |= Self::bitflag_for_name(&name)?;
        }

        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use bson::{ from_bson, to_bson, Bson };
    use super::*;

    #[test]
    fn order_round_trips_through_bson() {
        assert_eq!(to_bson(&Order::Descending).ok(), Some(Bson::I32(-1)));
        assert_eq!(from_bson::<Order>(Bson::I64(-1)).ok(), Some(Order::Descending));
        assert!(from_bson::<Order>(Bson::I32(0))
                .unwrap_err()
                .to_string()
                .contains("invalid ordering"));
    }

    #[test]
    fn only_bare_tokens_are_operators() {
        for &(token, op) in Operator::TOKENS {
            assert_eq!(Operator::from_token(token), Some(op));
            assert_eq!(Operator::from_store_name(op.as_str()), Some(op));
        }

        for bogus in &["eq", "$gt", "ne", "regex", "where", "gte ", ""] {
            assert_eq!(Operator::from_token(bogus), None);
        }
    }

    #[test]
    fn unknown_trigger_is_rejected() {
        let err = serde_json::from_str::<Triggers>(r#"["create", "upsert"]"#).unwrap_err();
        assert!(err.to_string().contains("unknown trigger: 'upsert'"));
    }
}
