//! `Error` and `Result` types arising out of query planning, store access,
//! and derived-aggregate bookkeeping.

use std::fmt;
use std::error;
use std::result;
use std::ops::Deref;
use std::borrow::Cow;
use bson::{ Bson, ValueAccessError };
use backtrace::Backtrace;
use typemap::{ DebugMap, Key };

/// Slightly augmented trait for backtrace-able errors.
#[allow(clippy::stutter)]
pub trait ErrorExt: error::Error {
    /// Similar to `std::error::Error::source()`, but with richer type info.
    fn reason(&self) -> Option<&(dyn ErrorExt + 'static)> {
        None
    }

    /// Returns the deepest possible backtrace, if any.
    fn backtrace(&self) -> Option<&Backtrace> {
        self.reason().and_then(ErrorExt::backtrace)
    }

    /// Structured error kind.
    fn kind(&self) -> ErrorKind;

    /// Until subtrait coercions are implemented, this helper method
    /// should return the receiver as an `&std::error::Error` trait object.
    fn as_std_error(&self) -> &(dyn error::Error + 'static);
}

/// A trait for conveniently propagating errors up the call stack.
pub trait ResultExt<T>: Sized {
    /// If this `Result` is an `Err`, then prepend the specified error
    /// to the front of the linked list of causes. The kind of the cause
    /// is retained.
    /// ```
    /// # extern crate resourcery;
    /// #
    /// # use std::error::Error as StdError;
    /// # use resourcery::error::{ Error, ErrorKind, ErrorExt, Result, ResultExt };
    /// #
    /// # fn main() -> Result<()> {
    /// #
    /// let ok: Result<_> = Ok("success!");
    /// let ok_chained = ok.chain("dummy error message")?;
    /// assert_eq!(ok_chained, "success!");
    ///
    /// let err: Result<i32> = Err(Error::new(
    ///     ErrorKind::StoreUnavailable, "chained cause"
    /// ));
    /// let err_chained = err.chain("top-level message").unwrap_err();
    /// assert_eq!(err_chained.description(), "top-level message");
    /// assert_eq!(err_chained.kind(), ErrorKind::StoreUnavailable);
    /// #
    /// # Ok(())
    /// # }
    /// ```
    fn chain<M: ErrMsg>(self, message: M) -> Result<T>;

    /// Like `chain()`, but the new head of the cause list is of the
    /// given kind instead of inheriting the kind of its cause.
    /// ```
    /// # extern crate resourcery;
    /// #
    /// # use resourcery::error::{ Error, ErrorKind, ErrorExt, Result, ResultExt };
    /// #
    /// let err: Result<()> = Err(Error::new(ErrorKind::StoreUnavailable, "timed out"));
    /// let err = err.chain_as(ErrorKind::AggregateWriteFailed, "can't write average").unwrap_err();
    /// assert_eq!(err.kind(), ErrorKind::AggregateWriteFailed);
    /// assert_eq!(err.reason().unwrap().kind(), ErrorKind::StoreUnavailable);
    /// ```
    fn chain_as<M: ErrMsg>(self, kind: ErrorKind, message: M) -> Result<T>;
}

/// Values that can act as or generate an error message.
pub trait ErrMsg: Sized {
    /// Convert the value to an error message.
    fn into_message(self) -> Cow<'static, str>;
}

/// Type alias for a `Result` containing a resourcery `Error`.
pub type Result<T> = result::Result<T, Error>;

impl<T, E> ResultExt<T> for result::Result<T, E> where E: ErrorExt + 'static {
    fn chain<M: ErrMsg>(self, message: M) -> Result<T> {
        self.map_err(|cause| Error::with_cause(message.into_message(), cause))
    }

    fn chain_as<M: ErrMsg>(self, kind: ErrorKind, message: M) -> Result<T> {
        self.map_err(|cause| {
            let mut error = Error::with_cause(message.into_message(), cause);
            error.kind = kind;
            error
        })
    }
}

/// Blanket `impl ErrMsg` for string literals.
impl ErrMsg for &'static str {
    fn into_message(self) -> Cow<'static, str> {
        Cow::Borrowed(self)
    }
}

/// Blanket `impl ErrMsg` for error message formatting functions.
impl<F> ErrMsg for F where F: FnOnce() -> String {
    fn into_message(self) -> Cow<'static, str> {
        Cow::Owned(self())
    }
}

/// A structured, "machine-readable" error kind.
#[allow(clippy::stutter)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A filter names a field which is not declared in the schema
    /// of the collection (strict mode), or which is not a field at all.
    InvalidFilterField,
    /// A filter value is incompatible with the type of its field, or an
    /// operator is used in a way the store does not accept.
    MalformedQuery,
    /// The document store timed out or could not be reached.
    StoreUnavailable,
    /// A recomputed aggregate could not be written back onto its parent.
    AggregateWriteFailed,
    /// Dependent children were not (all) removed; the parent was kept.
    CascadeIncomplete,
    /// The document addressed by its identifier does not exist.
    NotFound,
    /// The collection is not declared in the registry.
    UnknownCollection,
    /// The requested relation expansion is not declared for the collection.
    UnknownRelation,
    /// The registry configuration is inconsistent.
    InvalidConfig,
    /// The caller abandoned the operation before it completed.
    Cancelled,
    /// There was an error converting between JSON and a strongly-typed value.
    JsonTranscoding,
    /// There was an error converting a strongly-typed value to BSON.
    BsonEncoding,
    /// There was an error converting BSON to a strongly-typed value.
    BsonDecoding,
    /// This numerical value can't be represented in BSON (because,
    /// for example, it exceeds the range of `i64`)
    BsonNumberRepr,
    /// A field with the specified key was not found in the BSON document.
    MissingDocumentField,
    /// A field with the specified key was found in the BSON document,
    /// but it was of an unexpected type.
    IllTypedDocumentField,
    /// One or more ID fields (e.g. `_id` in an entity document or
    /// `inserted_id` in a MongoDB response) could not be found.
    MissingId,
    /// An `ObjectId` could not be generated.
    ObjectIdGeneration,
    /// An error that comes from the MongoDB driver.
    MongoDbError,
    /// An error coming from MongoDB, related to a single write operation.
    MongoDbWriteException,
    /// An attempt was made to convert a negative integer to a `usize`.
    IntConversionUnderflow,
    /// An attempt was made to convert an integer that is too big to a `usize`.
    IntConversionOverflow,
    /// A document with the same `_id` already exists in the collection.
    DuplicateKey,
    /// A lock guarding in-memory state was poisoned by a panicking thread.
    LockPoisoned,
}

impl ErrorKind {
    /// Returns a human-readable error description for this kind.
    pub fn as_str(self) -> &'static str {
        use self::ErrorKind::*;

        match self {
            InvalidFilterField     => "invalid filter field",
            MalformedQuery         => "malformed query",
            StoreUnavailable       => "document store unavailable",
            AggregateWriteFailed   => "aggregate write failed",
            CascadeIncomplete      => "cascade incomplete",
            NotFound               => "document not found",
            UnknownCollection      => "unknown collection",
            UnknownRelation        => "unknown relation",
            InvalidConfig          => "invalid configuration",
            Cancelled              => "operation cancelled",
            JsonTranscoding        => "JSON transcoding error",
            BsonEncoding           => "BSON encoding error",
            BsonDecoding           => "BSON decoding error",
            BsonNumberRepr         => "number not i64 nor f64",
            MissingDocumentField   => "document field not found",
            IllTypedDocumentField  => "document field of unexpected type",
            MissingId              => "missing unique identifier",
            ObjectIdGeneration     => "an ObjectID could not be generated",
            MongoDbError           => "MongoDB error",
            MongoDbWriteException  => "MongoDB write exception",
            IntConversionUnderflow => "integer conversion underflowed",
            IntConversionOverflow  => "integer conversion overflowed",
            DuplicateKey           => "duplicate key",
            LockPoisoned           => "lock poisoned",
        }
    }

    /// Whether an error of this kind was caused by the client's request
    /// rather than by the server or one of its collaborators.
    pub fn is_client_error(self) -> bool {
        use self::ErrorKind::*;

        match self {
            InvalidFilterField | MalformedQuery | NotFound | UnknownRelation => true,
            _ => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Context key: the collection an error pertains to.
#[derive(Debug, Clone, Copy)]
pub struct CollectionName;

impl Key for CollectionName {
    type Value = String;
}

/// Context key: the `_id` of the parent document an error pertains to.
#[derive(Debug, Clone, Copy)]
pub struct ParentId;

impl Key for ParentId {
    type Value = Bson;
}

/// Context key: the `_id` of the child document an error pertains to.
#[derive(Debug, Clone, Copy)]
pub struct ChildId;

impl Key for ChildId {
    type Value = Bson;
}

/// The central error type for resourcery.
#[derive(Debug)]
pub struct Error {
    /// The structured, "machine-readable" kind of this error.
    kind: ErrorKind,
    /// The human-readable description.
    message: Cow<'static, str>,
    /// The underlying error, if any.
    cause: Option<Box<dyn ErrorExt>>,
    /// The backtrace, if any.
    backtrace: Option<Backtrace>,
    /// Additional context info, if any.
    context: DebugMap,
}

impl Error {
    /// Creates an error with the specified kind, message, no cause,
    /// and a backtrace.
    /// ```
    /// # extern crate resourcery;
    /// #
    /// # use std::error::Error as StdError;
    /// # use resourcery::error::{ Error, ErrorKind, ErrorExt };
    /// #
    /// # fn main() {
    /// #
    /// let error = Error::new(ErrorKind::NotFound, "sample error message");
    /// assert_eq!(error.description(), "sample error message");
    /// assert_eq!(error.kind(), ErrorKind::NotFound);
    /// assert!(error.reason().is_none());
    /// assert!(error.backtrace().is_some());
    /// #
    /// # }
    /// ```
    pub fn new<S>(kind: ErrorKind, message: S) -> Self
        where S: Into<Cow<'static, str>>
    {
        Error {
            kind,
            message: message.into(),
            cause: None,
            backtrace: Some(Backtrace::new()),
            context: DebugMap::custom(),
        }
    }

    /// Creates an error with the specified message and cause. If the cause has
    /// no backtrace, this method will create it and add it to the new instance.
    pub fn with_cause<S, E>(message: S, cause: E) -> Self
        where S: Into<Cow<'static, str>>,
              E: ErrorExt + 'static
    {
        let kind = cause.kind();
        let message = message.into();
        let backtrace = if cause.backtrace().is_none() {
            Some(Backtrace::new())
        } else {
            None
        };
        let cause: Option<Box<dyn ErrorExt>> = Some(Box::new(cause));
        let context = DebugMap::custom();

        Error { kind, message, cause, backtrace, context }
    }

    /// Returns additional context info if any. Only this error's own
    /// context is inspected; context attached to a cause is not.
    pub fn context<K: Key>(&self) -> Option<&K::Value>
        where K::Value: fmt::Debug
    {
        self.context.get::<K>()
    }

    /// Augments the error with additional context info.
    pub fn set_context<K: Key>(&mut self, value: K::Value) -> Option<K::Value>
        where K::Value: fmt::Debug
    {
        self.context.insert::<K>(value)
    }

    /// Builder-style setter for agumenting the error with context info.
    pub fn with_context<K: Key>(mut self, value: K::Value) -> Self
        where K::Value: fmt::Debug
    {
        self.set_context::<K>(value);
        self
    }

    /// The human-readable message of the head of the cause list.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorExt for Error {
    fn reason(&self) -> Option<&(dyn ErrorExt + 'static)> {
        self.cause.as_ref().map(Deref::deref)
    }

    #[allow(clippy::or_fun_call)]
    fn backtrace(&self) -> Option<&Backtrace> {
        self.reason().and_then(ErrorExt::backtrace).or(self.backtrace.as_ref())
    }

    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn as_std_error(&self) -> &(dyn error::Error + 'static) {
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;

        if let Some(cause) = self.cause.as_ref() {
            write!(f, ", caused by: {}", cause)?
        }

        if f.alternate() {
            if let Some(backtrace) = self.backtrace.as_ref() {
                write!(f, "; {:#?}", backtrace)?
            }
        }

        Ok(())
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        &self.message
    }

    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.reason().map(ErrorExt::as_std_error)
    }
}

impl From<ValueAccessError> for Error {
    fn from(error: ValueAccessError) -> Self {
        let message = match error {
            ValueAccessError::NotPresent => "missing value for key in Document",
            ValueAccessError::UnexpectedType => "ill-typed value for key in Document",
        };
        Self::with_cause(message, error)
    }
}

impl ErrorExt for ValueAccessError {
    fn kind(&self) -> ErrorKind {
        match *self {
            ValueAccessError::NotPresent => ErrorKind::MissingDocumentField,
            ValueAccessError::UnexpectedType => ErrorKind::IllTypedDocumentField,
        }
    }

    fn as_std_error(&self) -> &(dyn error::Error + 'static) {
        self
    }
}

/// Transport-level failures mean the server can't be reached; everything
/// else the driver reports is a problem with the command we sent.
impl From<mongodb::Error> for Error {
    fn from(error: mongodb::Error) -> Self {
        Self::with_cause("MongoDB error", error)
    }
}

impl ErrorExt for mongodb::Error {
    fn kind(&self) -> ErrorKind {
        use mongodb::error::ErrorCode::*;

        match *self {
            mongodb::Error::IoError(_) => ErrorKind::StoreUnavailable,
            mongodb::Error::CodedError(ExceededTimeLimit)
                | mongodb::Error::CodedError(NetworkTimeout)
                | mongodb::Error::CodedError(HostUnreachable)
                | mongodb::Error::CodedError(HostNotFound) => ErrorKind::StoreUnavailable,
            mongodb::Error::CodedError(BadValue)
                | mongodb::Error::CodedError(FailedToParse)
                | mongodb::Error::CodedError(TypeMismatch) => ErrorKind::MalformedQuery,
            _ => ErrorKind::MongoDbError,
        }
    }

    fn as_std_error(&self) -> &(dyn error::Error + 'static) {
        self
    }
}

/// The kind of a server error reported as a numeric code in a reply
/// document. Time limits and unreachable hosts mean the store is
/// unavailable; rejected operators and operands mean a malformed query.
pub(crate) fn server_error_kind(code: i64) -> ErrorKind {
    match code {
        6 | 7 | 50 | 89 => ErrorKind::StoreUnavailable,
        2 | 9 | 14 => ErrorKind::MalformedQuery,
        _ => ErrorKind::MongoDbError,
    }
}

/// Implementing `ErrorExt` and `From` boilerplate.
macro_rules! impl_error_type {
    ($ty:path, $kind:ident, $message:expr) => {
        impl From<$ty> for Error {
            fn from(error: $ty) -> Self {
                Self::with_cause($message, error)
            }
        }

        impl ErrorExt for $ty {
            fn kind(&self) -> ErrorKind {
                ErrorKind::$kind
            }

            fn as_std_error(&self) -> &(dyn error::Error + 'static) {
                self
            }
        }
    }
}

impl_error_type! { serde_json::Error,  JsonTranscoding,    "JSON transcoding error" }
impl_error_type! { bson::EncoderError, BsonEncoding,       "BSON encoding error" }
impl_error_type! { bson::DecoderError, BsonDecoding,       "BSON decoding error" }
impl_error_type! { bson::oid::Error,   ObjectIdGeneration, "ObjectId generation error" }
impl_error_type! {
    mongodb::coll::error::WriteException,
    MongoDbWriteException,
    "MongoDB write exception"
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;
    use super::*;

    #[test]
    fn chain_keeps_kind_but_context_stays_on_the_cause() {
        let err: Result<()> = Err(
            Error::new(ErrorKind::NotFound, "no such parent")
                .with_context::<ParentId>(Bson::from("p1"))
        );
        let err = err.chain("recompute failed").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.description(), "recompute failed");
        assert!(err.context::<ParentId>().is_none());
        assert!(err.to_string().contains("caused by: document not found: no such parent"));
    }

    #[test]
    fn chain_as_reclassifies() {
        let err: Result<()> = Err(Error::new(ErrorKind::StoreUnavailable, "timeout"));
        let err = err
            .chain_as(ErrorKind::CascadeIncomplete, "children not removed")
            .unwrap_err()
            .with_context::<CollectionName>(String::from("courses"));

        assert_eq!(err.kind(), ErrorKind::CascadeIncomplete);
        assert_eq!(err.reason().map(ErrorExt::kind), Some(ErrorKind::StoreUnavailable));
        assert_eq!(err.context::<CollectionName>().map(String::as_str), Some("courses"));
        assert!(err.source().is_some());
    }

    #[test]
    fn server_error_codes() {
        assert_eq!(server_error_kind(50), ErrorKind::StoreUnavailable);
        assert_eq!(server_error_kind(89), ErrorKind::StoreUnavailable);
        assert_eq!(server_error_kind(2), ErrorKind::MalformedQuery);
        assert_eq!(server_error_kind(9), ErrorKind::MalformedQuery);
        assert_eq!(server_error_kind(11000), ErrorKind::MongoDbError);
    }

    #[test]
    fn client_error_classification() {
        assert!(ErrorKind::MalformedQuery.is_client_error());
        assert!(ErrorKind::InvalidFilterField.is_client_error());
        assert!(!ErrorKind::StoreUnavailable.is_client_error());
        assert!(!ErrorKind::AggregateWriteFailed.is_client_error());
    }
}
