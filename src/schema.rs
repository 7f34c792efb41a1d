//! A type-safe interface over the records stored under an ordered child list.

use std::fmt::Debug;

use crate::CodecError;

/// Record names are known up front, so they can have `static` lifetimes.
/// They label logs and metrics; they do not address data.
pub type RecordName = &'static str;

/// A [`Schema`] binds a record type ([`ValueCodec`]) to a name. Every child of a paginated location
/// is decoded into a [`Schema::Value`].
pub trait Schema: Debug + Send + Sync + 'static + Sized + Default {
    /// Name of the record kind, used for logging and metrics.
    const RECORD_NAME: RecordName;

    /// Type of the record held by each child.
    type Value: ValueCodec<Self>;
}

/// A [`core::result::Result`] alias with [`CodecError`] as the error type.
pub type Result<T, E = CodecError> = core::result::Result<T, E>;

/// This trait defines a type that can serve as a [`Schema::Value`].
///
/// ```rust
/// use anyhow::Context;
///
/// use backpager::define_schema;
/// use backpager::schema::{Result, ValueCodec};
///
/// #[derive(Debug, Clone, PartialEq)]
/// pub struct Author(String);
///
/// define_schema!(Authors, Author, "author");
///
/// impl ValueCodec<Authors> for Author {
///     fn encode_value(&self) -> Result<Vec<u8>> {
///         Ok(self.0.as_bytes().to_vec())
///     }
///
///     fn decode_value(data: &[u8]) -> Result<Self> {
///         Ok(Author(String::from_utf8(data.to_vec()).context("author is not utf-8")?))
///     }
/// }
/// ```
pub trait ValueCodec<S: Schema + ?Sized>: Sized + Debug {
    /// Converts `self` to the bytes stored as a child value.
    fn encode_value(&self) -> Result<Vec<u8>>;
    /// Converts bytes fetched from a collection to `Self`.
    fn decode_value(data: &[u8]) -> Result<Self>;
}

/// A utility macro to define [`Schema`] implementors. You must specify the
/// [`Schema`] implementor's name, the record type and the record name.
///
/// # Example
///
/// ```rust
/// use backpager::define_schema;
/// use backpager::schema::{Result, ValueCodec};
///
/// define_schema!(Scores, u32, "score");
///
/// impl ValueCodec<Scores> for u32 {
///     fn encode_value(&self) -> Result<Vec<u8>> {
///         Ok(self.to_be_bytes().to_vec())
///     }
///
///     fn decode_value(data: &[u8]) -> Result<Self> {
///         let bytes: [u8; 4] = data.try_into().map_err(|_| {
///             backpager::CodecError::InvalidLength { expected: 4, got: data.len() }
///         })?;
///         Ok(u32::from_be_bytes(bytes))
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_schema {
    ($schema_type:ident, $value_type:ty, $record_name:expr) => {
        #[doc = "Schema declared with `define_schema!`."]
        #[derive(Debug, Default)]
        pub struct $schema_type;

        impl $crate::schema::Schema for $schema_type {
            type Value = $value_type;

            const RECORD_NAME: $crate::schema::RecordName = $record_name;
        }
    };
}
