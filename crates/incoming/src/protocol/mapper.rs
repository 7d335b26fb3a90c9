//! Plug-in contract for turning a buffered body into a structured value.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::protocol::MappingError;

/// Parses a complete body into a `T`.
///
/// The decoder buffers the whole body before calling [`Mapper::parse`], so a mapper never sees a
/// partial body and a mapping failure leaves the connection usable.
pub trait Mapper<T> {
    fn parse(&self, bytes: &[u8]) -> Result<T, MappingError>;
}

impl<T, M: Mapper<T> + ?Sized> Mapper<T> for &M {
    fn parse(&self, bytes: &[u8]) -> Result<T, MappingError> {
        (**self).parse(bytes)
    }
}

impl<T, M: Mapper<T> + ?Sized> Mapper<T> for Arc<M> {
    fn parse(&self, bytes: &[u8]) -> Result<T, MappingError> {
        (**self).parse(bytes)
    }
}

/// Maps JSON bodies to any `DeserializeOwned` type.
///
/// # Example
/// ```
/// # use serde::Deserialize;
/// # use micro_http_incoming::protocol::{JsonMapper, Mapper};
/// #[derive(Deserialize, Debug)]
/// struct Greeting {
///     message: String,
/// }
///
/// let greeting: Greeting = JsonMapper.parse(br#"{"message":"hello"}"#).unwrap();
/// assert_eq!(greeting.message, "hello");
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMapper;

impl<T: DeserializeOwned> Mapper<T> for JsonMapper {
    fn parse(&self, bytes: &[u8]) -> Result<T, MappingError> {
        serde_json::from_slice(bytes).map_err(|e| MappingError::with_source("body is not valid json for target type", e))
    }
}

/// Adapts a plain function into a [`Mapper`].
pub struct FnMapper<F, T> {
    f: F,
    _target: PhantomData<fn() -> T>,
}

impl<F, T> FnMapper<F, T>
where
    F: Fn(&[u8]) -> Result<T, MappingError>,
{
    pub fn new(f: F) -> Self {
        Self { f, _target: PhantomData }
    }
}

impl<F, T> Mapper<T> for FnMapper<F, T>
where
    F: Fn(&[u8]) -> Result<T, MappingError>,
{
    fn parse(&self, bytes: &[u8]) -> Result<T, MappingError> {
        (self.f)(bytes)
    }
}

impl<F, T> std::fmt::Debug for FnMapper<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMapper").finish_non_exhaustive()
    }
}
