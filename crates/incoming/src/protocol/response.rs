//! Incoming response head handling.
//!
//! The status line and header block are parsed elsewhere; this module wraps the parsed result in a
//! `http::Response<()>` and decides, from that head alone, how the body that follows is framed.

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::header::GetAll;
use http::response::Parts;
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Version};
use tracing::warn;

use crate::pool::Poolable;
use crate::protocol::PayloadSize;

/// The immutable head of an incoming message: status, reason phrase and headers.
///
/// The reason phrase is kept as received because `http::StatusCode` only knows canonical
/// phrases.
#[derive(Debug)]
pub struct ResponseHeader {
    inner: Response<()>,
    status_description: String,
    request_method: Option<Method>,
}

impl ResponseHeader {
    pub fn new<S: Into<String>>(status: StatusCode, status_description: S, headers: HeaderMap) -> Self {
        let mut inner = Response::new(());
        *inner.status_mut() = status;
        *inner.headers_mut() = headers;
        Self { inner, status_description: status_description.into(), request_method: None }
    }

    /// Records the method of the request this message answers.
    ///
    /// Responses to `HEAD` carry framing headers describing a body that is never sent.
    pub fn with_request_method(mut self, method: Method) -> Self {
        self.request_method = Some(method);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        *self.inner.status_mut() = status;
    }

    pub fn set_status_description<S: Into<String>>(&mut self, status_description: S) {
        self.status_description = status_description.into();
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    pub fn set_request_method(&mut self, method: Option<Method>) {
        self.request_method = method;
    }

    pub fn status_description(&self) -> &str {
        &self.status_description
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn request_method(&self) -> Option<&Method> {
        self.request_method.as_ref()
    }

    /// Consumes the header and returns the inner `Response<()>`.
    pub fn into_inner(self) -> Response<()> {
        self.inner
    }

    /// Whether the status code itself rules out a body: 1xx, 204 and 304.
    pub fn status_allows_body(&self) -> bool {
        let status = self.status();
        !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
    }

    /// Determines how the body following this head is framed.
    ///
    /// Follows RFC 7230 section 3.3.3 in priority order: chunked transfer-coding, then a valid
    /// Content-Length, then bodiless status codes, and finally read-until-close.
    pub fn payload_size(&self) -> PayloadSize {
        if self.request_method == Some(Method::HEAD) {
            return PayloadSize::Empty;
        }

        let headers = self.headers();

        if is_chunked(headers.get_all(TRANSFER_ENCODING)) {
            if headers.contains_key(CONTENT_LENGTH) {
                warn!("transfer-encoding and content-length both present, using chunked");
            }
            return PayloadSize::Chunked;
        }

        if headers.contains_key(CONTENT_LENGTH) {
            match content_length(headers.get_all(CONTENT_LENGTH)) {
                Some(length) => return PayloadSize::Length(length),
                None => warn!("ignoring invalid content-length header"),
            }
        }

        if !self.status_allows_body() {
            return PayloadSize::Empty;
        }

        PayloadSize::Unbounded
    }
}

/// Pooled heads keep their header map and reason phrase allocations across messages.
impl Poolable for ResponseHeader {
    fn create() -> Self {
        Self::new(StatusCode::OK, String::new(), HeaderMap::new())
    }

    fn reset(&mut self) {
        *self.inner.status_mut() = StatusCode::OK;
        *self.inner.version_mut() = Version::default();
        self.inner.headers_mut().clear();
        self.inner.extensions_mut().clear();
        self.status_description.clear();
        self.request_method = None;
    }
}

/// Converts response parts into a ResponseHeader, using the canonical reason phrase.
impl From<Parts> for ResponseHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Response::from_parts(parts, ()).into()
    }
}

impl From<Response<()>> for ResponseHeader {
    #[inline]
    fn from(inner: Response<()>) -> Self {
        let status_description = inner.status().canonical_reason().unwrap_or_default().to_string();
        Self { inner, status_description, request_method: None }
    }
}

impl AsRef<Response<()>> for ResponseHeader {
    fn as_ref(&self) -> &Response<()> {
        &self.inner
    }
}

/// Checks whether any Transfer-Encoding value lists the `chunked` coding.
fn is_chunked(values: GetAll<'_, HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    values
        .iter()
        .flat_map(|value| value.as_bytes().split(|b| *b == b','))
        .any(|coding| coding.trim_ascii().eq_ignore_ascii_case(CHUNKED))
}

/// Parses Content-Length, accepting repeated values only when they all agree.
fn content_length(values: GetAll<'_, HeaderValue>) -> Option<u64> {
    let mut length = None;
    for item in values.iter().flat_map(|value| value.as_bytes().split(|b| *b == b',')) {
        let item = item.trim_ascii();
        if item.is_empty() || !item.iter().all(u8::is_ascii_digit) {
            return None;
        }

        let parsed = std::str::from_utf8(item).ok()?.parse::<u64>().ok()?;
        match length {
            Some(previous) if previous != parsed => return None,
            _ => length = Some(parsed),
        }
    }
    length
}
