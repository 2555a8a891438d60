//! Response envelopes.
//!
//! A [`Response`] is the decoded `{code, data, message}` wrapper plus its
//! provenance: the raw payload, the originating [`Request`], and whether it was
//! served from the cache. The untyped form (`Response`, data as
//! `Option<serde_json::Value>`) travels through the interceptor chain; callers
//! receive `Response<T>` after [`Response::into_typed`].

use std::sync::Arc;

use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub mod code;
pub mod decode;

pub use code::Code;
pub use decode::{ParsingInterceptor, decode};

use crate::error::{Error, Result};
use crate::request::Request;

/// Field names locating the status code, payload and message in a raw envelope.
///
/// # Examples
///
/// ```
/// use courier::response::KeyMap;
///
/// let legacy = KeyMap::new("status", "result", "error_msg");
/// assert_eq!(legacy.code, "status");
/// assert_eq!(KeyMap::default().message, "msg");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMap {
    pub code: String,
    pub data: String,
    pub message: String,
}

impl KeyMap {
    pub fn new(code: impl Into<String>, data: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            data: data.into(),
            message: message.into(),
        }
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::new("code", "data", "msg")
    }
}

/// Sentinel payload for calls that expect no data.
///
/// Decoding into `Empty` always succeeds, whether or not the envelope carries a
/// data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Empty;

impl<'de> Deserialize<'de> for Empty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        IgnoredAny::deserialize(deserializer).map(|_| Empty)
    }
}

/// A decoded response envelope.
#[derive(Debug, Clone)]
pub struct Response<T = Option<Value>> {
    code: Code,
    data: T,
    message: Option<String>,
    raw: Bytes,
    request: Arc<Request>,
    from_cache: bool,
}

impl Response {
    /// An envelope holding only the raw transport payload, before the parsing
    /// stage has looked at it.
    pub(crate) fn unparsed(request: Arc<Request>, raw: Bytes) -> Self {
        Self {
            code: Code::Absent,
            data: None,
            message: None,
            raw,
            request,
            from_cache: false,
        }
    }

    pub(crate) fn new(
        request: Arc<Request>,
        raw: Bytes,
        code: Code,
        data: Option<Value>,
        message: Option<String>,
    ) -> Self {
        Self {
            code,
            data,
            message,
            raw,
            request,
            from_cache: false,
        }
    }

    /// Decodes the data field into `T`.
    ///
    /// A missing data field yields `T`'s `null` form when it has one ([`Empty`],
    /// `()`, `Option<_>`); otherwise it is [`Error::EmptyData`].
    pub fn into_typed<T>(self) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let raw = self.raw.clone();
        let data = match self.data.clone() {
            Some(value) => serde_json::from_value(value).map_err(|source| Error::DecodeFailed {
                source: Arc::new(source),
                raw,
            })?,
            None => T::deserialize(Value::Null).map_err(|_| Error::EmptyData)?,
        };
        Ok(self.map_data(|_| data))
    }
}

impl<T> Response<T> {
    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The payload exactly as the transport (or the cache) delivered it.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Re-attributes the envelope to `request`.
    #[must_use]
    pub(crate) fn for_request(mut self, request: Arc<Request>) -> Self {
        self.request = request;
        self
    }

    /// Marks the envelope as served from the cache.
    #[must_use]
    pub(crate) fn from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Produces a new envelope with the payload transformed by `f`.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            code: self.code,
            data: f(self.data),
            message: self.message,
            raw: self.raw,
            request: self.request,
            from_cache: self.from_cache,
        }
    }
}
