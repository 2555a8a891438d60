//! Request descriptors.
//!
//! A [`Request`] is the immutable description of one logical call: where it
//! goes, what it carries, and which cross-cutting behaviour it wants (caching,
//! business validation, deduplication). Application code builds it once with
//! [`Request::builder`] and hands the resulting `Arc<Request>` to a
//! [`Client`](crate::Client).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

pub mod headers;
pub mod params;

pub use headers::Headers;
pub use params::Parameters;

use crate::response::{Code, KeyMap, Response};

/// Decides whether a decoded status code means business success.
pub type SuccessPredicate = Arc<dyn Fn(&Code) -> bool + Send + Sync>;

/// Decides whether a decoded response may be written to the cache.
pub type CachePredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

type NamePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Verb of a request. Part of every fingerprint and cache key.
///
/// ```
/// use courier::request::Method;
///
/// assert_eq!("patch".parse::<Method>(), Ok(Method::Patch));
/// assert_eq!(Method::Custom("PURGE".into()).to_string(), "PURGE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(verb) => verb,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            _ => Self::Custom(s.to_owned()),
        })
    }
}

/// Selects which headers and parameters take part in a fingerprint or cache key.
///
/// Volatile fields (timestamps, nonces, short-lived tokens) should be dropped so
/// that requests differing only in those fields are treated as the same request.
///
/// # Examples
///
/// ```
/// use courier::request::FieldFilter;
///
/// let filter = FieldFilter::excluding(["Authorization", "timestamp"]);
/// assert!(!filter.keeps_header("authorization"));
/// assert!(!filter.keeps_param("timestamp"));
/// assert!(filter.keeps_param("page"));
/// ```
#[derive(Clone)]
pub struct FieldFilter {
    headers: NamePredicate,
    params: NamePredicate,
}

impl FieldFilter {
    /// A filter that keeps every header and parameter.
    pub fn keep_all() -> Self {
        Self {
            headers: Arc::new(|_| true),
            params: Arc::new(|_| true),
        }
    }

    /// A filter with separate predicates for header names and parameter names.
    pub fn new<H, P>(headers: H, params: P) -> Self
    where
        H: Fn(&str) -> bool + Send + Sync + 'static,
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            headers: Arc::new(headers),
            params: Arc::new(params),
        }
    }

    /// A filter that drops the named fields (case-insensitive) from both headers
    /// and parameters.
    pub fn excluding<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Arc<[String]> = names.into_iter().map(Into::into).collect();
        let for_params = Arc::clone(&names);
        Self::new(
            move |name| !names.iter().any(|n| n.eq_ignore_ascii_case(name)),
            move |name| !for_params.iter().any(|n| n.eq_ignore_ascii_case(name)),
        )
    }

    pub fn keeps_header(&self, name: &str) -> bool {
        (self.headers)(name)
    }

    pub fn keeps_param(&self, name: &str) -> bool {
        (self.params)(name)
    }
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::keep_all()
    }
}

impl fmt::Debug for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldFilter").finish_non_exhaustive()
    }
}

/// Caching behaviour requested by a [`Request`].
///
/// A response is written only when the TTL is strictly positive and the
/// eligibility predicate accepts it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use courier::request::{CacheConfig, FieldFilter};
///
/// let config = CacheConfig::new(Duration::from_secs(30 * 24 * 3600))
///     .filter(FieldFilter::excluding(["timestamp"]))
///     .when(|response| response.message().is_none());
/// assert!(config.is_enabled());
/// ```
#[derive(Clone)]
pub struct CacheConfig {
    ttl: Duration,
    filter: FieldFilter,
    eligible: CachePredicate,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            filter: FieldFilter::keep_all(),
            eligible: Arc::new(|_| true),
        }
    }

    /// Sets the filter applied when deriving the cache key.
    #[must_use]
    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the cache-eligibility predicate.
    #[must_use]
    pub fn when<F>(mut self, eligible: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.eligible = Arc::new(eligible);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_filter(&self) -> &FieldFilter {
        &self.filter
    }

    /// `true` when the TTL allows anything to be stored.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// `true` when `response` may be written under this configuration.
    pub fn accepts(&self, response: &Response) -> bool {
        self.is_enabled() && (self.eligible)(response)
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// An immutable request descriptor.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use courier::request::{Method, Request};
///
/// let request = Request::builder(Method::Get, "https://api.example.com/", "/v1/users?page=2")
///     .header("Accept", "application/json")
///     .param("size", 20)
///     .timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(request.url(), "https://api.example.com/v1/users");
/// assert_eq!(request.params().get("page"), Some(&serde_json::json!("2")));
/// assert_eq!(request.params().get("size"), Some(&serde_json::json!(20)));
/// ```
pub struct Request {
    method: Method,
    base_url: String,
    path: String,
    headers: Headers,
    params: Parameters,
    timeout: Option<Duration>,
    cache: Option<CacheConfig>,
    success: Option<SuccessPredicate>,
    dedup_filter: FieldFilter,
    deduplicate: bool,
    key_map: Option<KeyMap>,
}

impl Request {
    /// Starts building a request. A `?query` suffix on `path` is split off and
    /// merged into the parameters.
    pub fn builder(
        method: Method,
        base_url: impl Into<String>,
        path: impl AsRef<str>,
    ) -> RequestBuilder {
        let raw_path = path.as_ref();
        let (path, params) = match raw_path.find('?') {
            Some(pos) => (
                raw_path[..pos].to_owned(),
                parse_query_string(&raw_path[pos + 1..]),
            ),
            None => (raw_path.to_owned(), Parameters::new()),
        };

        RequestBuilder {
            inner: Request {
                method,
                base_url: base_url.into(),
                path,
                headers: Headers::new(),
                params,
                timeout: None,
                cache: None,
                success: None,
                dedup_filter: FieldFilter::keep_all(),
                deduplicate: true,
                key_map: None,
            },
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The base address and path joined with exactly one `/`.
    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.path)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The per-request timeout, if one was set; the client default applies otherwise.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cache(&self) -> Option<&CacheConfig> {
        self.cache.as_ref()
    }

    pub fn dedup_filter(&self) -> &FieldFilter {
        &self.dedup_filter
    }

    /// Whether this request allows sharing an in-flight execution.
    pub fn deduplicate(&self) -> bool {
        self.deduplicate
    }

    pub fn key_map(&self) -> Option<&KeyMap> {
        self.key_map.as_ref()
    }

    /// Applies the business-success predicate. Requests without one accept every code.
    pub fn is_success(&self, code: &Code) -> bool {
        self.success.as_ref().is_none_or(|predicate| predicate(code))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url())
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("cache", &self.cache)
            .field("deduplicate", &self.deduplicate)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder {
    inner: Request,
}

impl RequestBuilder {
    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.append(name, value);
        self
    }

    /// Sets a parameter, replacing any previous value for the key.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inner.params.insert(key, value);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.inner.cache = Some(cache);
        self
    }

    /// Sets the business-success predicate applied to the decoded status code.
    #[must_use]
    pub fn success_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Code) -> bool + Send + Sync + 'static,
    {
        self.inner.success = Some(Arc::new(predicate));
        self
    }

    /// Sets the filter applied when fingerprinting for deduplication.
    #[must_use]
    pub fn dedup_filter(mut self, filter: FieldFilter) -> Self {
        self.inner.dedup_filter = filter;
        self
    }

    #[must_use]
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.inner.deduplicate = enabled;
        self
    }

    /// Overrides the client's decoding key-map for this request.
    #[must_use]
    pub fn key_map(mut self, key_map: KeyMap) -> Self {
        self.inner.key_map = Some(key_map);
        self
    }

    pub fn build(self) -> Arc<Request> {
        Arc::new(self.inner)
    }
}

/// Joins a base address and a path with exactly one `/` between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.trim_end_matches('/').to_owned();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Parses a URL query string (`key=value&key2=value2`) into [`Parameters`].
///
/// Keys and values have `+` decoded as a space; values are kept as strings.
fn parse_query_string(query: &str) -> Parameters {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, Value::String(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_joins_with_single_slash() {
        assert_eq!(join_url("https://a.io/", "/v1/x"), "https://a.io/v1/x");
        assert_eq!(join_url("https://a.io", "v1/x"), "https://a.io/v1/x");
        assert_eq!(join_url("https://a.io/", ""), "https://a.io");
    }

    #[test]
    fn query_is_merged_into_params() {
        let req = Request::builder(Method::Get, "https://a.io", "/search?q=rust+lang&page=2")
            .param("page", 3)
            .build();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.params().get("q"), Some(&json!("rust lang")));
        assert_eq!(req.params().get("page"), Some(&json!(3)));
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(
            "PURGE".parse::<Method>().unwrap(),
            Method::Custom("PURGE".into())
        );
    }

    #[test]
    fn success_defaults_to_accepting_every_code() {
        let req = Request::builder(Method::Get, "https://a.io", "/").build();
        assert!(req.is_success(&Code::Int(500)));

        let strict = Request::builder(Method::Get, "https://a.io", "/")
            .success_when(|code| code.to_i64() == 0)
            .build();
        assert!(strict.is_success(&Code::Str("0".into())));
        assert!(!strict.is_success(&Code::Int(7)));
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let config = CacheConfig::new(Duration::ZERO);
        assert!(!config.is_enabled());
    }
}
