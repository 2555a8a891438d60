//! Envelope decoding and business validation: the parsing core stage.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::{Code, KeyMap, Response};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::request::Request;

/// Decodes a raw payload into an envelope and applies the request's
/// business-success predicate.
///
/// # Errors
///
/// - [`Error::MalformedPayload`]: not JSON, or not a JSON object.
/// - [`Error::TypeMismatch`]: the status code is an array or object.
/// - [`Error::ValidationFailed`]: the predicate rejected the code. This is
///   checked before anything looks at the data field.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use courier::request::{Method, Request};
/// use courier::response::{KeyMap, decode};
///
/// let request = Request::builder(Method::Get, "https://a.io", "/balance")
///     .success_when(|code| code.to_i64() == 0)
///     .build();
/// let raw = Bytes::from_static(br#"{"code": 7, "msg": "insufficient balance"}"#);
///
/// let err = decode(raw, request, &KeyMap::default()).unwrap_err();
/// assert_eq!(err.message(), Some("insufficient balance"));
/// ```
pub fn decode(raw: Bytes, request: Arc<Request>, key_map: &KeyMap) -> Result<Response> {
    let value: Value = serde_json::from_slice(&raw).map_err(|e| Error::MalformedPayload {
        reason: e.to_string(),
        raw: raw.clone(),
    })?;

    let Value::Object(mut fields) = value else {
        return Err(Error::MalformedPayload {
            reason: "envelope is not a JSON object".into(),
            raw,
        });
    };

    let code = Code::from_json(fields.get(&key_map.code))?;
    let message = match fields.remove(&key_map.message) {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message),
        Some(other) => Some(other.to_string()),
    };
    let data = match fields.remove(&key_map.data) {
        None | Some(Value::Null) => None,
        Some(data) => Some(data),
    };

    let response = Response::new(Arc::clone(&request), raw, code, data, message);
    if !request.is_success(response.code()) {
        debug!(
            url = %request.url(),
            code = %response.code(),
            message = response.message().unwrap_or_default(),
            "business validation failed"
        );
        return Err(Error::ValidationFailed {
            request,
            response: Box::new(response),
        });
    }

    Ok(response)
}

/// Core stage that turns the transport's raw payload into a validated envelope.
///
/// The request's own [`KeyMap`] takes precedence over the client default.
pub struct ParsingInterceptor {
    key_map: KeyMap,
}

impl ParsingInterceptor {
    pub fn new(key_map: KeyMap) -> Self {
        Self { key_map }
    }
}

impl Interceptor for ParsingInterceptor {
    fn name(&self) -> &str {
        "parsing"
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        let request = Arc::clone(ctx.request());
        let key_map = request.key_map().unwrap_or(&self.key_map).clone();

        Box::pin(async move {
            let unparsed = next.run(ctx).await?;
            decode(unparsed.raw().clone(), request, &key_map)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use serde_json::json;

    fn request_expecting_zero() -> Arc<Request> {
        Request::builder(Method::Get, "https://a.io", "/")
            .success_when(|code| code.to_i64() == 0)
            .build()
    }

    fn raw(value: Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    #[test]
    fn decodes_a_successful_envelope() {
        let response = decode(
            raw(json!({ "code": "0", "data": { "id": 1 }, "msg": "ok" })),
            request_expecting_zero(),
            &KeyMap::default(),
        )
        .unwrap();

        assert_eq!(response.code(), &Code::Str("0".into()));
        assert_eq!(response.data(), &Some(json!({ "id": 1 })));
        assert_eq!(response.message(), Some("ok"));
        assert!(!response.is_from_cache());
    }

    #[test]
    fn validation_failure_carries_the_envelope() {
        let err = decode(
            raw(json!({ "code": 7, "msg": "insufficient balance" })),
            request_expecting_zero(),
            &KeyMap::default(),
        )
        .unwrap_err();

        match err {
            Error::ValidationFailed { response, .. } => {
                assert_eq!(response.message(), Some("insufficient balance"));
                assert_eq!(response.code(), &Code::Int(7));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn validation_is_checked_even_without_data() {
        let err = decode(
            raw(json!({ "code": 1 })),
            request_expecting_zero(),
            &KeyMap::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }

    #[test]
    fn honours_custom_key_maps() {
        let key_map = KeyMap::new("status", "result", "error");
        let response = decode(
            raw(json!({ "status": 0, "result": [1, 2], "error": null })),
            request_expecting_zero(),
            &key_map,
        )
        .unwrap();
        assert_eq!(response.data(), &Some(json!([1, 2])));
        assert_eq!(response.message(), None);
    }

    #[test]
    fn non_json_is_malformed() {
        let err = decode(
            Bytes::from_static(b"<html>"),
            request_expecting_zero(),
            &KeyMap::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert_eq!(err.raw_payload().unwrap().as_ref(), b"<html>");
    }

    #[test]
    fn non_object_is_malformed() {
        let err = decode(raw(json!([1])), request_expecting_zero(), &KeyMap::default())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn structured_code_is_a_type_mismatch() {
        let err = decode(
            raw(json!({ "code": { "value": 0 } })),
            request_expecting_zero(),
            &KeyMap::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
