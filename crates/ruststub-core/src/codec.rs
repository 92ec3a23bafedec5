//! Pluggable body and parameter codecs.
//!
//! The exchange facade never interprets payloads itself. Request bodies are
//! decoded through a [`BodyParser`], response bodies are encoded through a
//! [`BodyWriter`], and query strings / url-encoded forms go through a
//! [`ParamsParser`]. The defaults cover JSON, url-encoded forms, text and raw
//! bytes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// A decoded request body or a value to encode into a response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BodyValue {
    /// No payload. Encodes to the empty string.
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// A JSON document.
    Json(serde_json::Value),
    /// Url-encoded form fields, in wire order.
    Form(Vec<(String, String)>),
    /// Arbitrary bytes.
    Binary(Bytes),
}

impl BodyValue {
    /// Serialize any value into a [`BodyValue::Json`].
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, CodecError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Whether this is [`BodyValue::Empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Text view of the value, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON view of the value, if it is JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for BodyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for BodyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for BodyValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

impl From<Bytes> for BodyValue {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<serde_json::Value> for BodyValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<BodyValue>> From<Option<T>> for BodyValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Empty, Into::into)
    }
}

/// Errors raised while decoding or encoding bodies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The request body could not be decoded.
    #[error("failed to decode request body: {0}")]
    Decode(String),

    /// The response value could not be encoded.
    #[error("failed to encode response body: {0}")]
    Encode(String),
}

/// Decodes raw request bytes into a [`BodyValue`].
pub trait BodyParser: Send + Sync + 'static {
    /// Decode `raw`, using the request's `Content-Type` when present.
    fn parse(&self, raw: &Bytes, content_type: Option<&str>) -> Result<BodyValue, CodecError>;
}

/// Encodes a [`BodyValue`] onto a response output buffer.
pub trait BodyWriter: Send + Sync + 'static {
    /// Append the encoding of `value` to `out`.
    fn write(&self, value: &BodyValue, out: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// Parses query strings and url-encoded form bodies into name/value pairs.
pub trait ParamsParser: Send + Sync + 'static {
    /// Parse `input` (without a leading `?`).
    fn parse(&self, input: &str) -> Vec<(String, String)>;
}

/// Content-type driven body parser.
///
/// | Content type | Result |
/// |---|---|
/// | *(empty body)* | `Empty` |
/// | `application/json`, `*/*+json` | `Json` |
/// | `application/x-www-form-urlencoded` | `Form` |
/// | `text/*`, or no type and valid UTF-8 | `Text` |
/// | anything else | `Binary` |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBodyParser;

impl BodyParser for DefaultBodyParser {
    fn parse(&self, raw: &Bytes, content_type: Option<&str>) -> Result<BodyValue, CodecError> {
        if raw.is_empty() {
            return Ok(BodyValue::Empty);
        }

        let mime = content_type.and_then(|ct| ct.parse::<mime::Mime>().ok());
        match mime {
            Some(m) if m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON) => {
                serde_json::from_slice(raw)
                    .map(BodyValue::Json)
                    .map_err(|e| CodecError::Decode(e.to_string()))
            }
            Some(m) if m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED => {
                Ok(BodyValue::Form(
                    form_urlencoded::parse(raw)
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect(),
                ))
            }
            Some(m) if m.type_() == mime::TEXT => String::from_utf8(raw.to_vec())
                .map(BodyValue::Text)
                .map_err(|e| CodecError::Decode(e.to_string())),
            Some(_) => Ok(BodyValue::Binary(raw.clone())),
            None => Ok(std::str::from_utf8(raw).map_or_else(
                |_| BodyValue::Binary(raw.clone()),
                |s| BodyValue::Text(s.to_owned()),
            )),
        }
    }
}

/// Writes text and bytes verbatim, JSON compactly and forms url-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBodyWriter;

impl BodyWriter for DefaultBodyWriter {
    fn write(&self, value: &BodyValue, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match value {
            BodyValue::Empty => {}
            BodyValue::Text(s) => out.extend_from_slice(s.as_bytes()),
            BodyValue::Binary(b) => out.extend_from_slice(b),
            BodyValue::Json(v) => {
                serde_json::to_writer(&mut *out, v).map_err(|e| CodecError::Encode(e.to_string()))?;
            }
            BodyValue::Form(fields) => {
                let mut serializer = form_urlencoded::Serializer::new(String::new());
                for (name, value) in fields {
                    serializer.append_pair(name, value);
                }
                out.extend_from_slice(serializer.finish().as_bytes());
            }
        }
        Ok(())
    }
}

/// [`ParamsParser`] backed by `form_urlencoded`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlParamsParser;

impl ParamsParser for UrlParamsParser {
    fn parse(&self, input: &str) -> Vec<(String, String)> {
        form_urlencoded::parse(input.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

/// The set of codecs in effect for one request.
#[derive(Clone)]
pub struct Codecs {
    /// Request body decoder.
    pub body_parser: Arc<dyn BodyParser>,
    /// Response body encoder.
    pub body_writer: Arc<dyn BodyWriter>,
    /// Query / form parameter parser.
    pub params_parser: Arc<dyn ParamsParser>,
}

impl Default for Codecs {
    fn default() -> Self {
        Self {
            body_parser: Arc::new(DefaultBodyParser),
            body_writer: Arc::new(DefaultBodyWriter),
            params_parser: Arc::new(UrlParamsParser),
        }
    }
}

impl fmt::Debug for Codecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codecs").finish_non_exhaustive()
    }
}
