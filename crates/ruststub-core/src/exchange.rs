//! The request/response pair seen by every handler.
//!
//! Handlers never touch hyper types. A [`Request`] is built from the
//! request head and the fully collected body; a [`Response`] accumulates
//! status, headers and encoded body bytes until the pipeline finishes.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::auth::Principal;
use crate::codec::{BodyValue, BodyWriter, CodecError, Codecs, ParamsParser};
use crate::route::RouteMatch;

/// Inbound request facade.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    raw_body: Bytes,
    decoded: Option<BodyValue>,
    route_match: RouteMatch,
    principal: Option<Principal>,
    remote_addr: Option<SocketAddr>,
    codecs: Codecs,
}

impl Request {
    /// Build a request from its head and collected body.
    pub fn new(parts: http::request::Parts, body: Bytes, codecs: Codecs) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            raw_body: body,
            decoded: None,
            route_match: RouteMatch::none(),
            principal: None,
            remote_addr: None,
            codecs,
        }
    }

    /// Attach the authenticated principal.
    #[must_use]
    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    /// Attach the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Path component, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, without the `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Content-Type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// The match of the route currently handling the request.
    ///
    /// Unsuccessful while the global pipeline runs.
    #[must_use]
    pub fn route_match(&self) -> &RouteMatch {
        &self.route_match
    }

    pub(crate) fn set_route_match(&mut self, matched: RouteMatch) {
        self.route_match = matched;
    }

    /// Positional capture `index` of the matched route.
    #[must_use]
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.route_match.group(index)
    }

    /// Named capture `name` of the matched route.
    #[must_use]
    pub fn named(&self, name: &str) -> Option<&str> {
        self.route_match.name(name)
    }

    /// Undecoded body bytes.
    #[must_use]
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// Body decoded through the configured parser.
    ///
    /// Decoding happens on first access; later calls return the cached value.
    pub fn body(&mut self) -> Result<&BodyValue, CodecError> {
        let value = match self.decoded.take() {
            Some(value) => value,
            None => self
                .codecs
                .body_parser
                .parse(&self.raw_body, self.content_type())?,
        };
        Ok(self.decoded.insert(value))
    }

    /// Body as UTF-8 text, regardless of content type.
    pub fn body_text(&self) -> Result<&str, CodecError> {
        std::str::from_utf8(&self.raw_body).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Query parameters followed by url-encoded form fields, in wire order.
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        let parser: &dyn ParamsParser = self.codecs.params_parser.as_ref();
        let mut params = self.query().map(|q| parser.parse(q)).unwrap_or_default();

        let is_form = self
            .content_type()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|m| {
                m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED
            });
        if is_form {
            if let Ok(form) = std::str::from_utf8(&self.raw_body) {
                params.extend(parser.parse(form));
            }
        }
        params
    }

    /// First parameter called `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.params()
            .into_iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Identity established by Basic authentication.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Peer address of the connection.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("body_len", &self.raw_body.len())
            .field("route_match", &self.route_match)
            .field("principal", &self.principal)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Outbound response facade.
///
/// Status defaults to 200. Each [`set_body`](Self::set_body) call appends
/// its encoding to the output immediately; there is no reset.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    output: Vec<u8>,
    aborted: bool,
    writer: Arc<dyn BodyWriter>,
}

impl Response {
    /// An empty 200 response encoding bodies with `writer`.
    pub fn new(writer: Arc<dyn BodyWriter>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            output: Vec::new(),
            aborted: false,
            writer,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status. The last write wins.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set header `name`, replacing earlier values.
    pub fn set_header<K, V>(&mut self, name: K, value: V) -> Result<(), http::Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(name).map_err(Into::into)?;
        let value = HeaderValue::try_from(value).map_err(Into::into)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Encode `value` with the configured writer and append it to the output.
    ///
    /// `None` and [`BodyValue::Empty`] append nothing.
    pub fn set_body(&mut self, value: impl Into<BodyValue>) -> Result<(), CodecError> {
        let value = value.into();
        self.writer.write(&value, &mut self.output)
    }

    /// Bytes written so far.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        &self.output
    }

    /// Discard everything written so far.
    pub fn clear_body(&mut self) {
        self.output.clear();
    }

    /// Drop the connection instead of sending a response.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Whether [`abort`](Self::abort) was called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Split into status, headers and body bytes.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.output)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.output.len())
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

/// One request and the response being built for it.
#[derive(Debug)]
pub struct Exchange {
    /// The inbound request.
    pub request: Request,
    /// The response under construction.
    pub response: Response,
}

impl Exchange {
    /// Pair a request with a fresh response using the same codecs.
    pub fn new(parts: http::request::Parts, body: Bytes, codecs: Codecs) -> Self {
        let response = Response::new(Arc::clone(&codecs.body_writer));
        Self {
            request: Request::new(parts, body, codecs),
            response,
        }
    }

    /// Build an exchange from a buffered `http::Request` with default codecs.
    pub fn from_request(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts, body, Codecs::default())
    }

    #[cfg(test)]
    pub(crate) fn test(method: &str, uri: &str) -> Self {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap();
        Self::from_request(request)
    }
}
