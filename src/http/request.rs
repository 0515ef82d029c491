//! Inbound request as handed to the pool by the HTTP front end.

use bytes::{Buf, Bytes};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Uri, Version};
use std::fmt;
use std::io::{self, Read};
use tracing::warn;

/// Non-seekable request body, consumed front to back.
pub type BodyReader = Box<dyn Read + Send>;

/// An inbound HTTP request.
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Request target as received (path and query).
    pub uri: Uri,
    /// Protocol version.
    pub version: Version,
    /// Header multimap; repeated names keep every value.
    pub headers: HeaderMap,
    /// Peer address as `host:port`.
    pub remote_addr: String,
    /// `http` or `https`.
    pub scheme: String,
    body: BodyReader,
}

impl Request {
    /// Create a request with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: String::new(),
            scheme: "http".to_string(),
            body: Box::new(io::empty()),
        }
    }

    /// Append a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!("Skipping invalid request header {:?}", name),
        }
        self
    }

    /// Set the peer address.
    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }

    /// Set the protocol version.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the request body from buffered bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Box::new(body.into().reader());
        self
    }

    /// Set the request body from an arbitrary reader.
    pub fn body_reader(mut self, body: BodyReader) -> Self {
        self.body = body;
        self
    }

    /// Take the body out of the request, leaving an empty one behind.
    pub fn take_body(&mut self) -> BodyReader {
        std::mem::replace(&mut self.body, Box::new(io::empty()))
    }

    /// The raw request target (`/path?query`).
    pub fn target(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// The raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Protocol name such as `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2.0",
            Version::HTTP_3 => "HTTP/3.0",
            _ => "HTTP/1.1",
        }
    }

    /// Protocol version encoded as `major * 1000 + minor`.
    pub fn protocol_number(&self) -> i32 {
        match self.version {
            Version::HTTP_09 => 9,
            Version::HTTP_10 => 1000,
            Version::HTTP_2 => 2000,
            Version::HTTP_3 => 3000,
            _ => 1001,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("remote_addr", &self.remote_addr)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}
