//! Transport-side response sinks.

use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use std::io;
use tokio::sync::oneshot;
use tracing::warn;

/// Where a worker writes the response for its current request.
///
/// Calls arrive in transport order: header mutations, then exactly one
/// `write_head`, then body writes. The sink is owned by the worker thread
/// for the duration of one request and `finish` is called once at the end.
pub trait ResponseSink: Send {
    /// Set (or overwrite) a response header. The value is raw bytes and may
    /// carry obs-text such as Latin-1.
    fn set_header(&mut self, name: &str, value: &[u8]);

    /// Commit the status line and the current header set.
    fn write_head(&mut self, status: u16);

    /// Write body bytes, returning how many were accepted.
    fn write_body(&mut self, data: &[u8]) -> io::Result<usize>;

    /// The response is complete.
    fn finish(self: Box<Self>) {}
}

/// Sink that assembles a complete hyper response in memory.
///
/// Body bytes past `limit` are refused, which shows up to the engine as a
/// short write.
#[derive(Debug)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    limit: usize,
}

impl BufferedResponse {
    pub fn new(limit: usize) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            limit,
        }
    }

    /// Committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Build the hyper response. An uncommitted response is a plain 200.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for BufferedResponse {
    fn set_header(&mut self, name: &str, value: &[u8]) {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                warn!("Skipping invalid response header name {:?}", name);
                return;
            }
        };
        let value = match HeaderValue::from_bytes(value) {
            Ok(value) => value,
            Err(_) => {
                warn!("Skipping invalid value for response header {}", name);
                return;
            }
        };
        self.headers.insert(name, value);
    }

    fn write_head(&mut self, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or_else(|_| {
            warn!(
                "Invalid status code {}, falling back to 500 Internal Server Error",
                status
            );
            StatusCode::INTERNAL_SERVER_ERROR
        });
        self.status = Some(status);
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.body.len());
        if room == 0 && !data.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("response body exceeds {} bytes", self.limit),
            ));
        }
        let accepted = data.len().min(room);
        self.body.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }
}

/// Buffered sink that hands the finished response to the connection task.
pub struct ChannelResponse {
    inner: BufferedResponse,
    tx: oneshot::Sender<Response<Full<Bytes>>>,
}

impl ChannelResponse {
    pub fn new(limit: usize) -> (Self, oneshot::Receiver<Response<Full<Bytes>>>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            inner: BufferedResponse::new(limit),
            tx,
        };
        (sink, rx)
    }
}

impl ResponseSink for ChannelResponse {
    fn set_header(&mut self, name: &str, value: &[u8]) {
        self.inner.set_header(name, value);
    }

    fn write_head(&mut self, status: u16) {
        self.inner.write_head(status);
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.write_body(data)
    }

    fn finish(self: Box<Self>) {
        let ChannelResponse { inner, tx } = *self;
        // The connection may already be gone.
        let _ = tx.send(inner.into_response());
    }
}
