//! HTTP-facing types: the inbound request, response sinks and the access log.

mod access_log;
mod request;
mod response;

pub use access_log::AccessLogEntry;
pub use request::{BodyReader, Request};
pub use response::{BufferedResponse, ChannelResponse, ResponseSink};
