//! Parsing of raw status/header lines emitted by the engine.
//!
//! Engines pass lines such as:
//!
//! ```text
//! HTTP/1.1 200 OK
//! Content-Type: text/html; charset=UTF-8
//! X-Powered-By: engine/1.0
//! ```
//!
//! Lines are bytes. Reason phrases and header values may carry obs-text
//! (Latin-1 and the like); only the status code and the header name have
//! to be ASCII.

use super::pending::FAILURE_STATUS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolLine<'a> {
    /// `HTTP/<version> <code> <reason>`; out-of-range or unparsable codes are 500.
    Status(u16),
    /// `<name>: <value>`.
    Header { name: &'a str, value: &'a [u8] },
    /// Anything else.
    Other,
}

pub fn parse_line(line: &[u8]) -> ProtocolLine<'_> {
    let (first, rest) = match line.iter().position(|&b| b == b' ') {
        Some(at) => (&line[..at], &line[at + 1..]),
        None => (line, &b""[..]),
    };

    if first.starts_with(b"HTTP/") {
        let code = rest.split(|&b| b == b' ').next().unwrap_or_default();
        return ProtocolLine::Status(coerce_status(code));
    }

    match first.strip_suffix(b":").and_then(header_name) {
        Some(name) => ProtocolLine::Header { name, value: rest },
        None => ProtocolLine::Other,
    }
}

/// A non-empty RFC 9110 token.
fn header_name(name: &[u8]) -> Option<&str> {
    if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
        return None;
    }
    std::str::from_utf8(name).ok()
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn coerce_status(code: &[u8]) -> u16 {
    match std::str::from_utf8(code).map(str::parse::<u16>) {
        Ok(Ok(code)) if (100..600).contains(&code) => code,
        _ => FAILURE_STATUS,
    }
}
