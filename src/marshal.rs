//! Header and environment marshalling.
//!
//! Every request produces two key-value lists: the raw request headers and a
//! small CGI-style environment. Both are encoded with the wire format from
//! `strand_sdk::kv` before being handed to the engine. Interpreting the key
//! names is entirely up to the engine.

use crate::http::Request;
use bytes::BytesMut;
use hyper::HeaderMap;
use strand_sdk::KeyValue;

/// Value of `SERVER_SOFTWARE`.
pub const SERVER_SOFTWARE: &str = concat!("strand/", env!("CARGO_PKG_VERSION"));

/// Headers projected into the environment, with their variable names.
const ENV_HEADERS: &[(&str, &str)] = &[
    ("host", "HTTP_HOST"),
    ("user-agent", "HTTP_USER_AGENT"),
    ("accept", "HTTP_ACCEPT"),
    ("cookie", "HTTP_COOKIE"),
    ("content-length", "HTTP_CONTENT_LENGTH"),
    ("content-type", "CONTENT_TYPE"),
];

/// Every header pair, repeated names kept as separate pairs.
///
/// Names are lower-case: hyper normalizes them on parse and `HeaderMap`
/// does not keep the client's spelling. Engines should compare header
/// names case-insensitively.
pub fn header_pairs(headers: &HeaderMap) -> Vec<KeyValue> {
    headers
        .iter()
        .map(|(name, value)| KeyValue::new(name.as_str(), value.as_bytes()))
        .collect()
}

/// CGI-style environment for `request`.
///
/// Allowlisted headers are projected using their last value; the rest is
/// synthesized from request metadata. `script_name` is the configured
/// handler path.
pub fn environment_pairs(request: &Request, script_name: &str) -> Vec<KeyValue> {
    let mut env = Vec::with_capacity(ENV_HEADERS.len() + 10);

    for (header, var) in ENV_HEADERS {
        if let Some(value) = request.headers.get_all(*header).iter().last() {
            env.push(KeyValue::new(var, value.as_bytes()));
        }
    }

    env.push(KeyValue::new("SERVER_SOFTWARE", SERVER_SOFTWARE));
    match request.remote_addr.split_once(':') {
        Some((addr, port)) => {
            env.push(KeyValue::new("REMOTE_ADDR", addr));
            env.push(KeyValue::new("REMOTE_PORT", port));
        }
        None => env.push(KeyValue::new("REMOTE_ADDR", &request.remote_addr)),
    }
    env.push(KeyValue::new("REQUEST_SCHEME", &request.scheme));
    env.push(KeyValue::new("SERVER_PROTOCOL", request.protocol()));
    env.push(KeyValue::new("REQUEST_METHOD", request.method.as_str()));
    env.push(KeyValue::new("QUERY_STRING", request.query()));
    env.push(KeyValue::new("REQUEST_URI", request.target()));
    env.push(KeyValue::new("SCRIPT_NAME", script_name));
    env
}

/// Encode both lists for `request` into the worker's reusable buffers.
pub fn marshal_into(
    request: &Request,
    script_name: &str,
    headers: &mut BytesMut,
    environment: &mut BytesMut,
) {
    headers.clear();
    environment.clear();
    strand_sdk::encode_into(headers, &header_pairs(&request.headers));
    strand_sdk::encode_into(environment, &environment_pairs(request, script_name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Method, Uri};

    fn sample_request() -> Request {
        Request::new(Method::POST, Uri::from_static("/app?debug=1"))
            .header("Host", "example.com")
            .header("Accept", "text/html")
            .header("Accept", "*/*")
            .header("Content-Type", "application/json")
            .header("X-Custom", "yes")
            .remote_addr("192.168.1.20:40000")
    }

    fn lookup<'a>(env: &'a [KeyValue], key: &str) -> Option<&'a [u8]> {
        env.iter()
            .find(|kv| kv.key == key.as_bytes())
            .map(|kv| kv.value.as_slice())
    }

    #[test]
    fn test_header_pairs_keep_duplicates() {
        let pairs = header_pairs(&sample_request().headers);
        assert_eq!(pairs.len(), 5);
        let accepts: Vec<_> = pairs
            .iter()
            .filter(|kv| kv.key == b"accept")
            .map(|kv| kv.value.clone())
            .collect();
        assert_eq!(accepts, vec![b"text/html".to_vec(), b"*/*".to_vec()]);
    }

    #[test]
    fn test_header_names_are_lower_case() {
        let pairs = header_pairs(&sample_request().headers);
        assert_eq!(lookup(&pairs, "content-type"), Some(&b"application/json"[..]));
        assert_eq!(lookup(&pairs, "x-custom"), Some(&b"yes"[..]));
        assert_eq!(lookup(&pairs, "Content-Type"), None);
    }

    #[test]
    fn test_environment_projection() {
        let env = environment_pairs(&sample_request(), "index");
        assert_eq!(lookup(&env, "HTTP_HOST"), Some(&b"example.com"[..]));
        assert_eq!(lookup(&env, "HTTP_ACCEPT"), Some(&b"*/*"[..]));
        assert_eq!(lookup(&env, "CONTENT_TYPE"), Some(&b"application/json"[..]));
        assert_eq!(lookup(&env, "HTTP_USER_AGENT"), None);
        assert_eq!(lookup(&env, "HTTP_X_CUSTOM"), None);
        assert_eq!(lookup(&env, "REMOTE_ADDR"), Some(&b"192.168.1.20"[..]));
        assert_eq!(lookup(&env, "REMOTE_PORT"), Some(&b"40000"[..]));
        assert_eq!(lookup(&env, "REQUEST_SCHEME"), Some(&b"http"[..]));
        assert_eq!(lookup(&env, "SERVER_PROTOCOL"), Some(&b"HTTP/1.1"[..]));
        assert_eq!(lookup(&env, "REQUEST_METHOD"), Some(&b"POST"[..]));
        assert_eq!(lookup(&env, "QUERY_STRING"), Some(&b"debug=1"[..]));
        assert_eq!(lookup(&env, "REQUEST_URI"), Some(&b"/app?debug=1"[..]));
        assert_eq!(lookup(&env, "SCRIPT_NAME"), Some(&b"index"[..]));
        assert_eq!(
            lookup(&env, "SERVER_SOFTWARE"),
            Some(SERVER_SOFTWARE.as_bytes())
        );
    }

    #[test]
    fn test_remote_addr_without_port() {
        let req = Request::new(Method::GET, Uri::from_static("/")).remote_addr("unix");
        let env = environment_pairs(&req, "index");
        assert_eq!(lookup(&env, "REMOTE_ADDR"), Some(&b"unix"[..]));
        assert_eq!(lookup(&env, "REMOTE_PORT"), None);
    }

    #[test]
    fn test_environment_is_stable() {
        let req = sample_request();
        assert_eq!(
            environment_pairs(&req, "index"),
            environment_pairs(&req, "index")
        );
    }

    #[test]
    fn test_marshal_into_reuses_buffers() {
        let mut headers = BytesMut::with_capacity(1024);
        let mut env = BytesMut::with_capacity(1024);
        marshal_into(&sample_request(), "index", &mut headers, &mut env);
        marshal_into(&sample_request(), "index", &mut headers, &mut env);

        let decoded = strand_sdk::decode(&headers).unwrap();
        assert_eq!(decoded, header_pairs(&sample_request().headers));
        let decoded = strand_sdk::decode(&env).unwrap();
        assert_eq!(decoded, environment_pairs(&sample_request(), "index"));
    }
}
