//! Request and response shapes exchanged with the gateway.
//!
//! The wire format itself is handled by `hyper`; this module turns a
//! [`RequestDescriptor`] into a `hyper::Request` and a response's parts back
//! into plain data that outlives the connection.

use std::fmt;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, Response};

use crate::error::{Error, Result};

const AGENT: &str = concat!("kv-gateway-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method())
    }
}

/// Everything needed to issue one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub verb: Verb,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// A JSON POST, the shape of every gateway call.
    pub fn post<H: Into<String>, P: Into<String>, B: Into<String>>(
        host: H,
        port: u16,
        path: P,
        body: B,
    ) -> Self {
        Self {
            verb: Verb::Post,
            host: host.into(),
            port,
            path: path.into(),
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the request sent over an HTTP/1.1 connection to `host:port`.
    ///
    /// # Errors
    /// `Error::Write` when the path or an extra header is not valid HTTP.
    pub fn to_request(&self) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(self.verb.method())
            .uri(self.path.as_str())
            .header(HOST, format!("{}:{}", self.host, self.port))
            .header(USER_AGENT, AGENT)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, self.body.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::write(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::write(format!("invalid value for header {}: {}", name, e)))?;
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(Bytes::from(self.body.clone())))
            .map_err(|e| Error::write(format!("invalid request for {}: {}", self.path, e)))
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn from_response<B>(response: &Response<B>) -> Self {
        let status = response.status();
        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        }
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A fully received one-shot response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub head: ResponseHead,
    pub body: String,
}
