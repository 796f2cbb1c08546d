//! Request and response values exchanged with the mock layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// HTTP method an interceptor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    /// Matches every request method
    All,
}

impl Method {
    /// Methods the registry is able to manage.
    pub const STANDARD: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
    ];

    /// Whether this is one of the five manageable methods.
    pub fn is_standard(&self) -> bool {
        Self::STANDARD.contains(self)
    }

    /// Upper-case form, as shown in handler keys and log entries.
    pub fn as_upper(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::All => "ALL",
        }
    }

    /// Check a raw request method against this binding.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            Method::All => true,
            m => m.as_upper().eq_ignore_ascii_case(method),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            "patch" => Ok(Method::Patch),
            "head" => Ok(Method::Head),
            "options" => Ok(Method::Options),
            "all" | "*" => Ok(Method::All),
            other => Err(format!("unsupported method: {}", other)),
        }
    }
}

/// An intercepted request.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// Request method as sent by the client
    pub method: String,
    /// Absolute URL or origin-relative path, including any query string
    pub url: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Raw request body
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    /// URL without its query string or fragment.
    pub fn url_without_query(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        &self.url[..end]
    }

    /// Path component of the URL (scheme and authority stripped).
    pub fn path(&self) -> &str {
        let url = self.url_without_query();
        match url.find("://") {
            Some(scheme_end) => {
                let rest = &url[scheme_end + 3..];
                match rest.find('/') {
                    Some(slash) => &rest[slash..],
                    None => "/",
                }
            }
            None => url,
        }
    }

    /// Raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        let start = self.url.find('?')? + 1;
        let end = self.url[start..]
            .find('#')
            .map(|i| start + i)
            .unwrap_or(self.url.len());
        Some(&self.url[start..end])
    }

    /// Decoded query parameters.
    pub fn query_params(&self) -> HashMap<String, String> {
        parse_query_string(self.query_string().unwrap_or(""))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response produced by an interceptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body (empty means no body)
    pub body: Vec<u8>,
}

impl MockResponse {
    /// Response with the given status and no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::empty(status)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    /// Plain text response.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::empty(status)
            .with_header("Content-Type", "text/plain")
            .with_body(text.into())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.trim_start_matches('?').split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Percent-decoding with `+` as space.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
