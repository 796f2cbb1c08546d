//! URL matching for interceptors.
//!
//! Interceptors are bound either to a literal path pattern (`/users/:id`,
//! `/users/{id}`, `/files/*`, or an absolute `http://host/path` pattern) or to
//! a raw regular expression. Only literal patterns can be managed by the
//! registry; regex-bound interceptors are kept as passthrough traffic.

use crate::http::MockRequest;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// Context captured during matching.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Path parameters extracted from the pattern
    pub path_params: HashMap<String, String>,
    /// Query parameters of the request
    pub query_params: HashMap<String, String>,
}

/// What an interceptor's URL is bound to.
#[derive(Clone)]
pub enum RoutePath {
    /// A literal path pattern string
    Literal(UrlPattern),
    /// A regex "pattern object", matched against the full URL
    Regex(Regex),
}

impl RoutePath {
    /// Literal pattern from a string.
    pub fn literal(pattern: &str) -> Self {
        RoutePath::Literal(UrlPattern::parse(pattern))
    }

    /// The literal pattern source, if this is a literal path.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            RoutePath::Literal(p) => Some(p.source()),
            RoutePath::Regex(_) => None,
        }
    }

    /// Match a request, returning the captured context on success.
    pub fn matches(&self, request: &MockRequest) -> Option<MatchContext> {
        let path_params = match self {
            RoutePath::Literal(pattern) => pattern.matches(request)?,
            RoutePath::Regex(regex) => {
                let captures = regex.captures(request.url_without_query())?;
                let mut params = HashMap::new();
                for name in regex.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        params.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                params
            }
        };

        Some(MatchContext {
            path_params,
            query_params: request.query_params(),
        })
    }
}

impl fmt::Debug for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePath::Literal(p) => write!(f, "Literal({:?})", p.source()),
            RoutePath::Regex(r) => write!(f, "Regex({:?})", r.as_str()),
        }
    }
}

impl From<&str> for RoutePath {
    fn from(pattern: &str) -> Self {
        RoutePath::literal(pattern)
    }
}

impl From<String> for RoutePath {
    fn from(pattern: String) -> Self {
        RoutePath::literal(&pattern)
    }
}

impl From<Regex> for RoutePath {
    fn from(regex: Regex) -> Self {
        RoutePath::Regex(regex)
    }
}

/// A compiled literal URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    absolute: bool,
    regex: Option<Regex>,
    params: Vec<String>,
}

enum PatternSegment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl UrlPattern {
    /// Parse a pattern such as `/users/:id`, `/users/{id}/posts` or `/static/*`.
    pub fn parse(pattern: &str) -> Self {
        let segments = Self::segments(pattern);
        let mut expr = String::from("^");
        let mut params = Vec::new();

        for segment in &segments {
            match segment {
                PatternSegment::Literal(lit) => expr.push_str(&regex::escape(lit)),
                PatternSegment::Param(name) => {
                    params.push(name.clone());
                    expr.push_str("([^/]+)");
                }
                PatternSegment::Wildcard => expr.push_str(".*"),
            }
        }
        if !pattern.ends_with('/') && !pattern.ends_with('*') {
            expr.push_str("/?");
        }
        expr.push('$');

        // An empty pattern never matches, nor does one past the regex size limit.
        let regex = if pattern.is_empty() {
            None
        } else {
            Regex::new(&expr).ok()
        };

        Self {
            source: pattern.to_string(),
            absolute: pattern.contains("://"),
            regex,
            params,
        }
    }

    fn segments(pattern: &str) -> Vec<PatternSegment> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if closed && !name.is_empty() {
                        if !current.is_empty() {
                            segments.push(PatternSegment::Literal(std::mem::take(&mut current)));
                        }
                        segments.push(PatternSegment::Param(name));
                    } else {
                        current.push('{');
                        current.push_str(&name);
                    }
                }
                // `:` starts a parameter only at the beginning of a path segment,
                // so `http://host:8080` stays literal.
                ':' if current.ends_with('/')
                    && chars.peek().is_some_and(|c| c.is_alphanumeric() || *c == '_') =>
                {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            name.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    segments.push(PatternSegment::Literal(std::mem::take(&mut current)));
                    segments.push(PatternSegment::Param(name));
                }
                '*' => {
                    if !current.is_empty() {
                        segments.push(PatternSegment::Literal(std::mem::take(&mut current)));
                    }
                    segments.push(PatternSegment::Wildcard);
                }
                c => current.push(c),
            }
        }

        if !current.is_empty() {
            segments.push(PatternSegment::Literal(current));
        }

        segments
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match against a request, returning path parameters on success.
    pub fn matches(&self, request: &MockRequest) -> Option<HashMap<String, String>> {
        let target = if self.absolute {
            request.url_without_query()
        } else {
            request.path()
        };

        let captures = self.regex.as_ref()?.captures(target)?;
        let params = self
            .params
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                captures
                    .get(i + 1)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();

        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, url: &str) -> Option<HashMap<String, String>> {
        UrlPattern::parse(pattern).matches(&MockRequest::get(url))
    }

    #[test]
    fn test_exact_path_matching() {
        assert!(matches("/api/users", "/api/users").is_some());
        assert!(matches("/api/users", "/api/users/").is_some());
        assert!(matches("/api/users", "/api/users?page=2").is_some());
        assert!(matches("/api/users", "/api/posts").is_none());
        assert!(matches("/api/users", "/api/users/1").is_none());
    }

    #[test]
    fn test_colon_params() {
        let params = matches("/users/:id/posts/:postId", "/users/7/posts/42").unwrap();
        assert_eq!(params.get("id"), Some(&"7".to_string()));
        assert_eq!(params.get("postId"), Some(&"42".to_string()));

        assert!(matches("/users/:id", "/users/").is_none());
    }

    #[test]
    fn test_brace_params() {
        let params = matches("/users/{id}", "/users/123").unwrap();
        assert_eq!(params.get("id"), Some(&"123".to_string()));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        assert!(matches("", "/").is_none());
        assert!(matches("", "").is_none());
    }

    #[test]
    fn test_wildcard() {
        assert!(matches("/static/*", "/static/css/site.css").is_some());
        assert!(matches("/static/*", "/other").is_none());
    }

    #[test]
    fn test_absolute_pattern_keeps_port() {
        let pattern = "http://localhost:8080/api/:name";
        let params = matches(pattern, "http://localhost:8080/api/status").unwrap();
        assert_eq!(params.get("name"), Some(&"status".to_string()));
        assert!(matches(pattern, "http://localhost:9090/api/status").is_none());
    }

    #[test]
    fn test_relative_pattern_ignores_origin() {
        assert!(matches("/api/users", "http://example.com/api/users").is_some());
    }

    #[test]
    fn test_regex_route() {
        let route = RoutePath::from(Regex::new(r"/api/items/(?P<id>\d+)$").unwrap());
        assert!(route.as_literal().is_none());

        let ctx = route
            .matches(&MockRequest::get("/api/items/99?verbose=1"))
            .unwrap();
        assert_eq!(ctx.path_params.get("id"), Some(&"99".to_string()));
        assert_eq!(ctx.query_params.get("verbose"), Some(&"1".to_string()));

        assert!(route.matches(&MockRequest::get("/api/items/abc")).is_none());
    }
}
