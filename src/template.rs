//! Template engine for dynamic scenario responses.
//!
//! Uses Handlebars for template rendering with request context.

use crate::producer::RequestContext;
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::collections::HashMap;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Path parameters from URL template matching
    pub path: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Full request URL
    pub url: String,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        // Register custom helpers
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Responses are JSON or plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against an intercepted request.
    pub fn render(
        &self,
        template: &str,
        ctx: &RequestContext,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars
            .render_template(template, &TemplateContext::from_request(ctx))
    }

    /// Render a JSON value with templates in string fields.
    pub fn render_json(
        &self,
        json: &serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        self.render_json_value(json, &TemplateContext::from_request(ctx))
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        match value {
            serde_json::Value::String(s) => {
                // Check if it contains template syntax
                if s.contains("{{") {
                    let rendered = self.handlebars.render_template(s, ctx)?;
                    Ok(serde_json::Value::String(rendered))
                } else {
                    Ok(value.clone())
                }
            }
            serde_json::Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> = arr
                    .iter()
                    .map(|v| self.render_json_value(v, ctx))
                    .collect();
                Ok(serde_json::Value::Array(rendered?))
            }
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl TemplateContext {
    fn from_request(ctx: &RequestContext) -> Self {
        let request = &ctx.request;
        let body = std::str::from_utf8(&request.body)
            .ok()
            .filter(|s| !s.is_empty())
            .map(String::from);
        let json = body.as_ref().and_then(|s| serde_json::from_str(s).ok());

        Self {
            path: ctx.path_params.clone(),
            query: ctx.query_params.clone(),
            headers: request.headers.clone(),
            method: request.method.clone(),
            request_path: request.path().to_string(),
            url: request.url.clone(),
            body,
            json,
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

type Json = serde_json::Value;

handlebars_helper!(upper_helper: |s: str| s.to_uppercase());
handlebars_helper!(lower_helper: |s: str| s.to_lowercase());
handlebars_helper!(json_helper: |value: Json| {
    serde_json::to_string_pretty(value).unwrap_or_default()
});
handlebars_helper!(default_helper: |value: Json, fallback: str| match value {
    Json::Null => Json::String(fallback.to_string()),
    Json::String(s) if s.is_empty() => Json::String(fallback.to_string()),
    other => other.clone(),
});

/// `{{uuid}}`: random version 4 UUID.
fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    out.write(&format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))?;
    Ok(())
}

/// `{{now "<strftime>"}}`: current UTC time, RFC 3339 with millis by default.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    out.write(&chrono::Utc::now().format(format).to_string())?;
    Ok(())
}

/// `{{random min max}}`: inclusive random integer, 0..=100 by default.
fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let bound = |i: usize, fallback: i64| {
        h.param(i)
            .and_then(|v| v.value().as_i64())
            .unwrap_or(fallback)
    };
    let (min, max) = (bound(0, 0), bound(1, 100));
    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };

    out.write(&value.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockRequest;

    fn ctx(request: MockRequest) -> RequestContext {
        RequestContext::from_request(request)
    }

    #[test]
    fn test_path_params() {
        let engine = TemplateEngine::new();
        let mut ctx = ctx(MockRequest::get("/users/123"));
        ctx.path_params.insert("id".to_string(), "123".to_string());

        let result = engine.render("User ID: {{path.id}}", &ctx).unwrap();
        assert_eq!(result, "User ID: 123");
    }

    #[test]
    fn test_query_params() {
        let engine = TemplateEngine::new();
        let ctx = ctx(MockRequest::get("/list?page=1"));

        let result = engine.render("Page: {{query.page}}", &ctx).unwrap();
        assert_eq!(result, "Page: 1");
    }

    #[test]
    fn test_headers_and_method() {
        let engine = TemplateEngine::new();
        let ctx = ctx(MockRequest::get("/").with_header("user-agent", "test-client"));

        let result = engine
            .render("{{method}} from {{headers.user-agent}}", &ctx)
            .unwrap();
        assert_eq!(result, "GET from test-client");
    }

    #[test]
    fn test_request_body() {
        let engine = TemplateEngine::new();
        let ctx = ctx(MockRequest::post("/users").with_body(r#"{"name":"John"}"#));

        let result = engine.render("Name: {{json.name}}", &ctx).unwrap();
        assert_eq!(result, "Name: John");
    }

    #[test]
    fn test_uuid_helper() {
        let engine = TemplateEngine::new();

        let result = engine
            .render("ID: {{uuid}}", &ctx(MockRequest::get("/")))
            .unwrap();

        // UUID format: xxxxxxxx-xxxx-4xxx-xxxx-xxxxxxxxxxxx
        let uuid = result.strip_prefix("ID: ").unwrap();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.chars().nth(8), Some('-'));
    }

    #[test]
    fn test_default_and_case_helpers() {
        let engine = TemplateEngine::new();
        let mut ctx = ctx(MockRequest::get("/"));
        ctx.path_params.insert("name".to_string(), "John".to_string());

        let result = engine
            .render(
                "{{default query.missing \"none\"}} {{upper path.name}} {{lower path.name}}",
                &ctx,
            )
            .unwrap();
        assert_eq!(result, "none JOHN john");
    }

    #[test]
    fn test_random_and_json_helpers() {
        let engine = TemplateEngine::new();
        let ctx = ctx(MockRequest::post("/").with_body(r#"{"a":1}"#));

        let value: i64 = engine
            .render("{{random 5 10}}", &ctx)
            .unwrap()
            .parse()
            .unwrap();
        assert!((5..=10).contains(&value));

        let dumped = engine.render("{{json json}}", &ctx).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&dumped).unwrap()["a"], 1);
    }

    #[test]
    fn test_render_json() {
        let engine = TemplateEngine::new();
        let mut ctx = ctx(MockRequest::get("/users/123"));
        ctx.path_params.insert("id".to_string(), "123".to_string());

        let json = serde_json::json!({
            "id": "{{path.id}}",
            "tags": ["user-{{path.id}}", 7],
            "static": "no template"
        });

        let result = engine.render_json(&json, &ctx).unwrap();
        assert_eq!(result["id"], "123");
        assert_eq!(result["tags"][0], "user-123");
        assert_eq!(result["tags"][1], 7);
        assert_eq!(result["static"], "no template");
    }
}
