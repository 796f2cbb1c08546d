//! Response producers.
//!
//! A producer turns a request context into a response, possibly after
//! asynchronous work. Scenarios are named producers.

use crate::config::{ResponseBody, ResponseDefinition};
use crate::http::{MockRequest, MockResponse};
use crate::matcher::MatchContext;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Everything a producer gets to see about the intercepted request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The intercepted request
    pub request: MockRequest,
    /// Path parameters captured by the URL pattern
    pub path_params: HashMap<String, String>,
    /// Decoded query parameters
    pub query_params: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(request: MockRequest, matched: MatchContext) -> Self {
        Self {
            request,
            path_params: matched.path_params,
            query_params: matched.query_params,
        }
    }

    /// Context for a request without captured parameters.
    pub fn from_request(request: MockRequest) -> Self {
        let query_params = request.query_params();
        Self {
            request,
            path_params: HashMap::new(),
            query_params,
        }
    }
}

/// Something that yields a response for a request.
#[async_trait]
pub trait ResponseProducer: Send + Sync {
    async fn produce(&self, ctx: &RequestContext) -> MockResponse;
}

/// Shared, type-erased producer.
pub type SharedProducer = Arc<dyn ResponseProducer>;

/// A fixed response is its own producer.
#[async_trait]
impl ResponseProducer for MockResponse {
    async fn produce(&self, _ctx: &RequestContext) -> MockResponse {
        self.clone()
    }
}

/// Producer backed by a synchronous closure.
pub struct FnProducer<F>(F);

#[async_trait]
impl<F> ResponseProducer for FnProducer<F>
where
    F: Fn(&RequestContext) -> MockResponse + Send + Sync,
{
    async fn produce(&self, ctx: &RequestContext) -> MockResponse {
        (self.0)(ctx)
    }
}

/// Producer backed by a closure returning a future.
pub struct AsyncFnProducer<F>(F);

#[async_trait]
impl<F, Fut> ResponseProducer for AsyncFnProducer<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = MockResponse> + Send,
{
    async fn produce(&self, ctx: &RequestContext) -> MockResponse {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap a synchronous closure as a producer.
pub fn producer_fn<F>(f: F) -> SharedProducer
where
    F: Fn(&RequestContext) -> MockResponse + Send + Sync + 'static,
{
    Arc::new(FnProducer(f))
}

/// Wrap an async closure as a producer.
pub fn async_producer_fn<F, Fut>(f: F) -> SharedProducer
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    Arc::new(AsyncFnProducer(f))
}

/// Always answer with a copy of `response`.
pub fn respond_with(response: MockResponse) -> SharedProducer {
    Arc::new(response)
}

/// Producer built from a declarative response definition.
pub struct DefinitionProducer {
    response: ResponseDefinition,
    template_engine: Arc<TemplateEngine>,
    default_content_type: String,
}

impl DefinitionProducer {
    pub fn new(
        response: ResponseDefinition,
        template_engine: Arc<TemplateEngine>,
        default_content_type: impl Into<String>,
    ) -> Self {
        Self {
            response,
            template_engine,
            default_content_type: default_content_type.into(),
        }
    }

    fn body_content(&self, ctx: &RequestContext) -> Option<Vec<u8>> {
        let body_def = self.response.body.as_ref()?;

        if !self.response.template {
            return match body_def.to_bytes() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Failed to load response body");
                    None
                }
            };
        }

        match body_def {
            ResponseBody::Text { content } => self
                .template_engine
                .render(content, ctx)
                .map_err(|e| warn!(error = %e, "Template rendering failed"))
                .ok()
                .map(String::into_bytes),
            ResponseBody::Json { content } => self
                .template_engine
                .render_json(content, ctx)
                .map_err(|e| warn!(error = %e, "Template rendering failed"))
                .ok()
                .and_then(|v| serde_json::to_vec(&v).ok()),
            _ => body_def.to_bytes().ok(),
        }
    }
}

#[async_trait]
impl ResponseProducer for DefinitionProducer {
    async fn produce(&self, ctx: &RequestContext) -> MockResponse {
        let response = &self.response;

        let content_type = response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| {
                response
                    .body
                    .as_ref()
                    .map(|b| b.content_type().to_string())
                    .unwrap_or_else(|| self.default_content_type.clone())
            });

        let mut out = MockResponse::empty(response.status);
        if response.body.is_some() {
            out = out.with_header("Content-Type", content_type);
        }

        for (name, value) in &response.headers {
            if !name.eq_ignore_ascii_case("content-type") {
                out = out.with_header(name.clone(), value.clone());
            }
        }

        if let Some(content) = self.body_content(ctx) {
            out = out.with_body(content);
        }

        out
    }
}
