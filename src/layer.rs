//! The underlying mock layer.
//!
//! A mock layer holds an ordered list of interceptors and answers a request
//! with the first one whose method and URL match. The registry drives any
//! [`MockLayer`]; [`InterceptorChain`] is the in-process implementation.

use crate::http::{Method, MockRequest, MockResponse};
use crate::matcher::{MatchContext, RoutePath};
use crate::producer::{RequestContext, SharedProducer};
use crate::registry::HandlerDefinition;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A method + URL binding with the producer that answers it.
#[derive(Clone)]
pub struct Interceptor {
    method: Method,
    path: RoutePath,
    producer: SharedProducer,
    /// Registry metadata attached before the registry was set up
    definition: Option<Arc<HandlerDefinition>>,
    /// Handler key, when bound by the registry
    managed_key: Option<String>,
}

impl Interceptor {
    pub fn new(method: Method, path: impl Into<RoutePath>, producer: SharedProducer) -> Self {
        Self {
            method,
            path: path.into(),
            producer,
            definition: None,
            managed_key: None,
        }
    }

    pub(crate) fn with_definition(mut self, definition: Arc<HandlerDefinition>) -> Self {
        self.definition = Some(definition);
        self
    }

    pub(crate) fn with_managed_key(mut self, key: impl Into<String>) -> Self {
        self.managed_key = Some(key.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    pub fn producer(&self) -> &SharedProducer {
        &self.producer
    }

    /// Registry metadata carried by a declaratively defined interceptor.
    pub fn definition(&self) -> Option<&Arc<HandlerDefinition>> {
        self.definition.as_ref()
    }

    /// Key of the registry handler this interceptor is bound to.
    pub fn managed_key(&self) -> Option<&str> {
        self.managed_key.as_deref()
    }

    /// Match a request against the method and URL binding.
    pub fn matches(&self, request: &MockRequest) -> Option<MatchContext> {
        if !self.method.matches(&request.method) {
            return None;
        }
        self.path.matches(request)
    }

    /// Produce a response if this interceptor matches the request.
    pub async fn handle(&self, request: &MockRequest) -> Option<MockResponse> {
        let matched = self.matches(request)?;
        let ctx = RequestContext::new(request.clone(), matched);
        Some(self.producer.produce(&ctx).await)
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("managed_key", &self.managed_key)
            .field("has_definition", &self.definition.is_some())
            .finish()
    }
}

/// Whatever the registry installs its interceptors into.
pub trait MockLayer: Send + Sync {
    /// Atomically replace the active interceptor list.
    fn reset_handlers(&self, handlers: Vec<Interceptor>);

    /// Currently active interceptors, when the layer can enumerate them.
    fn list_handlers(&self) -> Option<Vec<Interceptor>> {
        None
    }
}

/// Ordered, first-match-wins interceptor list.
#[derive(Default)]
pub struct InterceptorChain {
    handlers: RwLock<Vec<Interceptor>>,
}

impl InterceptorChain {
    pub fn new(handlers: Vec<Interceptor>) -> Self {
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Prepend interceptors so they take precedence over the current ones.
    pub fn use_handlers(&self, handlers: Vec<Interceptor>) {
        let mut current = self.handlers.write();
        let rest = std::mem::take(&mut *current);
        *current = handlers.into_iter().chain(rest).collect();
    }

    /// Snapshot of the active list.
    pub fn handlers(&self) -> Vec<Interceptor> {
        self.handlers.read().clone()
    }

    /// Answer a request with the first matching interceptor.
    pub async fn dispatch(&self, request: &MockRequest) -> Option<MockResponse> {
        // Snapshot so a concurrent reset never changes a dispatch in flight.
        let handlers = self.handlers();
        for interceptor in &handlers {
            if let Some(response) = interceptor.handle(request).await {
                return Some(response);
            }
        }
        debug!(method = %request.method, url = %request.url, "No interceptor matched");
        None
    }
}

impl MockLayer for InterceptorChain {
    fn reset_handlers(&self, handlers: Vec<Interceptor>) {
        *self.handlers.write() = handlers;
    }

    fn list_handlers(&self) -> Option<Vec<Interceptor>> {
        Some(self.handlers())
    }
}
