//! Ways to declare handlers: a fluent builder, a declarative list that waits
//! for [`Registry::setup`] to discover it, and YAML configuration.

use crate::config::HandlerConfig;
use crate::http::{Method, MockResponse};
use crate::layer::Interceptor;
use crate::producer::{respond_with, DefinitionProducer, SharedProducer};
use crate::registry::{HandlerDefinition, Registry};
use crate::template::TemplateEngine;
use std::sync::Arc;

/// Fluent construction of a [`HandlerDefinition`].
///
/// ```
/// use mock_scenarios::{HandlerBuilder, Method, MockResponse, Registry};
/// use serde_json::json;
///
/// let registry = Registry::in_memory();
/// HandlerBuilder::new("users")
///     .url("/api/users")
///     .method(Method::Get)
///     .respond("default", MockResponse::json(200, &json!([{ "id": 1 }])))
///     .respond("empty", MockResponse::json(200, &json!([])))
///     .build(&registry);
///
/// assert_eq!(registry.active_scenario("users").as_deref(), Some("default"));
/// ```
#[derive(Debug, Clone)]
pub struct HandlerBuilder {
    definition: HandlerDefinition,
}

impl HandlerBuilder {
    /// Start a GET handler with no URL and no scenarios.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            definition: HandlerDefinition::new(key, "", Method::Get),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.definition.url = url.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.definition.method = method;
        self
    }

    /// Add a named scenario. Redeclaring a name replaces its producer.
    pub fn scenario(mut self, name: impl Into<String>, producer: SharedProducer) -> Self {
        self.definition.scenarios.insert(name.into(), producer);
        self
    }

    /// Add a named scenario that always answers with `response`.
    pub fn respond(self, name: impl Into<String>, response: MockResponse) -> Self {
        self.scenario(name, respond_with(response))
    }

    pub fn default_scenario(mut self, name: impl Into<String>) -> Self {
        self.definition.default_scenario = name.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.definition.priority = priority;
        self
    }

    pub fn definition(self) -> HandlerDefinition {
        self.definition
    }

    /// Register with `registry` and return the bound interceptor.
    pub fn build(self, registry: &Registry) -> Interceptor {
        registry.register(self.definition)
    }
}

/// Plain interceptors carrying registry metadata.
///
/// Until a registry discovers them through [`Registry::setup`], they answer
/// `200` with no body.
pub fn define_handlers(definitions: impl IntoIterator<Item = HandlerDefinition>) -> Vec<Interceptor> {
    definitions
        .into_iter()
        .map(|definition| {
            Interceptor::new(
                definition.method,
                definition.url.as_str(),
                respond_with(MockResponse::empty(200)),
            )
            .with_definition(Arc::new(definition))
        })
        .collect()
}

/// Definition for a configured handler; every scenario renders its response
/// definition through `engine`.
pub fn definition_from_config(
    config: &HandlerConfig,
    engine: Arc<TemplateEngine>,
    default_content_type: &str,
) -> HandlerDefinition {
    let mut definition = HandlerDefinition::new(&config.key, &config.url, config.method);
    definition.priority = config.priority;
    if let Some(default) = &config.default_scenario {
        definition.default_scenario = default.clone();
    }

    for (name, response) in &config.scenarios {
        let producer = DefinitionProducer::new(response.clone(), engine.clone(), default_content_type);
        definition.scenarios.insert(name.clone(), Arc::new(producer));
    }

    definition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockScenariosConfig;
    use crate::http::MockRequest;
    use crate::layer::{InterceptorChain, MockLayer};
    use crate::registry::SetupOptions;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let definition = HandlerBuilder::new("products")
            .url("/api/products")
            .method(Method::Post)
            .definition();

        assert_eq!(definition.key, "products");
        assert_eq!(definition.method, Method::Post);
        assert_eq!(definition.default_scenario, "default");
        assert_eq!(definition.priority, 0);
        assert!(definition.scenarios.is_empty());
    }

    #[test]
    fn test_builder_registers() {
        let registry = Registry::in_memory();
        let interceptor = HandlerBuilder::new("orders")
            .url("/api/orders")
            .respond("success", MockResponse::empty(200))
            .respond("failure", MockResponse::empty(503))
            .priority(5)
            .build(&registry);

        assert_eq!(interceptor.managed_key(), Some("orders"));
        let meta = registry.handler("orders").unwrap();
        assert_eq!(meta.default_scenario, "success");
        assert_eq!(meta.priority, 5);
    }

    #[tokio::test]
    async fn test_defined_handlers_answer_placeholder_until_discovered() {
        let chain = Arc::new(InterceptorChain::new(define_handlers([HandlerBuilder::new(
            "users",
        )
        .url("/api/users")
        .respond("success", MockResponse::json(200, &json!([{ "id": 1 }])))
        .respond("empty", MockResponse::json(200, &json!([])))
        .definition()])));

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());

        let registry = Registry::in_memory();
        registry.setup(chain.clone(), SetupOptions::default());

        let meta = registry.handler("users").unwrap();
        assert!(!meta.is_native);
        assert_eq!(meta.default_scenario, "success");

        registry.set_active_scenario("users", "empty").unwrap();
        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!([])));
        // The placeholder is not kept as passthrough
        assert_eq!(chain.list_handlers().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_definition_from_config() {
        let config = MockScenariosConfig::from_yaml(
            r#"
handlers:
  - key: user
    url: /api/users/{id}
    scenarios:
      default:
        status: 200
        body:
          type: json
          content:
            id: "{{path.id}}"
        template: true
      missing:
        status: 404
"#,
        )
        .unwrap();

        let definition = definition_from_config(
            &config.handlers[0],
            Arc::new(TemplateEngine::new()),
            "application/json",
        );
        let registry = Registry::in_memory();
        let chain = Arc::new(InterceptorChain::default());
        registry.setup(chain.clone(), SetupOptions::default());
        registry.register(definition);

        let resp = chain.dispatch(&MockRequest::get("/api/users/42")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!({ "id": "42" })));

        registry.set_active_scenario("user", "missing").unwrap();
        let resp = chain.dispatch(&MockRequest::get("/api/users/42")).await.unwrap();
        assert_eq!(resp.status, 404);
    }
}
