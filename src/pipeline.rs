//! Per-request response resolution for managed handlers.
//!
//! Order of precedence: an enabled manual override, then a custom scenario
//! under the effective scenario name, then the handler's own producers.

use crate::http::MockResponse;
use crate::log::{entry_id, LogEntry, MANUAL_OVERRIDE_SCENARIO};
use crate::producer::RequestContext;
use crate::registry::{BoundHandler, Registry, RegistryEvent};
use crate::state::RegistryState;
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// How the response for one request gets made.
enum Plan {
    /// Stored body and status (override or custom scenario)
    Stored {
        body: String,
        status: u16,
        is_override: bool,
    },
    /// One of the handler's producers
    Produce,
}

impl Registry {
    /// Resolve a request for `handler`, apply its delay and log the exchange.
    pub(crate) async fn resolve(&self, handler: &BoundHandler, ctx: &RequestContext) -> MockResponse {
        let key = handler.key();
        let request_body = capture_body(ctx.request.header("content-type"), &ctx.request.body);

        let (scenario, plan) = {
            let state = self.inner.state.read();
            let scenario = self.effective_scenario(handler, &state);

            let plan = if let Some(o) = state.overrides.get(key).filter(|o| o.enabled) {
                Plan::Stored {
                    body: o.body.clone(),
                    status: o.status,
                    is_override: true,
                }
            } else if let Some(c) = state
                .custom_scenarios
                .get(key)
                .and_then(|custom| custom.get(&scenario))
            {
                Plan::Stored {
                    body: c.body.clone(),
                    status: c.status,
                    is_override: false,
                }
            } else {
                Plan::Produce
            };
            (scenario, plan)
        };

        let (response, is_override) = match plan {
            Plan::Stored {
                body,
                status,
                is_override,
            } => (stored_response(&body, status), is_override),
            Plan::Produce => match handler.producer_for(&scenario) {
                Some(producer) => (producer.produce(ctx).await, false),
                None => {
                    warn!(key = %key, scenario = %scenario, "No scenario to answer with");
                    (MockResponse::empty(404), false)
                }
            },
        };

        // Delay is read after producing; a change in flight applies to this request.
        let delay_ms = self.inner.state.read().effective_delay(key);
        if delay_ms > 0 {
            debug!(key = %key, delay_ms, "Applying delay");
            sleep(Duration::from_millis(delay_ms)).await;
        }

        let response_body = capture_body(response.header("content-type"), &response.body);

        let label = if is_override {
            MANUAL_OVERRIDE_SCENARIO.to_string()
        } else {
            scenario
        };

        if self.options().log_matches {
            info!(
                key = %key,
                scenario = %label,
                method = %ctx.request.method,
                url = %ctx.request.url,
                status = response.status,
                "Mock response"
            );
        }

        let entry = LogEntry {
            id: entry_id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            key: key.to_string(),
            scenario: label,
            method: ctx.request.method.to_ascii_uppercase(),
            url: ctx.request.url.clone(),
            status: response.status,
            request_body,
            response_body,
            query_params: ctx.query_params.clone(),
            path_params: ctx.path_params.clone(),
        };
        self.inner.log.lock().push(entry.clone());
        self.emit(RegistryEvent::RequestLogged(Box::new(entry)));

        response
    }

    /// Scenario name for this request: the page-level query parameter, then
    /// the persisted selection, then the default. The intercepted request's
    /// own query string never selects a scenario.
    fn effective_scenario(&self, handler: &BoundHandler, state: &RegistryState) -> String {
        let key = handler.key();
        non_empty(&self.options().page_query, key)
            .or_else(|| {
                state
                    .active_scenarios
                    .get(key)
                    .filter(|s| !s.is_empty())
                    .cloned()
            })
            .unwrap_or_else(|| handler.effective_default.clone())
    }
}

fn non_empty(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}

/// Response for a stored body: JSON when it parses, raw text otherwise.
fn stored_response(body: &str, status: u16) -> MockResponse {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => MockResponse::json(status, &value),
        Err(_) => MockResponse::text(status, body),
    }
}

/// Body as recorded in the activity log: parsed JSON for JSON content,
/// otherwise non-empty UTF-8 text.
fn capture_body(content_type: Option<&str>, body: &[u8]) -> Option<Value> {
    if content_type.is_some_and(|ct| ct.contains("application/json")) {
        return serde_json::from_slice(body).ok();
    }

    match std::str::from_utf8(body) {
        Ok(text) if !text.is_empty() => Some(Value::String(text.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, MockRequest};
    use crate::layer::InterceptorChain;
    use crate::producer::{producer_fn, respond_with};
    use crate::registry::{HandlerDefinition, RegistryOptions, SetupOptions};
    use crate::state::{CustomOverride, CustomScenario};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn wired(options: RegistryOptions) -> (Registry, Arc<InterceptorChain>) {
        let registry = Registry::with_options(Arc::new(MemoryStore::new()), options);
        let chain = Arc::new(InterceptorChain::default());
        registry.setup(chain.clone(), SetupOptions::default());
        (registry, chain)
    }

    fn users() -> HandlerDefinition {
        let mut def = HandlerDefinition::new("users", "/api/users", Method::Get);
        def.scenarios.insert(
            "default".to_string(),
            respond_with(MockResponse::json(200, &json!([{ "id": 1, "name": "John" }]))),
        );
        def.scenarios.insert(
            "empty".to_string(),
            respond_with(MockResponse::json(200, &json!([]))),
        );
        def
    }

    #[test]
    fn test_capture_body() {
        assert_eq!(
            capture_body(Some("application/json; charset=utf-8"), br#"{"a":1}"#),
            Some(json!({ "a": 1 }))
        );
        assert_eq!(capture_body(Some("application/json"), b"{broken"), None);
        assert_eq!(capture_body(None, b"plain"), Some(json!("plain")));
        assert_eq!(capture_body(Some("text/plain"), b""), None);
        assert_eq!(capture_body(None, &[0xff, 0xfe]), None);
    }

    #[test]
    fn test_stored_response() {
        let resp = stored_response(r#"{"manual":true}"#, 201);
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body_json(), Some(json!({ "manual": true })));

        let resp = stored_response("short and stout", 418);
        assert_eq!(resp.body_text(), "short and stout");
    }

    #[tokio::test]
    async fn test_active_scenario_answers() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry.set_active_scenario("users", "empty").unwrap();

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!([])));

        let log = registry.activity_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].scenario, "empty");
        assert_eq!(log[0].status, 200);
        assert_eq!(log[0].response_body, Some(json!([])));
    }

    #[tokio::test]
    async fn test_page_query_beats_state() {
        let (registry, chain) = wired(RegistryOptions::default().with_page_query("users=empty"));
        registry.register(users());

        registry.set_active_scenario("users", "default").unwrap();
        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!([])));
        assert_eq!(registry.activity_log()[0].scenario, "empty");
    }

    #[tokio::test]
    async fn test_request_query_sharing_key_keeps_selection() {
        let (registry, chain) = wired(RegistryOptions::default());
        let mut def = HandlerDefinition::new("page", "/api/items", Method::Get);
        def.scenarios.insert(
            "default".to_string(),
            respond_with(MockResponse::text(200, "default")),
        );
        def.scenarios.insert(
            "empty".to_string(),
            respond_with(MockResponse::text(200, "empty")),
        );
        registry.register(def);
        registry.set_active_scenario("page", "empty").unwrap();

        let resp = chain
            .dispatch(&MockRequest::get("/api/items?page=2"))
            .await
            .unwrap();
        assert_eq!(resp.body_text(), "empty");

        let entry = &registry.activity_log()[0];
        assert_eq!(entry.scenario, "empty");
        assert_eq!(entry.query_params["page"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_in_flight_affect_only_later_requests() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry.set_handler_delay("users", 100).unwrap();

        let in_flight = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.dispatch(&MockRequest::get("/api/users")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.set_active_scenario("users", "empty").unwrap();
        registry
            .set_override(
                "users",
                CustomOverride {
                    body: r#"{"manual":true}"#.to_string(),
                    status: 202,
                    enabled: true,
                },
            )
            .unwrap();

        let resp = in_flight.await.unwrap().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_json(), Some(json!([{ "id": 1, "name": "John" }])));
        assert_eq!(registry.activity_log()[0].scenario, "default");

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.status, 202);
        assert_eq!(registry.activity_log()[0].scenario, MANUAL_OVERRIDE_SCENARIO);
    }

    #[tokio::test]
    async fn test_unknown_scenario_falls_back_to_default() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry.set_active_scenario("users", "vanished").unwrap();

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!([{ "id": 1, "name": "John" }])));
        assert_eq!(registry.activity_log()[0].scenario, "vanished");
    }

    #[tokio::test]
    async fn test_override_wins_and_is_labelled() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry
            .set_override(
                "users",
                CustomOverride {
                    body: r#"{"manual":true}"#.to_string(),
                    status: 200,
                    enabled: true,
                },
            )
            .unwrap();

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.body_json(), Some(json!({ "manual": true })));
        assert_eq!(registry.activity_log()[0].scenario, MANUAL_OVERRIDE_SCENARIO);

        // A disabled override is ignored
        registry
            .set_override(
                "users",
                CustomOverride {
                    body: "{}".to_string(),
                    status: 500,
                    enabled: false,
                },
            )
            .unwrap();
        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(registry.activity_log()[0].scenario, "default");
    }

    #[tokio::test]
    async fn test_custom_scenario_text_body() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry
            .save_custom_scenario(
                "users",
                "Teapot",
                CustomScenario {
                    body: "short and stout".to_string(),
                    status: 418,
                },
            )
            .unwrap();
        registry.set_active_scenario("users", "Teapot").unwrap();

        let resp = chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert_eq!(resp.status, 418);
        assert_eq!(resp.body_text(), "short and stout");
        assert_eq!(
            registry.activity_log()[0].response_body,
            Some(json!("short and stout"))
        );
    }

    #[tokio::test]
    async fn test_request_body_and_params_are_logged() {
        let (registry, chain) = wired(RegistryOptions::default());
        let mut def = HandlerDefinition::new("user", "/api/users/:id", Method::Post);
        def.scenarios.insert(
            "default".to_string(),
            producer_fn(|ctx| {
                MockResponse::json(201, &json!({ "id": ctx.path_params.get("id") }))
            }),
        );
        registry.register(def);

        let request = MockRequest::post("/api/users/7?verbose=1").with_json(&json!({ "name": "Ann" }));
        let resp = chain.dispatch(&request).await.unwrap();
        assert_eq!(resp.status, 201);

        let entry = &registry.activity_log()[0];
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.request_body, Some(json!({ "name": "Ann" })));
        assert_eq!(entry.response_body, Some(json!({ "id": "7" })));
        assert_eq!(entry.path_params["id"], "7");
        assert_eq!(entry.query_params["verbose"], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_delay_beats_global_delay() {
        let (registry, chain) = wired(RegistryOptions::default());
        registry.register(users());
        registry.set_global_delay(1000);
        registry.set_handler_delay("users", 250).unwrap();

        let start = tokio::time::Instant::now();
        chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(1000));

        registry.set_handler_delay("users", 0).unwrap();
        let start = tokio::time::Instant::now();
        chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_log_matches_can_be_disabled() {
        let options = RegistryOptions {
            log_matches: false,
            ..Default::default()
        };
        let (registry, chain) = wired(options);
        registry.register(users());

        chain.dispatch(&MockRequest::get("/api/users")).await.unwrap();
        // The activity log is kept either way
        assert_eq!(registry.activity_log().len(), 1);
    }
}
