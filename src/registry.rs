//! Handler registry.
//!
//! Owns the mapping from handler keys to their scenarios, the user-controlled
//! state (active scenario, delays, overrides, custom scenarios, presets), and
//! keeps the mock layer's active interceptor list in sync with both.

use crate::error::RegistryError;
use crate::http::{Method, MockResponse};
use crate::layer::{Interceptor, MockLayer};
use crate::log::{ActivityLog, LogEntry};
use crate::matcher::RoutePath;
use crate::preset::{self, Preset};
use crate::producer::{respond_with, RequestContext, ResponseProducer, SharedProducer};
use crate::state::{CustomOverride, CustomScenario, RegistryState, StateCategory};
use crate::store::{MemoryStore, StateStore};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Name of the built-in scenario every handler has.
pub const SERVER_ERROR_SCENARIO: &str = "ServerError";

/// Scenario name native handlers are wrapped under.
pub const NATIVE_SCENARIO: &str = "original";

/// Default scenario name when a definition does not pick one.
pub const DEFAULT_SCENARIO: &str = "default";

/// Rewrites handler URLs before they are bound.
pub type UrlResolver = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// URL resolver that leaves URLs untouched.
pub fn identity_resolver() -> UrlResolver {
    Arc::new(|url: &str| url.to_string())
}

/// URL resolver that prefixes origin-relative URLs with `base_url`.
pub fn base_url_resolver(base_url: impl Into<String>) -> UrlResolver {
    let base = base_url.into().trim_end_matches('/').to_string();
    Arc::new(move |url: &str| {
        if url.starts_with('/') {
            format!("{}{}", base, url)
        } else {
            url.to_string()
        }
    })
}

/// Strip the `[METHOD] ` prefix of an auto-discovered handler key.
pub fn display_key(key: &str) -> &str {
    match key.split_once(' ') {
        Some((_, rest)) => rest,
        None => key,
    }
}

/// Everything needed to register one logical endpoint.
#[derive(Clone)]
pub struct HandlerDefinition {
    pub key: String,
    pub url: String,
    pub method: Method,
    /// Declared scenarios, in declaration order
    pub scenarios: IndexMap<String, SharedProducer>,
    /// Requested default scenario
    pub default_scenario: String,
    /// Higher priority handlers are matched first
    pub priority: i32,
    /// Wrapped from an interceptor already present in the mock layer
    pub is_native: bool,
}

impl HandlerDefinition {
    pub fn new(key: impl Into<String>, url: impl Into<String>, method: Method) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            method,
            scenarios: IndexMap::new(),
            default_scenario: DEFAULT_SCENARIO.to_string(),
            priority: 0,
            is_native: false,
        }
    }
}

impl fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("scenarios", &self.scenarios.keys().collect::<Vec<_>>())
            .field("default_scenario", &self.default_scenario)
            .field("priority", &self.priority)
            .field("is_native", &self.is_native)
            .finish()
    }
}

/// Display metadata for a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerMetadata {
    pub key: String,
    pub url: String,
    /// Upper-case method
    pub method: String,
    /// Built-in, declared and custom scenario names, deduplicated
    pub scenarios: Vec<String>,
    /// Built-in and declared scenario names
    pub original_scenarios: Vec<String>,
    /// Default scenario after defaulting rules
    pub default_scenario: String,
    pub priority: i32,
    pub is_native: bool,
}

/// A registered definition with its effective scenario set and default.
pub(crate) struct BoundHandler {
    pub(crate) definition: Arc<HandlerDefinition>,
    pub(crate) scenarios: IndexMap<String, SharedProducer>,
    pub(crate) effective_default: String,
}

impl BoundHandler {
    fn new(definition: HandlerDefinition) -> Self {
        let mut scenarios: IndexMap<String, SharedProducer> = IndexMap::new();
        scenarios.insert(
            SERVER_ERROR_SCENARIO.to_string(),
            respond_with(MockResponse::empty(500)),
        );
        for (name, producer) in &definition.scenarios {
            scenarios.insert(name.clone(), producer.clone());
        }

        let effective_default = match definition.scenarios.first() {
            Some((first, _))
                if definition.default_scenario == DEFAULT_SCENARIO
                    && !scenarios.contains_key(DEFAULT_SCENARIO) =>
            {
                first.clone()
            }
            _ => definition.default_scenario.clone(),
        };

        Self {
            definition: Arc::new(definition),
            scenarios,
            effective_default,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.definition.key
    }

    /// Producer for a scenario name: exact, then default, then first declared,
    /// then whatever the scenario set starts with.
    pub(crate) fn producer_for(&self, scenario: &str) -> Option<&SharedProducer> {
        self.scenarios
            .get(scenario)
            .or_else(|| self.scenarios.get(&self.effective_default))
            .or_else(|| self.definition.scenarios.first().map(|(_, p)| p))
            .or_else(|| self.scenarios.first().map(|(_, p)| p))
    }

    fn original_scenarios(&self) -> Vec<String> {
        self.scenarios.keys().cloned().collect()
    }

    fn metadata(&self, custom: Option<&IndexMap<String, CustomScenario>>) -> HandlerMetadata {
        let original_scenarios = self.original_scenarios();
        let mut scenarios = original_scenarios.clone();
        for name in custom.into_iter().flat_map(|c| c.keys()) {
            if !scenarios.contains(name) {
                scenarios.push(name.clone());
            }
        }

        let def = &self.definition;
        HandlerMetadata {
            key: def.key.clone(),
            url: def.url.clone(),
            method: def.method.as_upper().to_string(),
            scenarios,
            original_scenarios,
            default_scenario: self.effective_default.clone(),
            priority: def.priority,
            is_native: def.is_native,
        }
    }
}

/// Runs the resolution pipeline for one managed handler.
struct ManagedProducer {
    registry: Weak<Inner>,
    handler: Arc<BoundHandler>,
}

#[async_trait]
impl ResponseProducer for ManagedProducer {
    async fn produce(&self, ctx: &RequestContext) -> MockResponse {
        match self.registry.upgrade() {
            Some(inner) => Registry { inner }.resolve(&self.handler, ctx).await,
            None => {
                warn!(key = %self.handler.key(), "Registry dropped, handler has nothing to serve");
                MockResponse::empty(404)
            }
        }
    }
}

/// Notifications about registry changes.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A persisted state category changed
    StateChanged(StateCategory),
    /// A handler was registered (or re-registered)
    HandlerRegistered(String),
    /// The mock layer received a new interceptor list
    HandlersRefreshed { managed: usize, passthrough: usize },
    /// A request was resolved and logged
    RequestLogged(Box<LogEntry>),
    /// The activity log was cleared
    LogCleared,
}

/// Registry construction options.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Page-level query parameters; a parameter named like a handler key selects
    /// that handler's scenario for this session and is persisted at registration
    pub page_query: HashMap<String, String>,
    /// Emit an `info` line for every resolved request
    pub log_matches: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            page_query: HashMap::new(),
            log_matches: true,
        }
    }
}

impl RegistryOptions {
    /// Parse page-level parameters from a query string (`a=1&b=2`).
    pub fn with_page_query(mut self, query: &str) -> Self {
        self.page_query = crate::http::parse_query_string(query);
        self
    }
}

/// Inputs to [`Registry::setup`].
#[derive(Clone, Default)]
pub struct SetupOptions {
    /// Interceptors to keep as unmanaged passthrough instead of the scan result
    pub passthrough: Vec<Interceptor>,
    /// Rewrites every registered URL before binding
    pub url_resolver: Option<UrlResolver>,
}

struct Registration {
    key: String,
    priority: i32,
    handler: Arc<BoundHandler>,
}

struct Tables {
    handlers: IndexMap<String, Arc<BoundHandler>>,
    metadata: IndexMap<String, HandlerMetadata>,
    /// Active registrations, in registration order
    registrations: Vec<Registration>,
    passthrough: Vec<Interceptor>,
    presets: Vec<Preset>,
    layer: Option<Arc<dyn MockLayer>>,
    url_resolver: UrlResolver,
}

pub(crate) struct Inner {
    store: Arc<dyn StateStore>,
    options: RegistryOptions,
    /// Lock order: `tables` before `state`.
    tables: RwLock<Tables>,
    pub(crate) state: RwLock<RegistryState>,
    pub(crate) log: Mutex<ActivityLog>,
    events: broadcast::Sender<RegistryEvent>,
}

/// The scenario registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<Inner>,
}

impl Registry {
    /// Registry backed by `store`, with state loaded from it.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_options(store, RegistryOptions::default())
    }

    /// Registry with only in-memory persistence.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_options(store: Arc<dyn StateStore>, options: RegistryOptions) -> Self {
        let state = RegistryState::load(store.as_ref());
        let (events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                store,
                options,
                tables: RwLock::new(Tables {
                    handlers: IndexMap::new(),
                    metadata: IndexMap::new(),
                    registrations: Vec::new(),
                    passthrough: Vec::new(),
                    presets: Vec::new(),
                    layer: None,
                    url_resolver: identity_resolver(),
                }),
                state: RwLock::new(state),
                log: Mutex::new(ActivityLog::new()),
                events,
            }),
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }

    /// Mutate state, persist the touched categories and notify subscribers.
    fn mutate<R>(
        &self,
        categories: &[StateCategory],
        f: impl FnOnce(&mut RegistryState) -> R,
    ) -> R {
        let result = {
            let mut state = self.inner.state.write();
            let result = f(&mut state);
            for &category in categories {
                state.persist(category, self.inner.store.as_ref());
            }
            result
        };
        for &category in categories {
            self.emit(RegistryEvent::StateChanged(category));
        }
        result
    }

    fn require_registered(&self, key: &str) -> Result<(), RegistryError> {
        if self.inner.tables.read().handlers.contains_key(key) {
            Ok(())
        } else {
            Err(RegistryError::UnknownHandler(key.to_string()))
        }
    }

    // ----- Registration ---------------------------------------------------

    /// Register a handler and return its bound interceptor.
    ///
    /// Re-registering a key replaces its metadata and its active registration
    /// in place, so a key never has more than one active interceptor.
    pub fn register(&self, definition: HandlerDefinition) -> Interceptor {
        let handler = Arc::new(BoundHandler::new(definition));
        let key = handler.key().to_string();

        let (interceptor, wired) = {
            let mut tables = self.inner.tables.write();

            let metadata = {
                let state = self.inner.state.read();
                handler.metadata(state.custom_scenarios.get(&key))
            };
            tables.metadata.insert(key.clone(), metadata);
            tables.handlers.insert(key.clone(), handler.clone());

            match tables.registrations.iter_mut().find(|r| r.key == key) {
                Some(existing) => {
                    debug!(key = %key, "Replacing existing registration");
                    existing.priority = handler.definition.priority;
                    existing.handler = handler.clone();
                }
                None => tables.registrations.push(Registration {
                    key: key.clone(),
                    priority: handler.definition.priority,
                    handler: handler.clone(),
                }),
            }

            let interceptor = self.bind(&handler, &tables.url_resolver);
            (interceptor, tables.layer.is_some())
        };

        self.seed_state(&handler);

        debug!(
            key = %key,
            url = %handler.definition.url,
            method = %handler.definition.method,
            scenarios = handler.scenarios.len(),
            native = handler.definition.is_native,
            "Registered handler"
        );
        self.emit(RegistryEvent::HandlerRegistered(key));

        if wired {
            self.refresh();
        }

        interceptor
    }

    /// Seed active scenario and delay for a freshly registered handler.
    fn seed_state(&self, handler: &BoundHandler) {
        let key = handler.key();
        let page_value = self
            .inner
            .options
            .page_query
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned();

        let mut changed = Vec::new();
        {
            let mut state = self.inner.state.write();

            let current = state.active_scenarios.get(key).filter(|v| !v.is_empty());
            let seeded = match (page_value, current) {
                (Some(from_page), _) => Some(from_page),
                (None, Some(_)) => None,
                (None, None) => Some(handler.effective_default.clone()),
            };
            if let Some(scenario) = seeded {
                if state.active_scenarios.get(key) != Some(&scenario) {
                    state.active_scenarios.insert(key.to_string(), scenario);
                    changed.push(StateCategory::ActiveScenarios);
                }
            }

            if !state.handler_delays.contains_key(key) {
                state.handler_delays.insert(key.to_string(), 0);
                changed.push(StateCategory::HandlerDelays);
            }

            for &category in &changed {
                state.persist(category, self.inner.store.as_ref());
            }
        }

        for category in changed {
            self.emit(RegistryEvent::StateChanged(category));
        }
    }

    fn bind(&self, handler: &Arc<BoundHandler>, resolver: &UrlResolver) -> Interceptor {
        let def = &handler.definition;
        let producer = Arc::new(ManagedProducer {
            registry: Arc::downgrade(&self.inner),
            handler: handler.clone(),
        });
        Interceptor::new(def.method, RoutePath::literal(&resolver(&def.url)), producer)
            .with_managed_key(def.key.clone())
    }

    // ----- Setup & activation ---------------------------------------------

    /// Wire the registry to a mock layer.
    ///
    /// Interceptors already in the layer are discovered: those carrying
    /// registry metadata are registered from it, plain literal-path
    /// interceptors with a standard method are wrapped as native handlers
    /// under `[METHOD] path`, and everything else is kept as passthrough.
    /// A non-empty `options.passthrough` replaces the scanned passthrough set.
    pub fn setup(&self, layer: Arc<dyn MockLayer>, options: SetupOptions) {
        if let Some(resolver) = options.url_resolver.clone() {
            self.inner.tables.write().url_resolver = resolver;
        }

        let existing = layer.list_handlers();
        let mut scanned_passthrough = Vec::new();
        let mut native = 0usize;
        let mut declared = 0usize;

        for interceptor in existing.iter().flatten() {
            if let Some(definition) = interceptor.definition() {
                let mut definition = HandlerDefinition::clone(definition);
                definition.is_native = false;
                self.register(definition);
                declared += 1;
                continue;
            }

            // Bound by this registry already
            if let Some(key) = interceptor.managed_key() {
                if self.inner.tables.read().handlers.contains_key(key) {
                    continue;
                }
            }

            let method = interceptor.method();
            let Some(path) = interceptor.path().as_literal() else {
                scanned_passthrough.push(interceptor.clone());
                continue;
            };
            if !method.is_standard() {
                scanned_passthrough.push(interceptor.clone());
                continue;
            }

            let already_managed = self
                .inner
                .tables
                .read()
                .metadata
                .values()
                .any(|m| m.url == path && m.method == method.as_upper());
            if already_managed {
                continue;
            }

            let mut definition =
                HandlerDefinition::new(format!("[{}] {}", method.as_upper(), path), path, method);
            definition
                .scenarios
                .insert(NATIVE_SCENARIO.to_string(), interceptor.producer().clone());
            definition.default_scenario = NATIVE_SCENARIO.to_string();
            definition.is_native = true;
            self.register(definition);
            native += 1;
        }

        let passthrough = if options.passthrough.is_empty() {
            scanned_passthrough
        } else {
            options.passthrough
        };

        let (handlers, passthrough) = {
            let mut tables = self.inner.tables.write();
            tables.passthrough = passthrough;
            tables.layer = Some(layer);
            (tables.handlers.len(), tables.passthrough.len())
        };

        info!(
            declared,
            native,
            handlers, passthrough, "Scenario registry wired to mock layer"
        );

        self.refresh();
    }

    /// Rebuild the active interceptor list and hand it to the mock layer.
    ///
    /// Managed handlers come first, by descending priority (ties keep
    /// registration order), followed by the passthrough interceptors.
    pub fn refresh(&self) {
        let (layer, interceptors, managed, passthrough) = {
            let tables = self.inner.tables.read();
            let Some(layer) = tables.layer.clone() else {
                return;
            };

            let mut sorted: Vec<&Registration> = tables.registrations.iter().collect();
            sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

            let mut interceptors: Vec<Interceptor> = sorted
                .iter()
                .map(|r| self.bind(&r.handler, &tables.url_resolver))
                .collect();
            let managed = interceptors.len();
            interceptors.extend(tables.passthrough.iter().cloned());

            (layer, interceptors, managed, tables.passthrough.len())
        };

        layer.reset_handlers(interceptors);
        debug!(managed, passthrough, "Refreshed active interceptors");
        self.emit(RegistryEvent::HandlersRefreshed {
            managed,
            passthrough,
        });
    }

    // ----- Introspection --------------------------------------------------

    /// Metadata of every registered handler, sorted by key.
    pub fn handlers(&self) -> Vec<HandlerMetadata> {
        let mut handlers: Vec<_> = self.inner.tables.read().metadata.values().cloned().collect();
        handlers.sort_by(|a, b| a.key.cmp(&b.key));
        handlers
    }

    pub fn handler(&self, key: &str) -> Option<HandlerMetadata> {
        self.inner.tables.read().metadata.get(key).cloned()
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.inner.tables.read().handlers.contains_key(key)
    }

    /// Snapshot of the whole user-controlled state.
    pub fn state(&self) -> RegistryState {
        self.inner.state.read().clone()
    }

    pub fn active_scenario(&self, key: &str) -> Option<String> {
        self.inner.state.read().active_scenarios.get(key).cloned()
    }

    pub fn handler_delay(&self, key: &str) -> Option<u64> {
        self.inner.state.read().handler_delays.get(key).copied()
    }

    pub fn global_delay(&self) -> u64 {
        self.inner.state.read().global_delay
    }

    pub fn override_for(&self, key: &str) -> Option<CustomOverride> {
        self.inner.state.read().overrides.get(key).cloned()
    }

    pub fn custom_scenarios(&self, key: &str) -> IndexMap<String, CustomScenario> {
        self.inner
            .state
            .read()
            .custom_scenarios
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Activity log, newest first.
    pub fn activity_log(&self) -> Vec<LogEntry> {
        self.inner.log.lock().entries()
    }

    pub fn clear_activity_log(&self) {
        self.inner.log.lock().clear();
        self.emit(RegistryEvent::LogCleared);
    }

    // ----- State mutation -------------------------------------------------

    /// Select the scenario a handler answers with.
    ///
    /// Names outside the handler's scenario set are accepted; resolution then
    /// falls back to the default scenario.
    pub fn set_active_scenario(&self, key: &str, scenario: &str) -> Result<(), RegistryError> {
        self.require_registered(key)?;
        self.mutate(&[StateCategory::ActiveScenarios], |state| {
            state
                .active_scenarios
                .insert(key.to_string(), scenario.to_string());
        });
        Ok(())
    }

    /// Set a handler's artificial latency in milliseconds (0 = use global delay).
    pub fn set_handler_delay(&self, key: &str, delay_ms: u64) -> Result<(), RegistryError> {
        self.require_registered(key)?;
        self.mutate(&[StateCategory::HandlerDelays], |state| {
            state.handler_delays.insert(key.to_string(), delay_ms);
        });
        Ok(())
    }

    /// Set the latency applied to handlers without their own delay.
    pub fn set_global_delay(&self, delay_ms: u64) {
        self.mutate(&[StateCategory::GlobalDelay], |state| {
            state.global_delay = delay_ms;
        });
    }

    /// Install (or replace) a manual override for a handler.
    pub fn set_override(&self, key: &str, value: CustomOverride) -> Result<(), RegistryError> {
        self.require_registered(key)?;
        self.mutate(&[StateCategory::Overrides], |state| {
            state.overrides.insert(key.to_string(), value);
        });
        Ok(())
    }

    /// Remove a handler's manual override. Returns whether one existed.
    pub fn clear_override(&self, key: &str) -> Result<bool, RegistryError> {
        self.require_registered(key)?;
        Ok(self.mutate(&[StateCategory::Overrides], |state| {
            state.overrides.shift_remove(key).is_some()
        }))
    }

    /// Store a user-authored scenario for a handler.
    pub fn save_custom_scenario(
        &self,
        key: &str,
        name: &str,
        scenario: CustomScenario,
    ) -> Result<(), RegistryError> {
        let mut tables = self.inner.tables.write();
        let handler = tables
            .handlers
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownHandler(key.to_string()))?;

        let metadata = self.mutate(&[StateCategory::CustomScenarios], |state| {
            state
                .custom_scenarios
                .entry(key.to_string())
                .or_default()
                .insert(name.to_string(), scenario);
            handler.metadata(state.custom_scenarios.get(key))
        });
        tables.metadata.insert(key.to_string(), metadata);
        Ok(())
    }

    /// Delete a user-authored scenario. A handler that had it selected returns
    /// to its default scenario.
    pub fn delete_custom_scenario(&self, key: &str, name: &str) -> Result<(), RegistryError> {
        let mut tables = self.inner.tables.write();
        let handler = tables
            .handlers
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownHandler(key.to_string()))?;

        let exists = self
            .inner
            .state
            .read()
            .custom_scenarios
            .get(key)
            .is_some_and(|c| c.contains_key(name));
        if !exists {
            return Err(RegistryError::UnknownScenario {
                key: key.to_string(),
                scenario: name.to_string(),
            });
        }

        let metadata = self.mutate(
            &[
                StateCategory::CustomScenarios,
                StateCategory::ActiveScenarios,
            ],
            |state| {
                if let Some(custom) = state.custom_scenarios.get_mut(key) {
                    custom.shift_remove(name);
                    if custom.is_empty() {
                        state.custom_scenarios.shift_remove(key);
                    }
                }
                if state.active_scenarios.get(key).map(String::as_str) == Some(name) {
                    state
                        .active_scenarios
                        .insert(key.to_string(), handler.effective_default.clone());
                }
                handler.metadata(state.custom_scenarios.get(key))
            },
        );
        tables.metadata.insert(key.to_string(), metadata);
        Ok(())
    }

    // ----- Presets --------------------------------------------------------

    /// Declare a preset in code, replacing any declared preset of the same name.
    pub fn register_preset(&self, preset: Preset) {
        preset::upsert(&mut self.inner.tables.write().presets, preset);
    }

    pub fn define_presets(&self, presets: impl IntoIterator<Item = Preset>) {
        for preset in presets {
            self.register_preset(preset);
        }
    }

    /// Code-declared presets.
    pub fn presets(&self) -> Vec<Preset> {
        self.inner.tables.read().presets.clone()
    }

    /// User-authored presets.
    pub fn custom_presets(&self) -> Vec<Preset> {
        self.inner.state.read().custom_presets.clone()
    }

    /// Store a user-authored preset, replacing one of the same name.
    pub fn save_custom_preset(&self, preset: Preset) {
        self.mutate(&[StateCategory::CustomPresets], |state| {
            preset::upsert(&mut state.custom_presets, preset);
        });
    }

    /// Save the current scenario selection of every registered handler as a
    /// user-authored preset.
    pub fn capture_preset(&self, name: &str, description: Option<&str>) -> Preset {
        let keys: Vec<String> = self.inner.tables.read().handlers.keys().cloned().collect();

        let mut preset = Preset::new(name);
        preset.description = description.map(str::to_string);
        {
            let state = self.inner.state.read();
            for key in keys {
                if let Some(scenario) = state.active_scenarios.get(&key) {
                    preset.scenarios.insert(key, scenario.clone());
                }
            }
        }

        self.save_custom_preset(preset.clone());
        preset
    }

    /// Delete a user-authored preset. Returns whether it existed.
    pub fn delete_custom_preset(&self, name: &str) -> bool {
        self.mutate(&[StateCategory::CustomPresets], |state| {
            let before = state.custom_presets.len();
            state.custom_presets.retain(|p| p.name != name);
            state.custom_presets.len() != before
        })
    }

    /// Apply a preset by name. Code-declared presets shadow user-authored ones;
    /// entries for keys that are not registered are skipped.
    ///
    /// Returns `false` when no preset has that name.
    pub fn apply_preset(&self, name: &str) -> bool {
        let tables = self.inner.tables.read();
        let custom = self.custom_presets();

        let Some(found) = preset::lookup(&tables.presets, &custom, name) else {
            debug!(preset = %name, "No preset with that name");
            return false;
        };

        let mut applied = 0usize;
        let mut skipped = 0usize;
        self.mutate(&[StateCategory::ActiveScenarios], |state| {
            for (key, scenario) in &found.scenarios {
                if tables.handlers.contains_key(key) {
                    state.active_scenarios.insert(key.clone(), scenario.clone());
                    applied += 1;
                } else {
                    skipped += 1;
                }
            }
        });

        info!(preset = %name, applied, skipped, "Applied preset");
        true
    }

    // ----- Reset ----------------------------------------------------------

    /// Return every registered handler to its default scenario and drop all
    /// overrides. Delays, custom scenarios, presets and selections stored for
    /// keys that are not registered are kept.
    pub fn reset_scenarios(&self) {
        let tables = self.inner.tables.read();
        self.mutate(
            &[StateCategory::ActiveScenarios, StateCategory::Overrides],
            |state| {
                for (key, handler) in &tables.handlers {
                    state
                        .active_scenarios
                        .insert(key.clone(), handler.effective_default.clone());
                }
                state.overrides.clear();
            },
        );
        info!("Reset scenarios to defaults");
    }

    /// Reset every persisted category to its initial value. Selections and
    /// delays stored for keys that are not registered are kept.
    pub fn reset_all(&self) {
        let mut tables = self.inner.tables.write();
        self.mutate(&StateCategory::ALL, |state| {
            for (key, handler) in &tables.handlers {
                state
                    .active_scenarios
                    .insert(key.clone(), handler.effective_default.clone());
                state.handler_delays.insert(key.clone(), 0);
            }
            state.overrides.clear();
            state.custom_scenarios.clear();
            state.custom_presets.clear();
            state.global_delay = 0;
        });

        let Tables {
            handlers, metadata, ..
        } = &mut *tables;
        for (key, handler) in handlers.iter() {
            metadata.insert(key.clone(), handler.metadata(None));
        }
        info!("Reset all registry state");
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.inner.tables.read();
        f.debug_struct("Registry")
            .field("handlers", &tables.metadata.keys().collect::<Vec<_>>())
            .field("passthrough", &tables.passthrough.len())
            .field("wired", &tables.layer.is_some())
            .finish()
    }
}
