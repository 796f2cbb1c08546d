//! Mutable registry state and its persistence.
//!
//! Every category is serialized in full and written to the store after each
//! mutation that touches it. Missing or malformed blobs load as defaults.

use crate::preset::Preset;
use crate::store::{
    StateStore, CUSTOM_PRESETS_KEY, CUSTOM_SCENARIOS_KEY, GLOBAL_DELAY_KEY, HANDLER_DELAYS_KEY,
    OVERRIDES_KEY, SCENARIOS_KEY,
};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A manual, non-reusable forced response for one handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomOverride {
    pub body: String,
    pub status: u16,
    pub enabled: bool,
}

/// A user-authored scenario stored under an arbitrary name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomScenario {
    pub body: String,
    pub status: u16,
}

/// Independently persisted slices of [`RegistryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCategory {
    ActiveScenarios,
    HandlerDelays,
    Overrides,
    CustomScenarios,
    CustomPresets,
    GlobalDelay,
}

impl StateCategory {
    pub const ALL: [StateCategory; 6] = [
        StateCategory::ActiveScenarios,
        StateCategory::HandlerDelays,
        StateCategory::Overrides,
        StateCategory::CustomScenarios,
        StateCategory::CustomPresets,
        StateCategory::GlobalDelay,
    ];

    /// Key the category is stored under.
    pub fn store_key(&self) -> &'static str {
        match self {
            StateCategory::ActiveScenarios => SCENARIOS_KEY,
            StateCategory::HandlerDelays => HANDLER_DELAYS_KEY,
            StateCategory::Overrides => OVERRIDES_KEY,
            StateCategory::CustomScenarios => CUSTOM_SCENARIOS_KEY,
            StateCategory::CustomPresets => CUSTOM_PRESETS_KEY,
            StateCategory::GlobalDelay => GLOBAL_DELAY_KEY,
        }
    }
}

/// All user-controlled registry state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    /// Active scenario name per handler key
    pub active_scenarios: IndexMap<String, String>,
    /// Artificial latency per handler key, in milliseconds
    pub handler_delays: IndexMap<String, u64>,
    /// Manual overrides per handler key
    pub overrides: IndexMap<String, CustomOverride>,
    /// User-authored scenarios per handler key
    pub custom_scenarios: IndexMap<String, IndexMap<String, CustomScenario>>,
    /// User-authored presets
    pub custom_presets: Vec<Preset>,
    /// Latency applied to handlers without their own delay
    pub global_delay: u64,
}

impl RegistryState {
    /// Load every category from the store.
    pub fn load(store: &dyn StateStore) -> Self {
        Self {
            active_scenarios: load_blob(store, SCENARIOS_KEY),
            handler_delays: load_blob(store, HANDLER_DELAYS_KEY),
            overrides: load_blob(store, OVERRIDES_KEY),
            custom_scenarios: load_blob(store, CUSTOM_SCENARIOS_KEY),
            custom_presets: load_blob(store, CUSTOM_PRESETS_KEY),
            global_delay: load_text(store, GLOBAL_DELAY_KEY)
                .and_then(|text| text.trim().parse::<f64>().ok())
                .filter(|delay| delay.is_finite() && *delay > 0.0)
                .map(|delay| delay as u64)
                .unwrap_or(0),
        }
    }

    /// Serialized form of one category.
    pub fn serialize(&self, category: StateCategory) -> Result<String, serde_json::Error> {
        match category {
            StateCategory::ActiveScenarios => serde_json::to_string(&self.active_scenarios),
            StateCategory::HandlerDelays => serde_json::to_string(&self.handler_delays),
            StateCategory::Overrides => serde_json::to_string(&self.overrides),
            StateCategory::CustomScenarios => serde_json::to_string(&self.custom_scenarios),
            StateCategory::CustomPresets => serde_json::to_string(&self.custom_presets),
            StateCategory::GlobalDelay => Ok(self.global_delay.to_string()),
        }
    }

    /// Write one category to the store. Failures are logged, never returned.
    pub fn persist(&self, category: StateCategory, store: &dyn StateStore) {
        let key = category.store_key();
        let result = self
            .serialize(category)
            .map_err(Into::into)
            .and_then(|blob| store.save(key, &blob));

        if let Err(e) = result {
            warn!(key, error = %e, "Failed to persist state");
        }
    }

    /// Effective latency for a handler: its own delay when set, else the global one.
    pub fn effective_delay(&self, key: &str) -> u64 {
        match self.handler_delays.get(key) {
            Some(&delay) if delay > 0 => delay,
            _ => self.global_delay,
        }
    }
}

fn load_text(store: &dyn StateStore, key: &str) -> Option<String> {
    match store.load(key) {
        Ok(text) => text,
        Err(e) => {
            warn!(key, error = %e, "Failed to read persisted state");
            None
        }
    }
}

fn load_blob<T: DeserializeOwned + Default>(store: &dyn StateStore, key: &str) -> T {
    let Some(text) = load_text(store, key) else {
        return T::default();
    };

    serde_json::from_str(&text).unwrap_or_else(|e| {
        debug!(key, error = %e, "Ignoring malformed persisted state");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_load_missing_is_default() {
        let state = RegistryState::load(&MemoryStore::new());
        assert_eq!(state, RegistryState::default());
    }

    #[test]
    fn test_load_malformed_is_default() {
        let store = MemoryStore::with_entries([
            (SCENARIOS_KEY, "{not json"),
            (HANDLER_DELAYS_KEY, r#"{"users": -5}"#),
            (CUSTOM_PRESETS_KEY, r#"{"name": "not a list"}"#),
            (GLOBAL_DELAY_KEY, "slow"),
        ]);

        let state = RegistryState::load(&store);
        assert!(state.active_scenarios.is_empty());
        assert!(state.handler_delays.is_empty());
        assert!(state.custom_presets.is_empty());
        assert_eq!(state.global_delay, 0);
    }

    #[test]
    fn test_persist_and_reload() {
        let store = MemoryStore::new();
        let mut state = RegistryState::default();
        state
            .active_scenarios
            .insert("users".to_string(), "empty".to_string());
        state.overrides.insert(
            "products".to_string(),
            CustomOverride {
                body: r#"{"manual":true}"#.to_string(),
                status: 200,
                enabled: true,
            },
        );
        state.custom_scenarios.entry("users".to_string()).or_default().insert(
            "Teapot".to_string(),
            CustomScenario {
                body: "short and stout".to_string(),
                status: 418,
            },
        );
        state.custom_presets.push(Preset::new("Empty").with_scenario("users", "empty"));
        state.global_delay = 300;

        for category in StateCategory::ALL {
            state.persist(category, &store);
        }

        assert_eq!(store.get(GLOBAL_DELAY_KEY).as_deref(), Some("300"));
        assert_eq!(RegistryState::load(&store), state);
    }

    #[test]
    fn test_global_delay_accepts_fractional_text() {
        let store = MemoryStore::with_entries([(GLOBAL_DELAY_KEY, " 150.7 ")]);
        assert_eq!(RegistryState::load(&store).global_delay, 150);
    }

    #[test]
    fn test_effective_delay() {
        let mut state = RegistryState {
            global_delay: 1000,
            ..Default::default()
        };
        state.handler_delays.insert("users".to_string(), 0);
        state.handler_delays.insert("slow".to_string(), 250);

        assert_eq!(state.effective_delay("users"), 1000);
        assert_eq!(state.effective_delay("slow"), 250);
        assert_eq!(state.effective_delay("unknown"), 1000);
    }
}
