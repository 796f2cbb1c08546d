//! Presets: named bundles of per-handler scenario selections.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named bundle of `handler key -> scenario name` assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub scenarios: IndexMap<String, String>,
}

impl Preset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            scenarios: IndexMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a `key -> scenario` assignment.
    pub fn with_scenario(mut self, key: impl Into<String>, scenario: impl Into<String>) -> Self {
        self.scenarios.insert(key.into(), scenario.into());
        self
    }
}

/// Insert or replace a preset by name, keeping the position of a replaced one.
pub(crate) fn upsert(presets: &mut Vec<Preset>, preset: Preset) {
    match presets.iter_mut().find(|p| p.name == preset.name) {
        Some(existing) => *existing = preset,
        None => presets.push(preset),
    }
}

/// Find a preset by name, searching `primary` before `secondary`.
pub(crate) fn lookup<'a>(
    primary: &'a [Preset],
    secondary: &'a [Preset],
    name: &str,
) -> Option<&'a Preset> {
    primary
        .iter()
        .chain(secondary.iter())
        .find(|p| p.name == name)
}
