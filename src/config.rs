//! Configuration for the scenario registry.
//!
//! Declares handlers with their scenario responses, code-declared presets,
//! and runtime settings.

use crate::http::Method;
use crate::preset::Preset;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockScenariosConfig {
    /// Handler definitions
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,

    /// Code-declared presets
    #[serde(default)]
    pub presets: Vec<Preset>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl MockScenariosConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for (i, handler) in self.handlers.iter().enumerate() {
            handler
                .validate()
                .map_err(|e| anyhow::anyhow!("Handler {} ({}): {}", i, handler.key, e))?;
            if !seen.insert(handler.key.as_str()) {
                anyhow::bail!("Duplicate handler key: {}", handler.key);
            }
        }
        for preset in &self.presets {
            if preset.name.is_empty() {
                anyhow::bail!("Preset name cannot be empty");
            }
        }
        Ok(())
    }
}

/// A single handler definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerConfig {
    /// Stable handler key
    pub key: String,

    /// URL pattern (`/api/users/:id`)
    pub url: String,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: Method,

    /// Scenario responses, in declaration order
    #[serde(default)]
    pub scenarios: IndexMap<String, ResponseDefinition>,

    /// Scenario selected when nothing else is
    #[serde(default)]
    pub default_scenario: Option<String>,

    /// Priority (higher = matched first)
    #[serde(default)]
    pub priority: i32,
}

fn default_method() -> Method {
    Method::Get
}

impl HandlerConfig {
    /// Validate the handler definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key.is_empty() {
            anyhow::bail!("Handler key cannot be empty");
        }
        if !self.method.is_standard() {
            anyhow::bail!("Unsupported method for a managed handler: {}", self.method);
        }
        for (name, response) in &self.scenarios {
            response
                .validate()
                .map_err(|e| anyhow::anyhow!("Scenario '{}': {}", name, e))?;
        }
        if let Some(default) = &self.default_scenario {
            if !self.scenarios.contains_key(default) {
                anyhow::bail!("Default scenario '{}' is not declared", default);
            }
        }
        Ok(())
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Whether this is a template response
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(100..=599).contains(&self.status) {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        Ok(())
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } | ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory holding persisted state (scenario selections, delays, ...)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Prefix applied to every relative handler URL before binding
    #[serde(default)]
    pub base_url: Option<String>,

    /// Log every resolved request
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Content type for bodies whose type cannot be inferred
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            base_url: None,
            log_matches: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".mock-scenarios")
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
handlers:
  - key: users
    url: /api/users
    method: get
    scenarios:
      default:
        status: 200
        body:
          type: json
          content:
            - id: 1
              name: John
      empty:
        body:
          type: json
          content: []
  - key: products
    url: /api/products
    method: post
    priority: 5
    scenarios:
      default:
        status: 201
        body:
          type: json
          content:
            success: true
            id: 123
presets:
  - name: Empty users
    description: Nobody signed up yet
    scenarios:
      users: empty
settings:
  base_url: http://localhost:3000
"#;

    #[test]
    fn test_parse_handlers() {
        let config = MockScenariosConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.handlers.len(), 2);

        let users = &config.handlers[0];
        assert_eq!(users.method, Method::Get);
        let names: Vec<_> = users.scenarios.keys().cloned().collect();
        assert_eq!(names, vec!["default", "empty"]);
        assert_eq!(users.scenarios["empty"].status, 200);

        let products = &config.handlers[1];
        assert_eq!(products.method, Method::Post);
        assert_eq!(products.priority, 5);
    }

    #[test]
    fn test_parse_presets_and_settings() {
        let config = MockScenariosConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.presets[0].name, "Empty users");
        assert_eq!(
            config.presets[0].description.as_deref(),
            Some("Nobody signed up yet")
        );
        assert_eq!(config.presets[0].scenarios["users"], "empty");
        assert_eq!(
            config.settings.base_url.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(config.settings.state_dir, PathBuf::from(".mock-scenarios"));
        assert!(config.settings.log_matches);
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let yaml = r#"
handlers:
  - key: a
    url: /a
  - key: a
    url: /b
"#;
        let err = MockScenariosConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate handler key"));
    }

    #[test]
    fn test_rejects_unknown_default() {
        let yaml = r#"
handlers:
  - key: a
    url: /a
    default_scenario: missing
    scenarios:
      ok: {}
"#;
        assert!(MockScenariosConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unmanaged_method() {
        let yaml = r#"
handlers:
  - key: a
    url: /a
    method: options
"#;
        assert!(MockScenariosConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_bad_status() {
        let yaml = r#"
handlers:
  - key: a
    url: /a
    scenarios:
      broken:
        status: 42
"#;
        assert!(MockScenariosConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_response_body_to_bytes() {
        let text = ResponseBody::Text {
            content: "hello".to_string(),
        };
        assert_eq!(text.to_bytes().unwrap(), b"hello");

        let b64 = ResponseBody::Base64 {
            content: "aGk=".to_string(),
        };
        assert_eq!(b64.to_bytes().unwrap(), b"hi");
        assert_eq!(b64.content_type(), "application/octet-stream");
    }
}
