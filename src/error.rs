//! Error types.

/// Failures of the persistent state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on state entry '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rejected registry mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No handler registered under key '{0}'")]
    UnknownHandler(String),
    #[error("Handler '{key}' has no scenario named '{scenario}'")]
    UnknownScenario { key: String, scenario: String },
}
