//! Mock Scenarios
//!
//! A scenario registry for request mocking. Each mocked endpoint gets a set
//! of named scenarios, and the registry decides per request which one answers,
//! persisting the selection so it survives restarts.
//!
//! # Features
//!
//! - **Scenarios**: Named responses per handler, plus a built-in `ServerError`
//! - **Overrides**: Force a stored body and status regardless of scenario
//! - **Custom Scenarios**: User-authored responses merged into a handler
//! - **Presets**: Switch many handlers at once
//! - **Latency Simulation**: Per-handler and global delays
//! - **Auto-Discovery**: Adopt interceptors that already exist in the mock layer
//! - **Activity Log**: The last 100 intercepted requests
//!
//! # Example Configuration
//!
//! ```yaml
//! handlers:
//!   - key: users
//!     url: /api/users
//!     method: get
//!     scenarios:
//!       default:
//!         status: 200
//!         body:
//!           type: json
//!           content: [{ id: 1, name: John }]
//!       empty:
//!         status: 200
//!         body:
//!           type: json
//!           content: []
//! presets:
//!   - name: Empty
//!     scenarios:
//!       users: empty
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod http;
pub mod layer;
pub mod log;
pub mod matcher;
mod pipeline;
pub mod preset;
pub mod producer;
pub mod registry;
pub mod state;
pub mod store;
pub mod template;

pub use builder::{define_handlers, definition_from_config, HandlerBuilder};
pub use config::MockScenariosConfig;
pub use error::{RegistryError, StoreError};
pub use http::{Method, MockRequest, MockResponse};
pub use layer::{Interceptor, InterceptorChain, MockLayer};
pub use log::LogEntry;
pub use preset::Preset;
pub use producer::{producer_fn, respond_with, RequestContext, ResponseProducer, SharedProducer};
pub use registry::{
    display_key, HandlerDefinition, HandlerMetadata, Registry, RegistryEvent, RegistryOptions,
    SetupOptions,
};
pub use state::{CustomOverride, CustomScenario};
pub use store::{FileStore, MemoryStore, StateStore};
