//! Mock Scenarios - CLI Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use mock_scenarios::registry::base_url_resolver;
use mock_scenarios::template::TemplateEngine;
use mock_scenarios::{
    define_handlers, definition_from_config, display_key, CustomOverride, FileStore,
    InterceptorChain, Method, MockRequest, MockScenariosConfig, Registry, RegistryOptions,
    SetupOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-scenarios",
    about = "Scenario registry for request mocking - switch mocked responses without code changes",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-scenarios.yaml")]
    config: PathBuf,

    /// Directory holding persisted state (overrides `settings.state_dir`)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List handlers with their active scenario, delay and override
    List,
    /// Select the active scenario of a handler
    Select { key: String, scenario: String },
    /// Set a handler's delay in milliseconds (0 = use the global delay)
    Delay { key: String, ms: u64 },
    /// Set the global delay in milliseconds
    GlobalDelay { ms: u64 },
    /// Force a handler to answer with a fixed body and status
    Override {
        key: String,
        body: String,
        #[arg(short, long, default_value_t = 200)]
        status: u16,
    },
    /// Remove a handler's override
    ClearOverride { key: String },
    /// Apply a preset, or list presets when no name is given
    Preset {
        name: Option<String>,
        /// Save the current selection under this name instead of applying
        #[arg(long)]
        save: bool,
    },
    /// Resolve one request through the registry and print the response
    Request {
        url: String,
        #[arg(short = 'X', long, default_value = "get")]
        method: Method,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Reset scenarios and overrides (or everything with --all)
    Reset {
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockScenariosConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no handlers)");
        MockScenariosConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} handlers, {} presets defined)",
            config.handlers.len(),
            config.presets.len()
        );
        return Ok(());
    }

    let state_dir = args
        .state_dir
        .unwrap_or_else(|| config.settings.state_dir.clone());
    let (registry, chain) = build_registry(&config, state_dir);

    match args.command.unwrap_or(Command::List) {
        Command::List => print_handlers(&registry),
        Command::Select { key, scenario } => {
            registry.set_active_scenario(&key, &scenario)?;
            println!("{} -> {}", display_key(&key), scenario);
        }
        Command::Delay { key, ms } => {
            registry.set_handler_delay(&key, ms)?;
            println!("{} delay: {}ms", display_key(&key), ms);
        }
        Command::GlobalDelay { ms } => {
            registry.set_global_delay(ms);
            println!("Global delay: {}ms", ms);
        }
        Command::Override { key, body, status } => {
            registry.set_override(
                &key,
                CustomOverride {
                    body,
                    status,
                    enabled: true,
                },
            )?;
            println!("{} overridden with status {}", display_key(&key), status);
        }
        Command::ClearOverride { key } => {
            if registry.clear_override(&key)? {
                println!("{} override cleared", display_key(&key));
            } else {
                println!("{} had no override", display_key(&key));
            }
        }
        Command::Preset { name: None, .. } => {
            for preset in registry.presets() {
                println!("{}", preset.name);
            }
            for preset in registry.custom_presets() {
                println!("{} (custom)", preset.name);
            }
        }
        Command::Preset {
            name: Some(name),
            save: true,
        } => {
            let preset = registry.capture_preset(&name, None);
            println!("Saved preset '{}' ({} handlers)", name, preset.scenarios.len());
        }
        Command::Preset {
            name: Some(name),
            save: false,
        } => {
            if !registry.apply_preset(&name) {
                anyhow::bail!("Unknown preset: {}", name);
            }
            print_handlers(&registry);
        }
        Command::Request { url, method, body } => {
            let mut request = MockRequest::new(method.as_upper(), url);
            if let Some(body) = body {
                request = match serde_json::from_str::<serde_json::Value>(&body) {
                    Ok(json) => request.with_json(&json),
                    Err(_) => request.with_body(body),
                };
            }

            match chain.dispatch(&request).await {
                Some(response) => {
                    println!("{}", response.status);
                    let mut headers: Vec<_> = response.headers.iter().collect();
                    headers.sort();
                    for (name, value) in headers {
                        println!("{}: {}", name, value);
                    }
                    if !response.body.is_empty() {
                        println!();
                        println!("{}", response.body_text());
                    }
                }
                None => anyhow::bail!("No handler matched {} {}", request.method, request.url),
            }
        }
        Command::Reset { all: false } => {
            registry.reset_scenarios();
            println!("Scenarios and overrides reset");
        }
        Command::Reset { all: true } => {
            registry.reset_all();
            println!("All state reset");
        }
    }

    Ok(())
}

/// Registry over the file store, with configured handlers installed in an
/// in-process interceptor chain and discovered from there.
fn build_registry(config: &MockScenariosConfig, state_dir: PathBuf) -> (Registry, Arc<InterceptorChain>) {
    let settings = &config.settings;
    let store = Arc::new(FileStore::new(state_dir));
    let registry = Registry::with_options(
        store,
        RegistryOptions {
            log_matches: settings.log_matches,
            ..Default::default()
        },
    );
    registry.define_presets(config.presets.iter().cloned());

    let engine = Arc::new(TemplateEngine::new());
    let definitions = config
        .handlers
        .iter()
        .map(|h| definition_from_config(h, engine.clone(), &settings.default_content_type));
    let chain = Arc::new(InterceptorChain::new(define_handlers(definitions)));

    registry.setup(
        chain.clone(),
        SetupOptions {
            url_resolver: settings.base_url.clone().map(base_url_resolver),
            ..Default::default()
        },
    );

    (registry, chain)
}

fn print_handlers(registry: &Registry) {
    let state = registry.state();
    for handler in registry.handlers() {
        let active = state
            .active_scenarios
            .get(&handler.key)
            .map(String::as_str)
            .unwrap_or(&handler.default_scenario);
        let delay = state.handler_delays.get(&handler.key).copied().unwrap_or(0);
        let overridden = state
            .overrides
            .get(&handler.key)
            .is_some_and(|o| o.enabled);

        println!(
            "{:<8} {:<32} {:<16} delay={}ms{}",
            handler.method,
            display_key(&handler.key),
            active,
            delay,
            if overridden { " [override]" } else { "" }
        );
        println!("         scenarios: {}", handler.scenarios.join(", "));
    }
    if state.global_delay > 0 {
        println!("global delay: {}ms", state.global_delay);
    }
}
