//! ModelGate gateway binary (§6): loads configuration, builds the
//! dispatcher, and serves the chat and metrics HTTP ports until signalled
//! to stop.
//!
//! There is no production `DataAccessPort` wired in here — a real tenant
//! database is an external collaborator per the core crate's docs. This
//! binary always runs against [`modelgate_core::InMemoryTenantStore`],
//! optionally bootstrapped from a seed file (`--seed`) that describes demo
//! tenants, role policies, and credentials. That makes this binary both the
//! CLI's standalone mode and, today, its only mode.

mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gateway_config::Settings;
use modelgate_core::tool_catalog::NoopToolCatalogClient;
use modelgate_core::{Dispatcher, InMemoryApiKeyDirectory, InMemoryTenantStore};
use modelgate_http::AppState;

/// Serves the ModelGate chat and metrics HTTP ports.
#[derive(Parser, Debug)]
#[command(name = "modelgate")]
#[command(about = "ModelGate — multi-tenant LLM gateway")]
struct Args {
    /// TOML file of `[providers.<name>]` tables (§3 `ProviderConfig`).
    #[arg(long, env = "MODELGATE_PROVIDER_CONFIG", value_name = "PATH")]
    provider_config: Option<PathBuf>,

    /// TOML file seeding demo tenants, role policies, and credentials into
    /// the in-memory tenant store (standalone mode only).
    #[arg(long, env = "MODELGATE_SEED_FILE", value_name = "PATH")]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = gateway_config::load_and_apply("modelgate", None) {
        tracing::warn!(%err, "failed to load XDG/.env configuration, continuing with process environment only");
    }

    let args = Args::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(%err, "refusing to start");
            std::process::exit(1);
        }
    };

    let provider_configs = match &args.provider_config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(src) => match gateway_config::parse_provider_configs(&src) {
                Ok(map) => map.into_values().collect::<Vec<_>>(),
                Err(err) => {
                    tracing::error!(%err, path = %path.display(), "failed to parse provider config");
                    std::process::exit(1);
                }
            },
            Err(err) => {
                tracing::error!(%err, path = %path.display(), "failed to read provider config");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("no --provider-config given; dispatcher has no providers configured");
            Vec::new()
        }
    };

    let store = Arc::new(InMemoryTenantStore::new());
    let directory = Arc::new(InMemoryApiKeyDirectory::new(store.clone()));

    if let Some(path) = &args.seed {
        match std::fs::read_to_string(path) {
            Ok(src) => {
                if let Err(err) = seed::apply(&src, &store, &directory, &settings.master_key) {
                    tracing::error!(%err, path = %path.display(), "failed to apply seed file");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                tracing::error!(%err, path = %path.display(), "failed to read seed file");
                std::process::exit(1);
            }
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(
        provider_configs,
        settings.master_key.clone(),
        Arc::new(NoopToolCatalogClient),
    ));
    let state = Arc::new(AppState {
        dispatcher,
        api_keys: directory,
    });

    let chat = modelgate_http::run_chat_server(settings.chat_listen_addr, state.clone());
    let metrics = modelgate_http::run_metrics_server(settings.metrics_listen_addr);

    if let Err(err) = tokio::try_join!(chat, metrics) {
        tracing::error!(%err, "gateway exited with an error");
        std::process::exit(1);
    }
}
