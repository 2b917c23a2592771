//! Zone World Server - Authoritative tick-driven world server
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections carrying the binary packet protocol
//! - The world task: player registry, zones and the simulation loop
//! - Character loading and saving (Supabase or in-memory)
//! - A JSON health endpoint

mod app;
mod config;
mod game;
mod http;
mod services;
mod store;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::zone::{default_layout, load_definitions};
use crate::game::{PlayerRegistry, Services, World, WorldState, ZoneIndex};
use crate::http::build_router;
use crate::services::{BinaryChatFormatter, JwtAuthenticator, PassiveRules};
use crate::store::{
    CharacterStore, InMemoryCharacterStore, SupabaseCharacterStore, SupabaseClient,
};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Zone World Server");
    info!("Server address: {}", config.server_addr);

    // Load the world layout
    let definitions = match &config.zones_path {
        Some(path) => load_definitions(path)
            .with_context(|| format!("loading zones from {}", path.display()))?,
        None => default_layout(),
    };
    let zones = ZoneIndex::from_definitions(definitions)?;
    if !zones.contains_zone(config.starting_zone_id) {
        anyhow::bail!(
            "STARTING_ZONE_ID {} is not a defined zone",
            config.starting_zone_id
        );
    }
    info!(zones = zones.zones().count(), "World layout loaded");

    // Character storage
    let store: Arc<dyn CharacterStore> = match &config.supabase {
        Some(supabase) => {
            info!("Using Supabase character store");
            let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
            Arc::new(SupabaseCharacterStore::new(client))
        }
        None => {
            warn!("SUPABASE_URL not set, characters are kept in memory");
            Arc::new(InMemoryCharacterStore::new())
        }
    };

    let services = Services {
        auth: Arc::new(JwtAuthenticator::new(&config.auth_jwt_secret, store.clone())),
        rules: Arc::new(PassiveRules),
        chat: Arc::new(BinaryChatFormatter),
        store,
    };

    // Spawn the world task
    let state = WorldState::new(
        PlayerRegistry::new(config.starting_zone_id, config.inactivity_timeout),
        zones,
    );
    let (world, world_handle) = World::new(state, services);
    let world_task = tokio::spawn(world.run());
    world_handle.start_simulation(config.tick_rate_hz).await?;

    // Build router
    let router = build_router(AppState::new(config.clone(), world_handle.clone()));

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close remaining connections and save characters
    if world_handle.shutdown().await.is_ok() {
        world_task.await?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
