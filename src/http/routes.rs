//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::game::WorldSnapshot;
use crate::util::time::{unix_millis, uptime_secs};
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CLIENT_ORIGIN is `*` or a comma separated list of origins
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.trim() == "*" {
        return AllowOrigin::any();
    }
    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: u64,
    tick_count: u64,
    simulation_running: bool,
    #[serde(flatten)]
    world: WorldSnapshot,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.world.stats();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        server_time: unix_millis(),
        tick_count: stats.tick_count(),
        simulation_running: stats.is_running(),
        world: state.world.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::registry::DEFAULT_INACTIVITY_TIMEOUT;
    use crate::game::zone::default_layout;
    use crate::game::{PlayerRegistry, Services, World, WorldState, ZoneIndex};
    use crate::services::{BinaryChatFormatter, JwtAuthenticator, PassiveRules};
    use crate::store::InMemoryCharacterStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> AppState {
        let store = Arc::new(InMemoryCharacterStore::new());
        let services = Services {
            auth: Arc::new(JwtAuthenticator::new("s", store.clone())),
            rules: Arc::new(PassiveRules),
            chat: Arc::new(BinaryChatFormatter),
            store,
        };
        let world = WorldState::new(
            PlayerRegistry::new(1, DEFAULT_INACTIVITY_TIMEOUT),
            ZoneIndex::from_definitions(default_layout()).unwrap(),
        );
        let (_world, handle) = World::new(world, services);
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            log_json: false,
            tick_rate_hz: 20,
            inactivity_timeout: Duration::from_secs(30),
            starting_zone_id: 1,
            zones_path: None,
            auth_jwt_secret: "s".to_string(),
            supabase: None,
            packet_rate_limit: 60,
            outbound_queue_capacity: 16,
            client_origin: "*".to_string(),
        };
        AppState::new(config, handle)
    }

    #[tokio::test]
    async fn health_reports_world_state() {
        let Json(health) = health_handler(State(state())).await;
        let body = serde_json::to_value(&health).unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["tick_count"], 0);
        assert_eq!(body["simulation_running"], false);
        assert_eq!(body["players"], 0);
        assert_eq!(body["zones"].as_array().unwrap().len(), 3);
        assert_eq!(body["zones"][0]["name"], "town");
    }
}
