//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::ZoneId;
use crate::util::rate_limit::PACKET_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of text (LOG_FORMAT=json)
    pub log_json: bool,

    /// Simulation ticks per second
    pub tick_rate_hz: u32,
    /// Idle time before a player is disconnected
    pub inactivity_timeout: Duration,
    /// Zone every new connection starts in
    pub starting_zone_id: ZoneId,
    /// JSON zone definitions; the built-in layout is used when unset
    pub zones_path: Option<PathBuf>,

    /// HS256 secret for AUTH tokens
    pub auth_jwt_secret: String,
    /// Supabase project URL and service role key; both set enables the Supabase store
    pub supabase: Option<SupabaseConfig>,

    /// Inbound packets per second per connection
    pub packet_rate_limit: u32,
    /// Frames queued per connection before new ones are dropped
    pub outbound_queue_capacity: usize,
    /// Allowed client origins for CORS, comma separated, `*` for any
    pub client_origin: String,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Some(port) = var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string())
        };

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        let tick_rate_hz: u32 = parse_or(&var, "TICK_RATE_HZ", 20)?;
        if tick_rate_hz == 0 || tick_rate_hz > 1000 {
            return Err(ConfigError::Invalid("TICK_RATE_HZ"));
        }

        let outbound_queue_capacity: usize = parse_or(&var, "OUTBOUND_QUEUE_CAPACITY", 256)?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE_CAPACITY"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: match var("LOG_FORMAT").as_deref() {
                None | Some("text") => false,
                Some("json") => true,
                Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
            },

            tick_rate_hz,
            inactivity_timeout: Duration::from_millis(parse_or(
                &var,
                "INACTIVITY_TIMEOUT_MS",
                30_000,
            )?),
            starting_zone_id: parse_or(&var, "STARTING_ZONE_ID", 1)?,
            zones_path: var("ZONES_PATH").map(PathBuf::from),

            auth_jwt_secret: var("AUTH_JWT_SECRET")
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?,
            supabase,

            packet_rate_limit: parse_or(&var, "PACKET_RATE_LIMIT", PACKET_RATE_LIMIT)?,
            outbound_queue_capacity,
            client_origin: var("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
        })
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
