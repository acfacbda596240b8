use serde::Deserialize;

use waypoint_core::net::protocol::MAX_MESSAGE_SIZE;

/// Top-level server configuration, loaded from `waypoint.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub store: StoreConfig,
    pub movement: MovementConfig,
    pub limits: LimitsConfig,
}

/// Player ledger location and sealing secret.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON ledger path. None = in-memory ledger.
    pub path: Option<String>,
    /// Secret used to seal session keys at rest.
    pub secret: Option<String>,
}

/// Movement validation parameters. Times are in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// The only non-zero velocity magnitude a client may report.
    pub speed: f64,
    /// Lower bound of the synchronous heartbeat window.
    pub sync_window_min: f64,
    /// Upper bound of the synchronous heartbeat window.
    pub sync_window_max: f64,
    /// Upper bound for vector-triggered updates.
    pub async_window_max: f64,
    /// A player is responsive while the time since its last heartbeat,
    /// rounded to tenths of a second, does not exceed this many tenths.
    pub responsive_tenths: u32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 1.5,
            sync_window_min: 0.49,
            sync_window_max: 0.5,
            async_window_max: 0.5,
            responsive_tenths: 5,
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    pub max_message_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            ws_rate_limit_per_sec: 50.0,
            player_message_buffer: 256,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Default listen address when none is configured.
    pub const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";

    pub fn listen_addr(&self) -> &str {
        if self.listen_addr.is_empty() {
            Self::DEFAULT_LISTEN_ADDR
        } else {
            &self.listen_addr
        }
    }

    /// Collect every configuration problem. Empty means valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.listen_addr().parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "listen_addr '{}' is not a valid socket address",
                self.listen_addr()
            ));
        }

        if self.store.path.is_some() && self.store.secret.is_none() {
            problems.push(
                "store.path is set but store.secret is missing (set WAYPOINT_DB_PASS)".to_string(),
            );
        }

        let m = &self.movement;
        if !(m.speed.is_finite() && m.speed > 0.0) {
            problems.push("movement.speed must be > 0".to_string());
        }
        if m.sync_window_min < 0.0 || m.sync_window_min > m.sync_window_max {
            problems.push(
                "movement.sync_window_min must be >= 0 and <= sync_window_max".to_string(),
            );
        }
        if m.async_window_max <= 0.0 {
            problems.push("movement.async_window_max must be > 0".to_string());
        }

        if self.limits.max_ws_connections == 0 {
            problems.push("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            problems.push("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        // A joining player is sent its init reply plus one add_player per
        // other connection before its writer drains anything.
        if self.limits.player_message_buffer <= self.limits.max_ws_connections {
            problems.push(format!(
                "limits.player_message_buffer ({}) must exceed limits.max_ws_connections ({})",
                self.limits.player_message_buffer, self.limits.max_ws_connections
            ));
        }
        if self.limits.max_message_size == 0 || self.limits.max_message_size > MAX_MESSAGE_SIZE {
            problems.push(format!(
                "limits.max_message_size must be between 1 and {MAX_MESSAGE_SIZE}"
            ));
        }

        problems
    }

    /// Validate configuration, logging each problem and exiting if any.
    pub fn validate(&self) {
        let problems = self.problems();
        for problem in &problems {
            tracing::error!("{problem}");
        }
        if !problems.is_empty() {
            std::process::exit(1);
        }

        if self.store.secret.is_some() && self.store.path.is_none() {
            tracing::warn!("store.secret is set but the ledger is in memory only");
        }
    }

    /// Load config from `waypoint.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("waypoint.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from waypoint.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse waypoint.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No waypoint.toml found, using defaults");
                ServerConfig::default()
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `WAYPOINT_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = var("WAYPOINT_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(path) = var("WAYPOINT_DB_PATH") {
            self.store.path = Some(path);
        }
        if let Some(secret) = var("WAYPOINT_DB_PASS") {
            self.store.secret = Some(secret);
        }
        if let Some(n) = var("WAYPOINT_MAX_WS_CONNECTIONS").and_then(|v| v.parse::<usize>().ok())
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(n) = var("WAYPOINT_WS_RATE_LIMIT").and_then(|v| v.parse::<f64>().ok()) {
            self.limits.ws_rate_limit_per_sec = n;
        }
    }
}
