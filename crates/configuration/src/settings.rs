use crate::error::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
/// Every section is optional in the TOML file; missing values fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub hub: HubSettings,
    pub telemetry: TelemetrySettings,
    pub logging: LoggingSettings,
}

/// Where dashboard clients connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
}

/// The chain node the head monitor talks to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// WebSocket endpoint used for the `newHeads` subscription.
    pub ws_url: String,
    /// HTTP JSON-RPC endpoint used for block detail and fee lookups.
    pub http_url: String,
    /// Upper bound on a single block-detail + fee fetch.
    pub request_timeout_ms: u64,
    /// First delay after the subscription drops. Doubles on every failed attempt.
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

/// Fan-out limits applied to every client connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Frames queued per client before it is considered too slow and dropped.
    pub client_buffer: usize,
    /// Upper bound on a single socket write.
    pub write_timeout_ms: u64,
}

/// Parameters for the timer-driven profit telemetry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Number of recent deltas kept in the rolling window.
    pub window: usize,
    /// A tick whose delta is at or below `-profit_drop_threshold` emits a PROFIT_DROP.
    pub profit_drop_threshold: Decimal,
    /// Capital the PnL is measured against when computing drawdown.
    pub starting_equity: Decimal,
    /// Drawdown from the session peak (0.25 = 25%) that raises a critical alert.
    pub max_drawdown_pct: Decimal,
    /// Largest absolute step of the synthetic PnL walk.
    pub synthetic_step: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

// --- Default Implementations ---

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8546".to_string(),
            http_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_ms: 10_000,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            write_timeout_ms: 5_000,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            window: 20,
            profit_drop_threshold: Decimal::from(5),
            starting_equity: Decimal::from(10_000),
            max_drawdown_pct: Decimal::new(25, 2),
            synthetic_step: Decimal::from(3),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "blockpulse.log".to_string(),
        }
    }
}

impl UpstreamSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl HubSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl TelemetrySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Settings {
    /// Rejects values that would make a component spin, stall or never fire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.upstream.ws_url.trim().is_empty() {
            return invalid("upstream.ws_url must not be empty");
        }
        if self.upstream.http_url.trim().is_empty() {
            return invalid("upstream.http_url must not be empty");
        }
        if self.upstream.request_timeout_ms == 0 {
            return invalid("upstream.request_timeout_ms must be greater than zero");
        }
        if self.upstream.reconnect_initial_ms == 0 {
            return invalid("upstream.reconnect_initial_ms must be greater than zero");
        }
        if self.upstream.reconnect_max_ms < self.upstream.reconnect_initial_ms {
            return invalid("upstream.reconnect_max_ms must not be below reconnect_initial_ms");
        }
        if self.hub.client_buffer == 0 {
            return invalid("hub.client_buffer must be greater than zero");
        }
        if self.hub.write_timeout_ms == 0 {
            return invalid("hub.write_timeout_ms must be greater than zero");
        }
        if self.telemetry.interval_secs == 0 {
            return invalid("telemetry.interval_secs must be greater than zero");
        }
        if self.telemetry.window == 0 {
            return invalid("telemetry.window must be greater than zero");
        }
        if self.telemetry.profit_drop_threshold.is_sign_negative() {
            return invalid("telemetry.profit_drop_threshold must not be negative");
        }
        if self.telemetry.starting_equity <= Decimal::ZERO {
            return invalid("telemetry.starting_equity must be greater than zero");
        }
        if self.telemetry.max_drawdown_pct <= Decimal::ZERO
            || self.telemetry.max_drawdown_pct > Decimal::ONE
        {
            return invalid("telemetry.max_drawdown_pct must be within (0, 1]");
        }
        Ok(())
    }
}
