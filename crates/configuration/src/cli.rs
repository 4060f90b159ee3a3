use crate::settings::Settings;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Streams live chain-head telemetry to dashboard clients over WebSocket.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the TOML configuration file. A missing file is not an error.
    #[arg(long, short, env = "BLOCKPULSE_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Address the WebSocket server binds to (e.g., "0.0.0.0:8080").
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Upstream WebSocket endpoint for the `newHeads` subscription.
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Upstream HTTP JSON-RPC endpoint for block and fee lookups.
    #[arg(long)]
    pub http_url: Option<String>,

    /// Default log filter (e.g., "info", "debug,hyper=warn").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Disable the timer-driven profit telemetry.
    #[arg(long)]
    pub no_telemetry: bool,
}

impl CliArgs {
    /// Applies command-line overrides on top of the loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(bind) = self.bind {
            settings.server.bind_addr = bind;
        }
        if let Some(url) = &self.ws_url {
            settings.upstream.ws_url = url.clone();
        }
        if let Some(url) = &self.http_url {
            settings.upstream.http_url = url.clone();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.no_telemetry {
            settings.telemetry.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_what_was_given() {
        let args = CliArgs::parse_from([
            "blockpulse",
            "--bind",
            "127.0.0.1:9000",
            "--ws-url",
            "wss://node/ws",
            "--no-telemetry",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.server.bind_addr.port(), 9000);
        assert_eq!(settings.upstream.ws_url, "wss://node/ws");
        assert_eq!(settings.upstream.http_url, "http://127.0.0.1:8545");
        assert!(!settings.telemetry.enabled);
    }
}
