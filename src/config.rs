use std::time::Duration;

/// Process configuration, sourced from the environment.
///
/// Parsing itself is an ambient concern external to the core bridge (the
/// three subsystems in `spec.md` never read `std::env` directly) but every
/// one of them is constructed from a `Config`, so the shape lives here
/// rather than in `main.rs`, mirroring `bin-shared::HealthCheckArgs`'
/// `clap::Args` + `env` idiom.
#[derive(clap::Parser, Debug, Clone)]
#[command(name = "dmx-artnet-bridge")]
pub struct Config {
    /// Port the external HTTP surface (healthz/readyz/metrics/websocket) listens on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// `tracing-subscriber` `EnvFilter` directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Timeout applied to the external HTTP surface's requests.
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 30)]
    pub http_timeout_seconds: u64,

    /// Advertised in ArtPollReply, NUL-padded to 18 bytes on the wire.
    #[arg(long, env = "ARTNET_SHORT_NAME", default_value = "DMX Viewer")]
    pub artnet_short_name: String,

    /// Advertised in ArtPollReply, NUL-padded to 64 bytes on the wire.
    #[arg(
        long,
        env = "ARTNET_LONG_NAME",
        default_value = "DMX Viewer Application"
    )]
    pub artnet_long_name: String,

    /// Interval between outbound ArtPoll broadcasts.
    #[arg(long, env = "ARTNET_POLL_INTERVAL_SECONDS", default_value_t = 5)]
    pub artnet_poll_interval_seconds: u64,

    /// Capacity shared by the receive and send queues. Non-positive values
    /// (encoded here as 0, since the field is unsigned) fall back to the
    /// default, matching the Go constructor's clamp.
    #[arg(long, env = "ARTNET_CHANNEL_BUFFER_SIZE", default_value_t = 1000)]
    pub artnet_channel_buffer_size: usize,

    #[arg(long, env = "NTP_ENABLED", default_value_t = false)]
    pub ntp_enabled: bool,

    #[arg(long, env = "NTP_SERVER", default_value = "pool.ntp.org")]
    pub ntp_server: String,

    #[arg(long, env = "NTP_UPDATE_INTERVAL_MINUTES", default_value_t = 60)]
    pub ntp_update_interval_minutes: u64,

    #[arg(long, env = "NTP_RETRY_COUNT", default_value_t = 3)]
    pub ntp_retry_count: u32,
}

pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

impl Config {
    /// Channel buffer size with the "values <= 0 replaced by default" rule
    /// from `spec.md` §6 applied.
    pub fn channel_buffer_size(&self) -> usize {
        if self.artnet_channel_buffer_size == 0 {
            DEFAULT_CHANNEL_BUFFER_SIZE
        } else {
            self.artnet_channel_buffer_size
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.artnet_poll_interval_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["dmx-artnet-bridge"]);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.artnet_poll_interval_seconds, 5);
        assert_eq!(cfg.channel_buffer_size(), 1000);
    }

    #[test]
    fn zero_buffer_size_falls_back_to_default() {
        let mut cfg = Config::parse_from(["dmx-artnet-bridge"]);
        cfg.artnet_channel_buffer_size = 0;
        assert_eq!(cfg.channel_buffer_size(), DEFAULT_CHANNEL_BUFFER_SIZE);
    }
}
