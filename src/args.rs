use clap::Parser;

use crate::config::parse_key_value;
use crate::constants::{
    DEFAULT_LISTEN_ADDRESS, DEFAULT_MAX_REWARD_GROUPS, DEFAULT_REWARD_GROUP,
    DEFAULT_TELEMETRY_PATH, UNKNOWN_REWARD_GROUP,
};
use crate::util::tracing::LogFormat;

/// Prometheus exporter for Twitch channel and EventSub metrics.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Address on which to expose metrics and the EventSub callback
    #[arg(long = "web.listen-address", env = "TWITCH_EXPORTER_LISTEN_ADDRESS", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: String,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", env = "TWITCH_EXPORTER_TELEMETRY_PATH", default_value = DEFAULT_TELEMETRY_PATH)]
    pub telemetry_path: String,

    /// Client ID for the Twitch Helix API
    #[arg(long = "twitch.client-id", env = "TWITCH_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// Client secret for the Twitch Helix API
    #[arg(long = "twitch.client-secret", env = "TWITCH_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    /// User access token for the Twitch Helix API
    #[arg(long = "twitch.access-token", env = "TWITCH_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    pub access_token: String,

    /// Refresh token paired with the user access token
    #[arg(long = "twitch.refresh-token", env = "TWITCH_REFRESH_TOKEN", default_value = "", hide_env_values = true)]
    pub refresh_token: String,

    /// (Deprecated) Twitch channel to request metrics for. The first one is treated as the self
    /// channel when --twitch.self-channel is not set
    #[arg(long = "twitch.channel", env = "TWITCH_CHANNEL", value_delimiter = ',')]
    pub channel: Vec<String>,

    /// Your own Twitch channel login (role=self). Required for self-only metrics
    #[arg(long = "twitch.self-channel", env = "TWITCH_SELF_CHANNEL", default_value = "")]
    pub self_channel: String,

    /// A Twitch channel login to watch (role=watch). Repeatable; max 100
    #[arg(long = "twitch.watch-channel", env = "TWITCH_WATCH_CHANNELS", value_delimiter = ',')]
    pub watch_channel: Vec<String>,

    /// Reward group label for redemptions with an empty reward id and title
    #[arg(long = "twitch.reward-group.default", default_value = DEFAULT_REWARD_GROUP)]
    pub reward_group_default: String,

    /// Reward group label for rewards that are not mapped
    #[arg(long = "twitch.reward-group.unknown", default_value = UNKNOWN_REWARD_GROUP)]
    pub reward_group_unknown: String,

    /// Maximum number of distinct reward_group label values
    #[arg(long = "twitch.reward-group.max", default_value_t = DEFAULT_MAX_REWARD_GROUPS)]
    pub reward_group_max: usize,

    /// Map a reward id to a reward_group label (repeatable). Format: <reward_id>:<group>
    #[arg(long = "twitch.reward-group.id", value_parser = parse_key_value)]
    pub reward_group_id: Vec<(String, String)>,

    /// Map a reward title to a reward_group label (repeatable). Format: <reward_title>:<group>
    #[arg(long = "twitch.reward-group.title", value_parser = parse_key_value)]
    pub reward_group_title: Vec<(String, String)>,

    /// Enable the EventSub webhook endpoint
    #[arg(long = "eventsub.enabled", env = "TWITCH_EVENTSUB_ENABLED")]
    pub eventsub_enabled: bool,

    /// Public URL Twitch delivers EventSub callbacks to; it must reach this exporter's /eventsub route
    #[arg(long = "eventsub.webhook-url", env = "TWITCH_EVENTSUB_WEBHOOK_URL", default_value = "")]
    pub webhook_url: String,

    /// Secret of 10 to 100 characters used to sign EventSub deliveries
    #[arg(long = "eventsub.webhook-secret", env = "TWITCH_EVENTSUB_WEBHOOK_SECRET", default_value = "", hide_env_values = true)]
    pub webhook_secret: String,

    /// Enable a collector that is disabled by default (repeatable)
    #[arg(long = "collector.enable", value_name = "NAME")]
    pub collector_enable: Vec<String>,

    /// Disable a collector that is enabled by default (repeatable)
    #[arg(long = "collector.disable", value_name = "NAME")]
    pub collector_disable: Vec<String>,

    /// Minimum log level, or a full filter directive. RUST_LOG takes precedence
    #[arg(long = "log.level", env = "TWITCH_EXPORTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long = "log.format", env = "TWITCH_EXPORTER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Resolves the self channel and watch list, folding in the deprecated `--twitch.channel`
    /// values. Returns `(self_login, watch_logins)`.
    pub fn channels(&self) -> (String, Vec<String>) {
        let mut self_login = self.self_channel.trim().to_string();
        let mut watch = self.watch_channel.clone();

        let mut legacy = self.channel.iter().map(|c| c.trim()).filter(|c| !c.is_empty());
        if self_login.is_empty()
            && let Some(first) = legacy.next()
        {
            if self.channel.len() > 1 {
                tracing::warn!(
                    "multiple --twitch.channel values; treating the first as self and the rest as watch, prefer --twitch.self-channel/--twitch.watch-channel"
                );
            }
            self_login = first.to_string();
        }
        watch.extend(legacy.map(str::to_string));

        (self_login, watch)
    }

    /// The telemetry path, rooted.
    pub fn telemetry_path(&self) -> String {
        match self.telemetry_path.trim() {
            "" => DEFAULT_TELEMETRY_PATH.to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("twitch-exporter").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.listen_address, "0.0.0.0:9184");
        assert_eq!(cli.telemetry_path(), "/metrics");
        assert_eq!(cli.reward_group_max, 20);
        assert!(!cli.eventsub_enabled);
    }

    #[test]
    fn test_legacy_channels() {
        let cli = parse(&["--twitch.channel", "alice", "--twitch.channel", "bob", "--twitch.watch-channel", "carol"]);
        assert_eq!(cli.channels(), ("alice".to_string(), vec!["carol".to_string(), "bob".to_string()]));

        let cli = parse(&["--twitch.self-channel", "dave", "--twitch.channel", "alice"]);
        assert_eq!(cli.channels(), ("dave".to_string(), vec!["alice".to_string()]));
    }

    #[test]
    fn test_reward_group_mappings() {
        let cli = parse(&["--twitch.reward-group.id", "abc:vip", "--twitch.reward-group.title", "Hydrate:health"]);
        assert_eq!(cli.reward_group_id, vec![("abc".to_string(), "vip".to_string())]);
        assert_eq!(cli.reward_group_title, vec![("Hydrate".to_string(), "health".to_string())]);

        assert!(Cli::try_parse_from(["twitch-exporter", "--twitch.reward-group.id", "abc:"]).is_err());
    }

    #[test]
    fn test_telemetry_path_is_rooted() {
        let cli = parse(&["--web.telemetry-path", "probe"]);
        assert_eq!(cli.telemetry_path(), "/probe");
    }
}
