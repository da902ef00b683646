pub const API_HELIX_URL: &str = "https://api.twitch.tv/helix";
pub const API_OAUTH_URL: &str = "https://id.twitch.tv/oauth2";

pub const HMAC_PREFIX: &str = "sha256=";
pub const TWITCH_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub const TWITCH_MESSAGE_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub const TWITCH_MESSAGE_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub const TWITCH_MESSAGE_TYPE_HEADER: &str = "Twitch-Eventsub-Message-Type";

pub const EVENTSUB_ROUTE: &str = "/eventsub";
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9184";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// Prefix applied to every exposed metric family.
pub const NAMESPACE: &str = "twitch";

/// Helix caps `user_login` query params at 100 per request.
pub const HELIX_BATCH_SIZE: usize = 100;
pub const MAX_WATCH_CHANNELS: usize = 100;

pub const HTTP_TIMEOUT_SECS: u64 = 30;
pub const TOKEN_REFRESH_SECS: u64 = 24 * 60 * 60;

pub const STATUS_ENABLED: &str = "enabled";
pub const STATUS_VERIFICATION_PENDING: &str = "webhook_callback_verification_pending";

pub const DEFAULT_REWARD_GROUP: &str = "default";
pub const UNKNOWN_REWARD_GROUP: &str = "other";
pub const DEFAULT_MAX_REWARD_GROUPS: usize = 20;

/// Bounded set of OAuth scopes whose presence is reported as a gauge.
pub const KNOWN_USER_SCOPES: &[&str] = &[
    "bits:read",
    "channel:read:subscriptions",
    "channel:read:redemptions",
    "channel:read:ads",
    "channel:read:charity",
    "channel:read:goals",
    "channel:read:hype_train",
    "channel:read:polls",
    "channel:read:predictions",
    "moderator:read:followers",
    "moderator:read:chatters",
    "moderator:read:warnings",
    "moderation:read",
    "user:read:chat",
    "chat:read",
];
