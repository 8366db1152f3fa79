//! Hub configuration surface, loaded from environment variables. Precedence
//! (existing env > `.env` > XDG `config.toml`) is handled upstream by the
//! `config` crate; this module only shapes the already-merged environment
//! into a typed struct.

use std::net::IpAddr;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub host: IpAddr,
    pub port: u16,
    pub stream_port: u16,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub auth_token: Option<String>,
    pub localhost_bypass_auth: bool,
    pub sandbox_path: String,
    pub shared_providers: Vec<String>,
    pub http_api_url: Option<String>,
    pub signing_secret: String,
    pub rate_limit_messages_per_second: u32,
    pub schedule_max_per_agent: usize,
    pub stream_frame_quality: u8,
    pub stream_ack_high_water_mark: u32,
    pub hub_name: String,
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HUB_HOST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(IpAddr::from([127, 0, 0, 1])),
            port: env_u16("HUB_PORT", 8787),
            stream_port: env_u16("HUB_STREAM_PORT", 8788),
            tls_cert_file: std::env::var("HUB_TLS_CERT_FILE").ok(),
            tls_key_file: std::env::var("HUB_TLS_KEY_FILE").ok(),
            auth_token: std::env::var("HUB_AUTH_TOKEN").ok(),
            localhost_bypass_auth: env_bool("HUB_LOCALHOST_BYPASS_AUTH", true),
            sandbox_path: std::env::var("HUB_SANDBOX_PATH").unwrap_or_else(|_| "./sandbox".into()),
            shared_providers: std::env::var("HUB_SHARED_PROVIDERS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
            http_api_url: std::env::var("HUB_HTTP_API_URL").ok(),
            signing_secret: std::env::var("HUB_SIGNING_SECRET")
                .unwrap_or_else(|_| "insecure-dev-signing-secret".into()),
            rate_limit_messages_per_second: env_u32("HUB_RATE_LIMIT_MESSAGES_PER_SECOND", 100),
            schedule_max_per_agent: env_u32("HUB_SCHEDULE_MAX_PER_AGENT", 10) as usize,
            stream_frame_quality: env_u32("HUB_STREAM_FRAME_QUALITY", 40) as u8,
            stream_ack_high_water_mark: env_u32("HUB_STREAM_ACK_HIGH_WATER_MARK", 5),
            hub_name: std::env::var("HUB_NAME").unwrap_or_else(|_| "hub".into()),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_file.is_some() && self.tls_key_file.is_some()
    }

    /// True if a connection from `peer` should skip the `auth` handshake
    /// entirely: the bypass flag is set and the peer is loopback/private.
    pub fn localhost_bypass_auth_applies(&self, peer: IpAddr) -> bool {
        self.localhost_bypass_auth && hub_core::auth::is_local_address(peer)
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
