// Environment-driven configuration.
//
// Every knob has a production-safe default so the gateway starts cleanly in
// development; `SIGNALING_ENV=production` tightens the upgrade gate (origin
// allow-list and token requirement become mandatory).

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub struct Config {
    pub addr: String,
    pub production: bool,
    pub allowed_origins: Vec<String>,
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: usize,

    pub connect_rate_max: u32,
    pub connect_rate_window: Duration,
    pub connect_rate_max_concurrent: u32,

    pub message_rate_capacity: u32,
    pub message_rate_window: Duration,

    pub heartbeat_interval: Duration,
    pub heartbeat_max_missed: u32,

    pub max_frame_bytes: usize,
    pub shutdown_drain: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let production = std::env::var("SIGNALING_ENV").map(|v| v == "production").unwrap_or(false);
        let allowed_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .or_else(|_| std::env::var("ALLOWED_ORIGINS"))
            .ok()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
            .unwrap_or_default();

        Self {
            addr: std::env::var("GATEWAY_ADDR").unwrap_or_else(|_| "0.0.0.0:7000".to_string()),
            production,
            allowed_origins,
            jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            token_ttl_secs: env_or("TOKEN_TTL_SECS", 300),

            connect_rate_max: env_or("CONNECT_RATE_MAX", 20),
            connect_rate_window: Duration::from_secs(env_or("CONNECT_RATE_WINDOW_SECS", 60)),
            connect_rate_max_concurrent: env_or("CONNECT_RATE_MAX_CONCURRENT", 20),

            message_rate_capacity: env_or("MESSAGE_RATE_CAPACITY", 100),
            message_rate_window: Duration::from_secs(env_or("MESSAGE_RATE_REFILL_SECS", 10)),

            heartbeat_interval: Duration::from_millis(env_or("HEARTBEAT_INTERVAL_MS", 30_000)),
            heartbeat_max_missed: env_or("HEARTBEAT_MAX_MISSED", 3),

            max_frame_bytes: env_or("MAX_FRAME_BYTES", 65_536),
            shutdown_drain: Duration::from_secs(env_or("SHUTDOWN_DRAIN_SECS", 5)),
        }
    }

    /// Origin allow-list match: exact hostname, or a single-level subdomain
    /// suffix (spec §4.3: `.host`). `allowed_origins` entries may be bare
    /// hostnames (`app.example`) or full origins (`https://app.example`);
    /// both are normalized down to a host before comparing.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return false;
        }
        let host = host_of(origin);
        self.allowed_origins.iter().map(|a| host_of(a)).any(|allowed| {
            if host == allowed {
                return true;
            }
            let suffix = format!(".{allowed}");
            match host.strip_suffix(suffix.as_str()) {
                Some(prefix) => !prefix.is_empty() && !prefix.contains('.'),
                None => false,
            }
        })
    }
}

/// Strip scheme and port from an origin/hostname string, lowercased.
fn host_of(s: &str) -> String {
    let without_scheme = s.split("://").last().unwrap_or(s);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = host.split(':').next().unwrap_or(host);
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(origins: &[&str]) -> Config {
        let mut c = Config::from_env();
        c.allowed_origins = origins.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn exact_origin_matches() {
        let c = config_with(&["https://app.example"]);
        assert!(c.origin_allowed("https://app.example"));
    }

    #[test]
    fn single_level_subdomain_matches() {
        let c = config_with(&["app.example"]);
        assert!(c.origin_allowed("https://chat.app.example"));
    }

    #[test]
    fn multi_level_subdomain_is_rejected() {
        let c = config_with(&["app.example"]);
        assert!(!c.origin_allowed("https://a.b.app.example"));
    }

    #[test]
    fn unrelated_origin_is_rejected() {
        let c = config_with(&["https://app.example"]);
        assert!(!c.origin_allowed("https://evil.example"));
    }

    #[test]
    fn empty_allow_list_rejects_everything() {
        let c = config_with(&[]);
        assert!(!c.origin_allowed("https://app.example"));
    }
}
