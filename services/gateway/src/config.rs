use feed::FeedConfig;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

/// Gateway settings, read from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub feed: FeedConfig,
    /// Largest interest declaration accepted from one client.
    pub max_interest_keys: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            feed: FeedConfig::default(),
            max_interest_keys: 1000,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Missing or unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            addr: setting(&lookup, "GATEWAY_ADDR", defaults.addr),
            feed: FeedConfig {
                debounce_ms: setting(&lookup, "FEED_DEBOUNCE_MS", defaults.feed.debounce_ms),
                heartbeat_interval_ms: setting(
                    &lookup,
                    "FEED_HEARTBEAT_INTERVAL_MS",
                    defaults.feed.heartbeat_interval_ms,
                ),
                send_timeout_ms: setting(
                    &lookup,
                    "FEED_SEND_TIMEOUT_MS",
                    defaults.feed.send_timeout_ms,
                ),
            },
            max_interest_keys: setting(
                &lookup,
                "GATEWAY_MAX_INTEREST_KEYS",
                defaults.max_interest_keys,
            ),
        }
    }
}

fn setting<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, fallback: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(var = name, value = %raw, error = %e, "Ignoring unparsable setting");
                fallback
            }
        },
        None => fallback,
    }
}
