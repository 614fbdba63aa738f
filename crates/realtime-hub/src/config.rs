//! Hub configuration, read the way the teacher's `main.rs` reads its own
//! settings — plain `std::env::var` calls with sane defaults, rather than
//! a config-file crate the teacher never pulled in.

use std::env;
use std::time::Duration;

use crate::hub::DEFAULT_OUTBOX_CAPACITY;

/// Default room-command queue capacity (spec §3).
pub const DEFAULT_ROOM_CMD_CAPACITY: usize = 100;
/// Default read size limit (spec §4.2.1).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;
/// Default keepalive probe interval — 0.9 * the read deadline (spec §4.2.2).
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Scopes bus channel names; two Hubs with different namespaces never
    /// observe each other on a shared broker.
    pub namespace: String,
    /// `host:port` the HTTP listener binds to (consumed by `demos/chat`,
    /// not by the Hub itself — the Hub has no opinion on transport).
    pub address: String,
    /// Path the upgrade handler is routed at.
    pub path: String,
    /// `redis://` connection string for the cluster broker. `None`
    /// disables the cluster fabric entirely (single-node mode).
    pub broker_url: Option<String>,
    pub outbox_capacity: usize,
    pub room_cmd_capacity: usize,
    /// Maximum accepted size of a single inbound text frame (spec §4.2.1).
    pub max_frame_size: usize,
    /// Interval between keepalive pings on an otherwise idle writer (spec
    /// §4.2.2).
    pub keepalive_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_owned(),
            address: "0.0.0.0:8080".to_owned(),
            path: "/ws".to_owned(),
            broker_url: None,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            room_cmd_capacity: DEFAULT_ROOM_CMD_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

impl HubConfig {
    /// Reads `HUB_NAMESPACE`, `BIND_ADDR`, `HUB_PATH`, `BROKER_URL` (e.g.
    /// `redis://host:6379/0`), `HUB_OUTBOX_CAPACITY`,
    /// `HUB_ROOM_CMD_CAPACITY`, `HUB_MAX_FRAME_SIZE` (bytes) and
    /// `HUB_KEEPALIVE_SECS`, falling back to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("HUB_NAMESPACE").unwrap_or(defaults.namespace),
            address: env::var("BIND_ADDR").unwrap_or(defaults.address),
            path: env::var("HUB_PATH").unwrap_or(defaults.path),
            broker_url: env::var("BROKER_URL").ok(),
            outbox_capacity: env::var("HUB_OUTBOX_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.outbox_capacity),
            room_cmd_capacity: env::var("HUB_ROOM_CMD_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.room_cmd_capacity),
            max_frame_size: env::var("HUB_MAX_FRAME_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_frame_size),
            keepalive_interval: env::var("HUB_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_broker() {
        let config = HubConfig::default();
        assert!(config.broker_url.is_none());
        assert_eq!(config.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert_eq!(config.room_cmd_capacity, DEFAULT_ROOM_CMD_CAPACITY);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
    }
}
