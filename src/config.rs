use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

/// Runtime knobs. Defaults match what real devices tolerate on a home LAN.
#[derive(Debug, Clone)]
pub struct Settings {
    pub env_file: PathBuf,
    /// How long discovery listens for broadcast replies.
    pub discovery_timeout: Duration,
    /// Connect and add-device timeout.
    pub timeout: Duration,
    /// State refresh during discovery and toggling.
    pub update_timeout: Duration,
    /// Per-device timeout inside all-on/all-off/refresh.
    pub batch_timeout: Duration,
    pub batch_settle: Duration,
    pub toggle_settle: Duration,
    pub concurrency: usize,
    pub port: u16,
    pub broadcast: Ipv4Addr,
    pub shutdown_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            env_file: PathBuf::from(".env"),
            discovery_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            update_timeout: Duration::from_secs(15),
            batch_timeout: Duration::from_secs(10),
            batch_settle: Duration::from_secs(1),
            toggle_settle: Duration::from_millis(500),
            concurrency: 8,
            port: crate::protocol::PORT,
            broadcast: Ipv4Addr::BROADCAST,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
