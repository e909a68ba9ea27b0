use std::net::{IpAddr, Ipv4Addr};

use spacesync::{DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT};

/// Player ids are one byte and 0 is reserved for the unstamped frame.
pub const MAX_PLAYER_ID: u8 = 254;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub control_port: u16,
    pub data_port: u16,
    /// Address put into `transport_created`. Defaults to the address the
    /// client's control connection arrived on.
    pub public_ip: Option<IpAddr>,
    pub max_players: usize,
    /// Connections that have not joined a space by then are dropped.
    pub join_timeout_secs: u64,
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            public_ip: None,
            max_players: MAX_PLAYER_ID as usize,
            join_timeout_secs: 10,
            stats_interval_secs: 30,
        }
    }
}
