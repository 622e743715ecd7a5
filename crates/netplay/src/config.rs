use bitflags::bitflags;

use crate::error::NetError;
use crate::protocol::{DEFAULT_PORT, NET_PACKET_QUEUE};

/// Largest delay whose state windows still fit in the packet queues.
pub const MAX_NETWORK_DELAY: u16 = ((NET_PACKET_QUEUE - 2) / 2) as u16;
pub const DEFAULT_NETWORK_DELAY: u16 = 2;

bitflags! {
    /// Episodes a peer can play. The session plays only those both peers have.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Episodes: u16 {
        const EPISODE_1 = 1 << 0;
        const EPISODE_2 = 1 << 1;
        const EPISODE_3 = 1 << 2;
        const EPISODE_4 = 1 << 3;
        const EPISODE_5 = 1 << 4;
    }
}

impl Default for Episodes {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub local_port: u16,
    pub opponent_host: String,
    pub opponent_port: u16,
    pub player_name: String,
    pub player_number: u16,
    pub network_delay: u16,
    pub episodes: Episodes,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            local_port: DEFAULT_PORT,
            opponent_host: "localhost".to_string(),
            opponent_port: DEFAULT_PORT,
            player_name: String::new(),
            player_number: 1,
            network_delay: DEFAULT_NETWORK_DELAY,
            episodes: Episodes::default(),
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        if self.network_delay == 0 || self.network_delay > MAX_NETWORK_DELAY {
            return Err(NetError::InvalidDelay(self.network_delay));
        }
        Ok(())
    }
}
