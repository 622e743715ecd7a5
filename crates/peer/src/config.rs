use std::time::Duration;

use netplay::{NetConfig, PacketLossSimulation};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub net: NetConfig,
    pub tick_rate: u32,
    /// Stop after this many ticks. Runs until quit when `None`.
    pub max_ticks: Option<u32>,
    pub packet_loss: PacketLossSimulation,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            tick_rate: 35,
            max_ticks: None,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

impl PeerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
