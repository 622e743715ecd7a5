use std::io;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Transport;

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmissions: u64,
    pub resend_requests: u64,
    pub resends_served: u64,
    pub reconstructions: u64,
    pub queue_overflows: u64,
    pub unknown_packets: u64,
}

impl NetworkStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub seed: Option<u64>,
}

impl PacketLossSimulation {
    pub fn with_loss(loss_percent: f32) -> Self {
        Self {
            enabled: loss_percent > 0.0,
            loss_percent,
            seed: None,
        }
    }
}

/// Wraps a transport and loses a share of its outbound datagrams.
pub struct LossyTransport<T> {
    inner: T,
    sim: PacketLossSimulation,
    rng: StdRng,
    dropped: u64,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, sim: PacketLossSimulation) -> Self {
        let rng = match sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner,
            sim,
            rng,
            dropped: 0,
        }
    }

    pub fn should_drop(&mut self) -> bool {
        if !self.sim.enabled || self.sim.loss_percent <= 0.0 {
            return false;
        }
        self.rng.gen_range(0.0..100.0) < self.sim.loss_percent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<SocketAddr> {
        self.inner.resolve(host, port)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.should_drop() {
            self.dropped += 1;
            log::trace!("simulated loss of {} byte datagram", data.len());
            return Ok(data.len());
        }
        self.inner.send(data)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.inner.try_receive(buf)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
