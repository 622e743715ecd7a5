use std::collections::VecDeque;

use netplay::{
    Activity, HandshakeState, LossyTransport, NetError, NetResult, NetworkStats, PacketKind,
    Session, SystemClock, Transport, UdpTransport,
};

use crate::config::PeerConfig;
use crate::events::PeerEvent;
use crate::simulation::{DemoState, scripted_buttons};

pub type PeerTransport = LossyTransport<UdpTransport>;

/// Drives one side of a lockstep session: every tick it contributes a local
/// state and consumes the opponent's state from `delay` ticks earlier.
pub struct LockstepPeer<T: Transport> {
    session: Session<T, SystemClock>,
    local: DemoState,
    remote: Option<DemoState>,
    tick: u32,
    pending_events: VecDeque<PeerEvent>,
}

#[derive(Debug, Clone)]
pub struct PeerStats {
    pub tick: u32,
    pub player: u16,
    pub opponent: String,
    pub delay: u16,
    pub state: HandshakeState,
    pub local: DemoState,
    pub remote: Option<DemoState>,
    pub network_stats: NetworkStats,
}

impl LockstepPeer<PeerTransport> {
    pub fn open(config: &PeerConfig) -> NetResult<Self> {
        let udp = UdpTransport::open(config.net.local_port)?;
        let transport = LossyTransport::new(udp, config.packet_loss.clone());
        let session = Session::with_transport(transport, SystemClock::new(), config.net.clone())?;
        Ok(Self::new(session))
    }

    pub fn local_port(&self) -> u16 {
        self.session.transport().inner().local_addr().port()
    }
}

impl<T: Transport> LockstepPeer<T> {
    pub fn new(session: Session<T, SystemClock>) -> Self {
        let player = session.config().player_number;
        Self {
            session,
            local: DemoState::new(player),
            remote: None,
            tick: 0,
            pending_events: VecDeque::new(),
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn connect<F>(&mut self, cancel: F) -> NetResult<()>
    where
        F: FnMut() -> bool,
    {
        self.session.connect_with(cancel).inspect_err(|e| self.report(e))?;

        let connection = self.session.connection();
        self.pending_events.push_back(PeerEvent::Connected {
            opponent: connection.opponent_name.clone(),
            episodes: connection.episodes,
        });
        Ok(())
    }

    /// Services reliable traffic, then exchanges one state.
    pub fn tick_once(&mut self) -> NetResult<()> {
        self.service_messages().inspect_err(|e| self.report(e))?;

        let buttons = scripted_buttons(self.tick, self.local.player);
        self.local = self.local.advance(buttons);

        let payload = self.session.state_prepare();
        payload.copy_from_slice(bytemuck::bytes_of(&self.local));
        self.session.state_send().inspect_err(|e| self.report(e))?;

        if self.session.state_update().inspect_err(|e| self.report(e))? {
            self.accept_remote_state();
        }

        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    /// Sends our current tick as a reliable DETAILS message.
    pub fn send_details(&mut self) -> NetResult<()> {
        let packet = self.session.prepare(PacketKind::Details);
        packet.write_u16(4, (self.tick >> 16) as u16);
        packet.write_u16(6, self.tick as u16);
        self.session.send(8)
    }

    pub fn quit(&mut self) -> NetError {
        let err = self.session.quit();
        self.report(&err);
        err
    }

    pub fn stats(&self) -> PeerStats {
        let connection = self.session.connection();
        PeerStats {
            tick: self.tick,
            player: connection.player_number,
            opponent: connection.opponent_name.clone(),
            delay: connection.network_delay,
            state: connection.state,
            local: self.local,
            remote: self.remote,
            network_stats: self.session.stats().clone(),
        }
    }

    fn service_messages(&mut self) -> NetResult<()> {
        loop {
            match self.session.check() {
                Ok(Activity::Handled) => continue,
                Ok(Activity::Idle) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.pending_events.push_back(PeerEvent::Error {
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        while let Some(message) = self.session.next_message() {
            match message.kind() {
                Some(PacketKind::Details) if message.len() >= 8 => {
                    let tick =
                        u32::from(message.read_u16(4)) << 16 | u32::from(message.read_u16(6));
                    self.pending_events.push_back(PeerEvent::Details { tick });
                }
                // the handshake's trailing CONNECT
                Some(PacketKind::Connect) => {}
                other => log::debug!("ignoring reliable message {:?}", other),
            }
        }
        Ok(())
    }

    fn accept_remote_state(&mut self) {
        let Some(payload) = self.session.state_payload() else {
            return;
        };

        let remote = match bytemuck::try_pod_read_unaligned::<DemoState>(payload) {
            Ok(remote) => remote,
            Err(e) => {
                self.pending_events.push_back(PeerEvent::Error {
                    message: format!("unreadable state: {:?}", e),
                });
                return;
            }
        };

        let expected = self.session.state_in_sequence();
        if !remote.is_intact() {
            self.pending_events.push_back(PeerEvent::Desync {
                tick: remote.tick,
                reason: "checksum mismatch",
            });
        } else if remote.tick.wrapping_sub(1) as u16 != expected {
            self.pending_events.push_back(PeerEvent::Desync {
                tick: remote.tick,
                reason: "state out of step",
            });
        }

        self.remote = Some(remote);
    }

    fn report(&mut self, err: &NetError) {
        let event = match err.halt_reason() {
            Some(reason) => PeerEvent::Halted { reason },
            None => PeerEvent::Error {
                message: err.to_string(),
            },
        };
        self.pending_events.push_back(event);
    }
}
