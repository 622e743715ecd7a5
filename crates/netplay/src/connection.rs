use std::net::SocketAddr;

use crate::clock::Clock;
use crate::config::{Episodes, NetConfig};
use crate::error::{HaltReason, NetError, NetResult};
use crate::protocol::{ConnectInfo, HEADER_LEN, NET_RETRY, NET_VERSION, PacketKind};
use crate::session::Session;
use crate::transport::Transport;

const HANDSHAKE_POLL_MS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Resolving,
    AwaitingPeerConnect,
    AwaitingSync,
    Connected,
    Quitting,
    Failed,
}

/// What is known about the opponent and where the session stands with it.
#[derive(Debug, Clone)]
pub struct Connection {
    pub player_number: u16,
    pub opponent_addr: Option<SocketAddr>,
    pub opponent_name: String,
    pub network_delay: u16,
    /// Episodes both peers can play. Only final once connected.
    pub episodes: Episodes,
    pub connected: bool,
    pub quit: bool,
    pub state: HandshakeState,
}

impl Connection {
    pub(crate) fn new(config: &NetConfig) -> Self {
        Self {
            player_number: config.player_number,
            opponent_addr: None,
            opponent_name: String::new(),
            network_delay: config.network_delay,
            episodes: config.episodes,
            connected: false,
            quit: false,
            state: HandshakeState::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    fn local_connect_info(&self) -> ConnectInfo {
        ConnectInfo {
            version: NET_VERSION,
            delay: self.config.network_delay,
            episodes: self.config.episodes.bits(),
            player: self.config.player_number,
            name: self.config.player_name.clone(),
        }
    }

    fn send_connect(&mut self, info: &ConnectInfo) {
        let len = info.write_into(self.prepare(PacketKind::Connect));
        if let Err(e) = self.send(len) {
            log::warn!("connect not queued: {}", e);
        }
    }

    fn front_is_connect(&self) -> bool {
        self.peek()
            .is_some_and(|p| p.kind() == Some(PacketKind::Connect))
    }

    /// Blocks until the opponent has connected and acknowledged us.
    pub fn connect(&mut self) -> NetResult<()> {
        self.connect_with(|| false)
    }

    /// Like [`Session::connect`], but gives up with a local quit as soon as
    /// `cancel` returns `true`.
    pub fn connect_with<F>(&mut self, mut cancel: F) -> NetResult<()>
    where
        F: FnMut() -> bool,
    {
        let local = self.local_connect_info();
        let host = self.config.opponent_host.clone();
        let port = self.config.opponent_port;

        self.connection.state = HandshakeState::Resolving;
        log::info!("resolving {}:{}", host, port);

        match self.link.transport.resolve(&host, port) {
            Ok(addr) => self.connection.opponent_addr = Some(addr),
            Err(e) => {
                log::error!("could not resolve opponent host {}: {}", host, e);
                return Err(self.halt(HaltReason::ConnectionFailed, false));
            }
        }

        'handshake: loop {
            self.send_connect(&local);
            self.connection.state = HandshakeState::AwaitingPeerConnect;
            log::info!("waiting for opponent...");

            loop {
                if cancel() {
                    return Err(self.halt(HaltReason::LocalQuit, false));
                }

                // the peer may take arbitrarily long to start
                self.last_in_tick = self.clock.ticks();

                if self.front_is_connect() {
                    break;
                }

                self.update();
                self.service()?;
                self.clock.sleep(HANDSHAKE_POLL_MS);
            }

            self.accept_peer_connect()?;
            self.connection.state = HandshakeState::AwaitingSync;

            while !self.is_sync() {
                if cancel() {
                    return Err(self.halt(HaltReason::LocalQuit, false));
                }

                if self.front_is_connect() {
                    self.accept_peer_connect()?;
                    continue;
                }

                self.service()?;

                if self.clock.elapsed_since(self.last_out_tick) > NET_RETRY {
                    continue 'handshake;
                }

                self.clock.sleep(HANDSHAKE_POLL_MS);
            }

            break;
        }

        // one more after syncing, in case the first exchange was all retries
        self.send_connect(&local);

        let now = self.clock.ticks();
        self.last_in_tick = now;
        self.keep_alive_tick = now;
        self.connection.connected = true;
        self.connection.state = HandshakeState::Connected;

        log::info!(
            "connected to {} at {}",
            self.connection.opponent_name,
            host
        );
        Ok(())
    }

    fn accept_peer_connect(&mut self) -> NetResult<()> {
        let parsed = match self.peek() {
            Some(packet) => ConnectInfo::parse(packet),
            None => return Ok(()),
        };

        match parsed {
            Ok(info) => {
                self.validate_peer(&info)?;
                self.connection.episodes =
                    self.config.episodes & Episodes::from_bits_truncate(info.episodes);
                self.connection.opponent_name = info.name;
            }
            Err(e) => log::warn!("malformed connect from opponent: {}", e),
        }

        self.update();
        Ok(())
    }

    /// Halts the session if the opponent's parameters are incompatible with ours.
    pub(crate) fn validate_peer(&mut self, info: &ConnectInfo) -> NetResult<()> {
        let reason = if info.version != NET_VERSION {
            log::error!(
                "network version did not match opponent's ({} != {})",
                NET_VERSION,
                info.version
            );
            HaltReason::VersionMismatch
        } else if info.delay != self.config.network_delay {
            log::error!(
                "network delay did not match opponent's ({} != {})",
                self.config.network_delay,
                info.delay
            );
            HaltReason::DelayMismatch
        } else if info.player == self.config.player_number {
            log::error!("player number conflicts with opponent's ({})", info.player);
            HaltReason::PlayerConflict
        } else {
            return Ok(());
        };

        Err(self.halt(reason, true))
    }

    /// Ends the session and releases the transport.
    ///
    /// With `attempt_sync`, keeps servicing the link until everything queued
    /// has been acknowledged or the peer stops answering. Only the first call
    /// does anything; later calls report the original reason.
    pub fn halt(&mut self, reason: HaltReason, attempt_sync: bool) -> NetError {
        if let Some(previous) = self.halt_reason {
            return NetError::Halted(previous);
        }

        self.halt_reason = Some(reason);
        self.connection.quit = true;
        self.connection.state = match reason {
            HaltReason::LocalQuit | HaltReason::PeerQuit => HandshakeState::Quitting,
            _ => HandshakeState::Failed,
        };

        if reason.is_abnormal() {
            log::warn!("network halted ({}): {}", reason.code(), reason);
        } else {
            log::info!("{}", reason);
        }

        if attempt_sync {
            while !self.is_sync() && self.is_alive() {
                if let Err(e) = self.check() {
                    if e.is_fatal() {
                        break;
                    }
                }
                self.clock.sleep(HANDSHAKE_POLL_MS);
            }
        }

        self.link.transport.close();
        self.closed = true;
        self.connection.connected = false;

        NetError::Halted(reason)
    }

    /// Tells the opponent we are leaving, then halts.
    pub fn quit(&mut self) -> NetError {
        if self.halt_reason.is_none() {
            self.prepare(PacketKind::Quit);
            if let Err(e) = self.send(HEADER_LEN) {
                log::warn!("quit not queued: {}", e);
            }
        }

        let attempt_sync = self.connection.connected;
        self.halt(HaltReason::LocalQuit, attempt_sync)
    }
}
