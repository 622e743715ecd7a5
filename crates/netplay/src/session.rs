use crate::clock::{Clock, SystemClock};
use crate::config::NetConfig;
use crate::connection::Connection;
use crate::error::{HaltReason, NetError, NetResult};
use crate::protocol::{
    ConnectInfo, HEADER_LEN, NET_KEEP_ALIVE, NET_PACKET_QUEUE, NET_PACKET_SIZE, NET_RETRY,
    NET_TIME_OUT, Packet, PacketKind, sequence_in_window, sequence_offset,
};
use crate::stats::NetworkStats;
use crate::transport::{Transport, UdpTransport};
use crate::window::PacketWindow;

/// Result of one [`Session::check`] poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Handled,
}

pub(crate) struct Link<T> {
    pub(crate) transport: T,
    pub(crate) stats: NetworkStats,
}

impl<T: Transport> Link<T> {
    pub(crate) fn transmit(&mut self, packet: &Packet) -> NetResult<()> {
        match self.transport.send(packet.as_bytes()) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                Ok(())
            }
            Err(e) => {
                log::error!("send of {:?} failed: {}", packet, e);
                Err(NetError::Transport(e))
            }
        }
    }
}

/// One two-player session: the reliable channel, the state channel and the
/// connection they serve, all driven from a single control flow.
pub struct Session<T: Transport, C: Clock = SystemClock> {
    pub(crate) link: Link<T>,
    pub(crate) clock: C,
    pub(crate) config: NetConfig,
    pub(crate) connection: Connection,

    staging: Packet,
    recv_buffer: [u8; NET_PACKET_SIZE],

    pub(crate) packet_in: PacketWindow,
    packet_out: PacketWindow,

    last_out_sync: u16,
    pub(crate) queue_in_sync: u16,
    queue_out_sync: u16,
    last_ack_sync: u16,

    pub(crate) last_in_tick: u32,
    pub(crate) last_out_tick: u32,
    pub(crate) keep_alive_tick: u32,

    pub(crate) state_in: PacketWindow,
    pub(crate) state_in_xor: PacketWindow,
    pub(crate) state_out: PacketWindow,
    pub(crate) state_in_count: u32,
    pub(crate) state_out_count: u32,
    pub(crate) last_state_in_tick: u32,
    pub(crate) resend_tick: u32,

    pub(crate) halt_reason: Option<HaltReason>,
    pub(crate) closed: bool,
}

impl Session<UdpTransport, SystemClock> {
    pub fn open(config: NetConfig) -> NetResult<Self> {
        log::info!("Initializing network on port {}", config.local_port);
        config.validate()?;
        let transport = UdpTransport::open(config.local_port)?;
        Self::with_transport(transport, SystemClock::new(), config)
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    pub fn with_transport(transport: T, clock: C, config: NetConfig) -> NetResult<Self> {
        config.validate()?;

        let now = clock.ticks();
        Ok(Self {
            link: Link {
                transport,
                stats: NetworkStats::default(),
            },
            connection: Connection::new(&config),
            clock,
            config,
            staging: Packet::default(),
            recv_buffer: [0u8; NET_PACKET_SIZE],
            packet_in: PacketWindow::default(),
            packet_out: PacketWindow::default(),
            last_out_sync: 0,
            queue_in_sync: 0,
            queue_out_sync: 0,
            last_ack_sync: 0,
            last_in_tick: now,
            last_out_tick: now,
            keep_alive_tick: now,
            state_in: PacketWindow::default(),
            state_in_xor: PacketWindow::default(),
            state_out: PacketWindow::default(),
            state_in_count: 0,
            state_out_count: 0,
            last_state_in_tick: now,
            resend_tick: now,
            halt_reason: None,
            closed: false,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.link.stats
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.link.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.link.transport
    }

    pub fn outbound(&self) -> &PacketWindow {
        &self.packet_out
    }

    pub fn next_sequence(&self) -> u16 {
        self.last_out_sync
    }

    pub fn queue_in_sync(&self) -> u16 {
        self.queue_in_sync
    }

    pub fn queue_out_sync(&self) -> u16 {
        self.queue_out_sync
    }

    pub fn last_ack_sync(&self) -> u16 {
        self.last_ack_sync
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt_reason
    }

    pub fn prepare(&mut self, kind: PacketKind) -> &mut Packet {
        self.staging = Packet::new(kind, self.last_out_sync);
        &mut self.staging
    }

    pub fn send_no_ack(&mut self, len: usize) -> NetResult<()> {
        self.staging.set_len(len)?;
        self.link.transmit(&self.staging)
    }

    /// Transmits the staged packet and queues it until the peer acknowledges it.
    pub fn send(&mut self, len: usize) -> NetResult<()> {
        self.staging.set_len(len)?;
        let sent = self.link.transmit(&self.staging);

        let index = sequence_offset(self.last_out_sync, self.queue_out_sync) as usize;
        if index >= NET_PACKET_QUEUE {
            log::warn!("outbound packet queue overflow");
            self.link.stats.queue_overflows += 1;
            return Err(NetError::QueueFull {
                sequence: self.last_out_sync,
            });
        }

        self.packet_out.put(index, self.staging.clone());
        self.last_out_sync = self.last_out_sync.wrapping_add(1);

        if self.is_sync() {
            self.last_out_tick = self.clock.ticks();
        }

        sent
    }

    pub fn acknowledge(&mut self, sequence: u16) -> NetResult<()> {
        self.link
            .transmit(&Packet::new(PacketKind::Acknowledge, sequence))
    }

    /// True once every queued packet up to the last acknowledged one has been released.
    pub fn is_sync(&self) -> bool {
        self.queue_out_sync.wrapping_sub(self.last_ack_sync) == 1
    }

    pub fn is_alive(&self) -> bool {
        self.clock.elapsed_since(self.last_in_tick) < NET_TIME_OUT
            || self.clock.elapsed_since(self.last_state_in_tick) < NET_TIME_OUT
    }

    pub fn peek(&self) -> Option<&Packet> {
        self.packet_in.get(0)
    }

    /// Releases the front inbound message. False if it has not arrived yet.
    pub fn update(&mut self) -> bool {
        if !self.packet_in.is_occupied(0) {
            return false;
        }
        self.packet_in.shift_up();
        self.queue_in_sync = self.queue_in_sync.wrapping_add(1);
        true
    }

    pub fn next_message(&mut self) -> Option<Packet> {
        let message = self.packet_in.get(0).cloned();
        if message.is_some() {
            self.update();
        }
        message
    }

    /// Polls timers and handles at most one inbound datagram.
    pub fn check(&mut self) -> NetResult<Activity> {
        if self.closed {
            return Err(NetError::Halted(
                self.halt_reason.unwrap_or(HaltReason::ConnectionFailed),
            ));
        }

        let now = self.clock.ticks();

        if self.connection.connected {
            if !self.is_alive() && !self.connection.quit {
                return Err(self.halt(HaltReason::ConnectionLost, false));
            }

            if now.wrapping_sub(self.keep_alive_tick) > NET_KEEP_ALIVE {
                let _ = self
                    .link
                    .transmit(&Packet::new(PacketKind::KeepAlive, self.last_out_sync));
                self.keep_alive_tick = now;
            }
        }

        if let Some(oldest) = self.packet_out.get(0) {
            if now.wrapping_sub(self.last_out_tick) > NET_RETRY {
                log::debug!("retransmitting {:?}", oldest);
                self.link.transmit(oldest)?;
                self.link.stats.retransmissions += 1;
                self.last_out_tick = now;
            }
        }

        let size = match self.link.transport.try_receive(&mut self.recv_buffer) {
            Ok(None) => return Ok(Activity::Idle),
            Ok(Some(size)) => size,
            Err(e) => {
                log::error!("receive failed: {}", e);
                return Err(NetError::Transport(e));
            }
        };

        let packet = match Packet::from_bytes(&self.recv_buffer[..size]) {
            Ok(packet) => packet,
            Err(e) => {
                log::trace!("discarding datagram: {}", e);
                return Ok(Activity::Idle);
            }
        };
        self.link.stats.record_received(size);

        self.dispatch(packet, now)
    }

    pub(crate) fn service(&mut self) -> NetResult<Activity> {
        match self.check() {
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(Activity::Idle),
            Ok(activity) => Ok(activity),
        }
    }

    fn dispatch(&mut self, packet: Packet, now: u32) -> NetResult<Activity> {
        let Some(kind) = packet.kind() else {
            log::warn!("bad packet {} received", packet.raw_kind());
            self.link.stats.unknown_packets += 1;
            return Ok(Activity::Idle);
        };
        let sequence = packet.sequence();

        match kind {
            PacketKind::Acknowledge => {
                self.handle_ack(sequence);
                self.last_in_tick = now;
            }
            PacketKind::Connect => self.handle_connect(packet, now)?,
            PacketKind::Quit => self.handle_quit(sequence)?,
            PacketKind::KeepAlive => self.last_in_tick = now,
            PacketKind::State => self.receive_state(packet),
            PacketKind::StateXor => self.receive_state_xor(packet),
            PacketKind::StateResend => self.serve_resend(sequence)?,
            kind if kind.is_reliable() => self.deliver(packet, now),
            kind => log::trace!("no handler for {:?}", kind),
        }

        Ok(Activity::Handled)
    }

    fn handle_ack(&mut self, sequence: u16) {
        let outstanding = sequence_offset(self.last_out_sync, self.queue_out_sync);
        let index = sequence_offset(sequence, self.queue_out_sync);
        if index >= outstanding {
            // never sent or already released
            return;
        }

        if sequence_in_window(sequence, self.last_ack_sync, NET_PACKET_QUEUE) {
            self.last_ack_sync = sequence;
        }

        self.packet_out.take(index as usize);

        while !self.packet_out.is_occupied(0)
            && sequence_in_window(self.last_ack_sync, self.queue_out_sync, NET_PACKET_QUEUE)
        {
            self.packet_out.shift_up();
            self.queue_out_sync = self.queue_out_sync.wrapping_add(1);
        }
    }

    fn handle_connect(&mut self, packet: Packet, now: u32) -> NetResult<()> {
        let sequence = packet.sequence();
        let already_delivered = sequence_in_window(
            self.queue_in_sync.wrapping_sub(1),
            sequence,
            NET_PACKET_QUEUE,
        );
        let already_queued = self
            .packet_in
            .get(sequence_offset(sequence, self.queue_in_sync) as usize)
            .is_some_and(|queued| {
                queued.kind() == Some(PacketKind::Connect) && queued.sequence() == sequence
            });

        if self.connection.connected && (already_delivered || already_queued) {
            match ConnectInfo::parse(&packet) {
                Ok(info) => self.validate_peer(&info)?,
                Err(e) => log::warn!("malformed duplicate connect: {}", e),
            }
            let _ = self.acknowledge(sequence);
            self.last_in_tick = now;
            return Ok(());
        }

        self.queue_in_sync = sequence;
        self.packet_in.clear();
        self.deliver(packet, now);
        Ok(())
    }

    fn deliver(&mut self, packet: Packet, now: u32) {
        let sequence = packet.sequence();
        let index = sequence_offset(sequence, self.queue_in_sync) as usize;
        if index < NET_PACKET_QUEUE {
            self.packet_in.put(index, packet);
        } else {
            log::debug!(
                "inbound {:?} outside the queue window at {}",
                packet,
                self.queue_in_sync
            );
        }

        let _ = self.acknowledge(sequence);
        self.last_in_tick = now;
    }

    fn handle_quit(&mut self, sequence: u16) -> NetResult<()> {
        if !self.connection.quit {
            self.prepare(PacketKind::Quit);
            if let Err(e) = self.send(HEADER_LEN) {
                log::warn!("could not echo quit: {}", e);
            }
        }

        let _ = self.acknowledge(sequence);

        if !self.connection.quit {
            return Err(self.halt(HaltReason::PeerQuit, true));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{MemoryTransport, memory_link};

    fn pair() -> (
        Session<MemoryTransport, ManualClock>,
        Session<MemoryTransport, ManualClock>,
    ) {
        let (a, b) = memory_link();
        let clock = ManualClock::starting_at(1);
        let first = NetConfig {
            player_number: 1,
            ..NetConfig::default()
        };
        let second = NetConfig {
            player_number: 2,
            ..NetConfig::default()
        };
        (
            Session::with_transport(a, clock.clone(), first).unwrap(),
            Session::with_transport(b, clock, second).unwrap(),
        )
    }

    fn drain<T: Transport, C: Clock>(session: &mut Session<T, C>) {
        while session.check().unwrap() == Activity::Handled {}
    }

    fn send_details(session: &mut Session<MemoryTransport, ManualClock>, byte: u8) -> NetResult<()> {
        let packet = session.prepare(PacketKind::Details);
        packet.payload_capacity_mut()[0] = byte;
        session.send(HEADER_LEN + 1)
    }

    #[test]
    fn test_reliable_message_is_delivered_and_acknowledged() {
        let (mut a, mut b) = pair();

        send_details(&mut a, 7).unwrap();
        assert_eq!(a.outbound().len(), 1);

        drain(&mut b);
        let message = b.next_message().unwrap();
        assert_eq!(message.kind(), Some(PacketKind::Details));
        assert_eq!(message.payload(), &[7]);
        assert_eq!(b.queue_in_sync(), 1);

        drain(&mut a);
        assert!(a.outbound().is_empty());
        assert!(a.is_sync());
        assert_eq!(a.queue_out_sync(), 1);
    }

    #[test]
    fn test_out_of_order_arrivals_wait_for_the_front() {
        let (mut a, mut b) = pair();
        let mut dropped_once = false;
        a.transport_mut().set_loss_filter(move |d| {
            if d[3] == 0 && !dropped_once {
                dropped_once = true;
                return true;
            }
            false
        });

        send_details(&mut a, 1).unwrap();
        send_details(&mut a, 2).unwrap();

        drain(&mut b);
        assert!(b.peek().is_none());
        assert!(!b.update());

        // the retry timer resends sequence 0 verbatim
        a.clock().advance(NET_RETRY + 1);
        a.check().unwrap();
        assert_eq!(a.stats().retransmissions, 1);
        assert_eq!(a.next_sequence(), 2);

        drain(&mut b);
        assert_eq!(b.next_message().unwrap().payload(), &[1]);
        assert_eq!(b.next_message().unwrap().payload(), &[2]);
        assert!(b.next_message().is_none());
    }

    #[test]
    fn test_ack_pops_only_from_the_front() {
        let (mut a, _b) = pair();
        for i in 0..3 {
            send_details(&mut a, i).unwrap();
        }

        a.handle_ack(2);
        assert_eq!(a.last_ack_sync(), 2);
        assert_eq!(a.queue_out_sync(), 0);
        assert_eq!(a.outbound().len(), 2);

        a.handle_ack(0);
        assert_eq!(a.queue_out_sync(), 1);

        a.handle_ack(1);
        assert_eq!(a.queue_out_sync(), 3);
        assert!(a.outbound().is_empty());
        assert!(a.is_sync());
    }

    #[test]
    fn test_duplicate_ack_is_a_no_op() {
        let (mut a, _b) = pair();
        send_details(&mut a, 0).unwrap();
        send_details(&mut a, 1).unwrap();

        a.handle_ack(0);
        let (queue_out, last_ack, held) = (a.queue_out_sync(), a.last_ack_sync(), a.outbound().len());

        a.handle_ack(0);
        assert_eq!(a.queue_out_sync(), queue_out);
        assert_eq!(a.last_ack_sync(), last_ack);
        assert_eq!(a.outbound().len(), held);
        assert_eq!(a.outbound().get(0).unwrap().sequence(), 1);
    }

    #[test]
    fn test_ack_for_unsent_sequence_is_ignored() {
        let (mut a, _b) = pair();
        send_details(&mut a, 0).unwrap();

        a.handle_ack(5);
        assert_eq!(a.last_ack_sync(), 0);
        assert_eq!(a.queue_out_sync(), 0);
        assert_eq!(a.outbound().len(), 1);
    }

    #[test]
    fn test_seventeenth_unacked_send_overflows() {
        let (mut a, _b) = pair();
        for i in 0..NET_PACKET_QUEUE as u8 {
            send_details(&mut a, i).unwrap();
        }
        let before: Vec<Packet> = (0..NET_PACKET_QUEUE)
            .map(|i| a.outbound().get(i).unwrap().clone())
            .collect();

        let err = send_details(&mut a, 99).unwrap_err();
        assert!(matches!(err, NetError::QueueFull { sequence: 16 }));
        assert!(!err.is_fatal());

        for (i, packet) in before.iter().enumerate() {
            assert_eq!(a.outbound().get(i), Some(packet));
        }
        assert_eq!(a.next_sequence(), 16);
        assert_eq!(a.stats().queue_overflows, 1);
        // the overflowing packet still went out once
        assert_eq!(a.transport().sent_log().count_of(PacketKind::Details), 17);
    }

    #[test]
    fn test_sequence_wraparound_keeps_queue_adjacent() {
        let (mut a, mut b) = pair();
        a.last_out_sync = 65535;
        a.queue_out_sync = 65535;
        a.last_ack_sync = 65534;
        b.queue_in_sync = 65535;

        send_details(&mut a, 1).unwrap();
        send_details(&mut a, 2).unwrap();
        assert_eq!(a.next_sequence(), 1);
        assert_eq!(a.outbound().get(0).unwrap().sequence(), 65535);
        assert_eq!(a.outbound().get(1).unwrap().sequence(), 0);

        drain(&mut b);
        assert_eq!(b.next_message().unwrap().sequence(), 65535);
        assert_eq!(b.next_message().unwrap().sequence(), 0);
        assert_eq!(b.queue_in_sync(), 1);

        drain(&mut a);
        assert_eq!(a.queue_out_sync(), 1);
        assert_eq!(a.last_ack_sync(), 0);
        assert!(a.is_sync());
        assert!(a.outbound().is_empty());
    }

    #[test]
    fn test_inbound_outside_window_is_dropped_but_acked() {
        let (mut a, mut b) = pair();
        a.last_out_sync = 20;
        a.queue_out_sync = 20;
        a.last_ack_sync = 19;

        send_details(&mut a, 1).unwrap();
        drain(&mut b);

        assert!(b.peek().is_none());
        assert_eq!(b.transport().sent_log().sequences_of(PacketKind::Acknowledge), vec![20]);
    }

    #[test]
    fn test_unknown_packet_is_discarded() {
        let (mut a, mut b) = pair();
        a.transport_mut().send(&[0x7f, 0x00, 0, 0]).unwrap();

        assert_eq!(b.check().unwrap(), Activity::Idle);
        assert_eq!(b.stats().unknown_packets, 1);
        assert_eq!(b.check().unwrap(), Activity::Idle);
    }

    #[test]
    fn test_short_datagram_is_ignored() {
        let (mut a, mut b) = pair();
        a.transport_mut().send(&[0, 1]).unwrap();
        assert_eq!(b.check().unwrap(), Activity::Idle);
        assert_eq!(b.stats().packets_received, 0);
    }

    #[test]
    fn test_connected_session_sends_keep_alive_and_times_out() {
        let (mut a, mut b) = pair();
        a.connection.connected = true;

        a.clock().advance(NET_KEEP_ALIVE + 1);
        assert_eq!(a.check().unwrap(), Activity::Idle);
        assert_eq!(a.transport().sent_log().count_of(PacketKind::KeepAlive), 1);

        drain(&mut b);
        assert_eq!(b.stats().packets_received, 1);

        a.clock().advance(NET_TIME_OUT);
        let err = a.check().unwrap_err();
        assert_eq!(err.halt_reason(), Some(HaltReason::ConnectionLost));
        assert!(a.transport().is_closed());
    }

    #[test]
    fn test_peer_quit_is_echoed_and_halts() {
        let (mut a, mut b) = pair();
        a.prepare(PacketKind::Quit);
        a.send(HEADER_LEN).unwrap();
        a.connection.quit = true;

        let err = b.check().unwrap_err();
        assert_eq!(err.halt_reason(), Some(HaltReason::PeerQuit));

        let log = b.transport().sent_log();
        assert!(log.count_of(PacketKind::Quit) >= 1);
        assert_eq!(log.sequences_of(PacketKind::Acknowledge), vec![0]);

        // the quitting side acknowledges without echoing or halting
        drain(&mut a);
        assert!(a.halt_reason().is_none());
        assert!(
            a.transport()
                .sent_log()
                .sequences_of(PacketKind::Acknowledge)
                .contains(&0)
        );
    }
}
