//! Per-tick game state exchange.
//!
//! Every tick each peer sends one STATE packet and, once per `delay` ticks, a
//! STATE_XOR packet folding the last `delay` states together. A single lost
//! state inside such a group is rebuilt from the XOR without a round trip;
//! anything worse is requested again with STATE_RESEND.

use crate::clock::Clock;
use crate::error::NetResult;
use crate::protocol::{NET_PACKET_QUEUE, NET_RESEND, Packet, PacketKind, sequence_offset};
use crate::session::{Activity, Session};
use crate::transport::Transport;

impl<T: Transport, C: Clock> Session<T, C> {
    fn delay(&self) -> usize {
        usize::from(self.config.network_delay)
    }

    pub fn state_out_sequence(&self) -> u16 {
        self.state_out_count as u16
    }

    /// Sequence of the state most recently released by [`Session::state_update`].
    pub fn state_in_sequence(&self) -> u16 {
        self.state_in_count.wrapping_sub(1) as u16
    }

    /// True until `delay` states have been sent since the last reset. There
    /// is nothing to consume yet.
    pub fn state_is_reset(&self) -> bool {
        self.state_out_count < u32::from(self.config.network_delay)
    }

    pub fn state_prepare(&mut self) -> &mut [u8] {
        if self.state_out.is_occupied(0) {
            log::warn!("state packet overwritten (previous packet remains unsent)");
        }

        let packet = Packet::with_state_len(PacketKind::State, self.state_out_sequence());
        self.state_out.slot_mut(0).insert(packet).payload_mut()
    }

    /// Sends the staged state, plus the group XOR when this state closes a group.
    pub fn state_send(&mut self) -> NetResult<()> {
        if !self.state_out.is_occupied(0) {
            log::warn!("no state prepared, sending an empty one");
            self.state_prepare();
        }

        let delay = self.delay();
        if let Some(head) = self.state_out.get(0) {
            self.link.transmit(head)?;

            let closes_group = (self.state_out_count.wrapping_add(1) as usize) % delay == 0;
            if delay > 1 && closes_group && self.state_out.is_occupied(delay - 1) {
                let mut xor = head.clone();
                xor.set_kind(PacketKind::StateXor);
                for i in 1..delay {
                    if let Some(earlier) = self.state_out.get(i) {
                        xor.xor_payload(earlier);
                    }
                }
                self.link.transmit(&xor)?;
            }
        }

        self.state_out.shift_down();
        self.state_out_count = self.state_out_count.wrapping_add(1);
        Ok(())
    }

    /// Releases the next inbound state, waiting for it if needed.
    ///
    /// Returns `Ok(false)` while the session is still in its reset window.
    /// Blocks (polling the session) until the state arrives, is rebuilt from
    /// its XOR group, or the session halts.
    pub fn state_update(&mut self) -> NetResult<bool> {
        if self.state_is_reset() {
            return Ok(false);
        }

        self.state_in.shift_up();
        self.state_in_xor.shift_up();
        self.state_in_count = self.state_in_count.wrapping_add(1);

        let delay = self.delay();
        let x = delay - (self.state_in_count.wrapping_sub(1) as usize) % delay - 1;
        let wanted = self.state_in_sequence();

        while !self.state_in.is_occupied(0) {
            if self.reconstruct_state(x, wanted) {
                self.link.stats.reconstructions += 1;
                log::debug!("state {} rebuilt from its xor group", wanted);
                break;
            }

            let now = self.clock.ticks();
            if now.wrapping_sub(self.last_state_in_tick) > NET_RESEND
                && now.wrapping_sub(self.resend_tick) > NET_RESEND
            {
                log::debug!("requesting resend of state {}", wanted);
                let request = Packet::new(PacketKind::StateResend, wanted);
                if self.link.transmit(&request).is_ok() {
                    self.link.stats.resend_requests += 1;
                }
                self.resend_tick = now;
            }

            if self.service()? == Activity::Idle {
                self.clock.sleep(1);
            }
        }

        if delay > 1 {
            if let Some(current) = self.state_in.get(0) {
                let slot = self.state_in_xor.slot_mut(x);
                match slot {
                    Some(accumulated) => accumulated.xor_payload(current),
                    None => *slot = Some(current.clone()),
                }
            }
        }

        self.last_state_in_tick = self.clock.ticks();
        Ok(true)
    }

    pub fn state_payload(&self) -> Option<&[u8]> {
        self.state_in.get(0).map(Packet::payload)
    }

    pub fn state_reset(&mut self) {
        self.state_in_count = 0;
        self.state_out_count = 0;
        self.state_in.clear();
        self.state_in_xor.clear();
        self.state_out.clear();
        self.last_state_in_tick = self.clock.ticks();
    }

    fn reconstruct_state(&mut self, x: usize, sequence: u16) -> bool {
        let Some(xor) = self.state_in_xor.get(x) else {
            return false;
        };
        if xor.kind() != Some(PacketKind::StateXor) {
            return false;
        }
        if !(1..=x).all(|i| self.state_in.is_occupied(i)) {
            return false;
        }

        let mut rebuilt = xor.clone();
        for i in 1..=x {
            if let Some(known) = self.state_in.get(i) {
                rebuilt.xor_payload(known);
            }
        }
        rebuilt.set_kind(PacketKind::State);
        rebuilt.set_sequence(sequence);
        self.state_in.put(0, rebuilt);
        true
    }

    fn state_index(&self, sequence: u16) -> usize {
        usize::from(sequence_offset(sequence, self.state_in_sequence()))
    }

    pub(crate) fn receive_state(&mut self, packet: Packet) {
        let index = self.state_index(packet.sequence());
        if index < NET_PACKET_QUEUE {
            self.state_in.put(index, packet);
        }
    }

    pub(crate) fn receive_state_xor(&mut self, packet: Packet) {
        let index = self.state_index(packet.sequence());
        if index >= NET_PACKET_QUEUE {
            return;
        }

        let slot = self.state_in_xor.slot_mut(index);
        match slot {
            None => *slot = Some(packet),
            Some(seed) if seed.kind() != Some(PacketKind::StateXor) => {
                seed.xor_payload(&packet);
                seed.set_kind(PacketKind::StateXor);
            }
            Some(_) => log::trace!("duplicate state xor {}", packet.sequence()),
        }
    }

    pub(crate) fn serve_resend(&mut self, sequence: u16) -> NetResult<()> {
        let index = usize::from(sequence_offset(self.state_out_sequence(), sequence));
        if index == 0 || index >= NET_PACKET_QUEUE {
            return Ok(());
        }

        if let Some(packet) = self.state_out.get(index) {
            log::debug!("resending state {}", sequence);
            self.link.transmit(packet)?;
            self.link.stats.resends_served += 1;
        }
        Ok(())
    }
}
