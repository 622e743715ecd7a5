use std::collections::VecDeque;

use crate::protocol::{Packet, NET_PACKET_QUEUE};

/// Fixed run of packet slots. A slot owns its packet; `None` is free.
///
/// Slot 0 is the front. Shifting up releases the front and opens a free slot
/// at the back, shifting down releases the back and opens slot 0.
#[derive(Debug)]
pub struct PacketWindow {
    slots: VecDeque<Option<Packet>>,
}

impl Default for PacketWindow {
    fn default() -> Self {
        Self::new(NET_PACKET_QUEUE)
    }
}

impl PacketWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&Packet> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn put(&mut self, index: usize, packet: Packet) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(packet);
        }
    }

    /// Direct access to a slot. Panics if `index` is past the capacity.
    pub fn slot_mut(&mut self, index: usize) -> &mut Option<Packet> {
        &mut self.slots[index]
    }

    pub fn take(&mut self, index: usize) -> Option<Packet> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn shift_up(&mut self) -> Option<Packet> {
        let front = self.slots.pop_front().flatten();
        self.slots.push_back(None);
        front
    }

    pub fn shift_down(&mut self) {
        self.slots.pop_back();
        self.slots.push_front(None);
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
