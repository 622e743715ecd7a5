use bytemuck::{Pod, Zeroable};

/// Per-tick state each peer contributes. Exactly one state payload wide.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DemoState {
    pub tick: u32,
    pub player: u16,
    pub buttons: u16,
    pub x: i32,
    pub y: i32,
    pub score: u32,
    pub checksum: u32,
}

const ARENA: i32 = 320;

impl DemoState {
    pub fn new(player: u16) -> Self {
        let mut state = Self {
            player,
            x: i32::from(player) * 40,
            y: ARENA / 2,
            ..Self::default()
        };
        state.seal();
        state
    }

    /// Deterministic step: both peers can replay each other's states.
    pub fn advance(&self, buttons: u16) -> Self {
        let mut next = *self;
        next.tick = self.tick.wrapping_add(1);
        next.buttons = buttons;

        let dx = i32::from(buttons & 0b01 != 0) * 2 - 1;
        let dy = i32::from(buttons & 0b10 != 0) * 2 - 1;
        next.x = (self.x + dx * 3).rem_euclid(ARENA);
        next.y = (self.y + dy * 2).rem_euclid(ARENA);
        if next.x == next.y {
            next.score = next.score.wrapping_add(1);
        }

        next.seal();
        next
    }

    pub fn compute_checksum(&self) -> u32 {
        [
            self.tick,
            u32::from(self.player) << 16 | u32::from(self.buttons),
            self.x as u32,
            self.y as u32,
            self.score,
        ]
        .iter()
        .fold(0x811c_9dc5u32, |hash, word| {
            (hash ^ word).wrapping_mul(0x0100_0193)
        })
    }

    pub fn is_intact(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }
}

/// Scripted input so a headless peer still moves.
pub fn scripted_buttons(tick: u32, player: u16) -> u16 {
    ((tick / 16 + u32::from(player)) % 4) as u16
}
