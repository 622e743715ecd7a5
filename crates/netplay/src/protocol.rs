use std::fmt;

pub const NET_VERSION: u16 = 2;
pub const DEFAULT_PORT: u16 = 1333;

pub const NET_PACKET_SIZE: usize = 256;
pub const NET_PACKET_QUEUE: usize = 16;

pub const HEADER_LEN: usize = 4;
pub const STATE_PAYLOAD_LEN: usize = 24;
pub const STATE_PACKET_LEN: usize = HEADER_LEN + STATE_PAYLOAD_LEN;

/// Ticks to wait for an acknowledgment before retransmitting.
pub const NET_RETRY: u32 = 640;
/// Ticks to wait before requesting a state packet that has not arrived.
pub const NET_RESEND: u32 = 320;
/// Ticks between keep-alive packets.
pub const NET_KEEP_ALIVE: u32 = 1600;
/// Ticks of silence after which the connection is considered dead.
pub const NET_TIME_OUT: u32 = 16000;

pub const MAX_NAME_LEN: usize = 20;

const CONNECT_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    Acknowledge = 0x00,
    KeepAlive = 0x01,
    Connect = 0x10,
    Details = 0x11,
    Quit = 0x12,
    Waiting = 0x13,
    Busy = 0x14,
    GameQuit = 0x20,
    GamePause = 0x21,
    GameMenu = 0x22,
    StateResend = 0x30,
    State = 0x31,
    StateXor = 0x32,
}

impl PacketKind {
    pub fn from_u16(raw: u16) -> Option<Self> {
        let kind = match raw {
            0x00 => Self::Acknowledge,
            0x01 => Self::KeepAlive,
            0x10 => Self::Connect,
            0x11 => Self::Details,
            0x12 => Self::Quit,
            0x13 => Self::Waiting,
            0x14 => Self::Busy,
            0x20 => Self::GameQuit,
            0x21 => Self::GamePause,
            0x22 => Self::GameMenu,
            0x30 => Self::StateResend,
            0x31 => Self::State,
            0x32 => Self::StateXor,
            _ => return None,
        };
        Some(kind)
    }

    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Kinds that travel through the acknowledged queue.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::Connect
                | Self::Details
                | Self::Quit
                | Self::Waiting
                | Self::Busy
                | Self::GameQuit
                | Self::GamePause
                | Self::GameMenu
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the packet header")]
    Truncated(usize),
    #[error("datagram of {0} bytes exceeds the {NET_PACKET_SIZE} byte packet size")]
    Oversized(usize),
    #[error("packet length {0} is outside 4..={NET_PACKET_SIZE}")]
    InvalidLength(usize),
    #[error("expected a {expected:?} packet, got type {actual:#04x}")]
    UnexpectedKind { expected: PacketKind, actual: u16 },
}

/// Distance from `base` forward to `seq`, modulo 2^16.
#[inline]
pub fn sequence_offset(seq: u16, base: u16) -> u16 {
    seq.wrapping_sub(base)
}

#[inline]
pub fn sequence_in_window(seq: u16, base: u16, size: usize) -> bool {
    (sequence_offset(seq, base) as usize) < size
}

/// One datagram in an owned, fixed-capacity buffer.
///
/// Header fields are big-endian: bytes `[0, 2)` hold the type, `[2, 4)` the
/// sequence number and the rest is the type-specific payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    len: usize,
    data: [u8; NET_PACKET_SIZE],
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            len: 0,
            data: [0u8; NET_PACKET_SIZE],
        }
    }
}

impl Packet {
    pub fn new(kind: PacketKind, sequence: u16) -> Self {
        let mut packet = Self::default();
        packet.write_header(kind.as_u16(), sequence);
        packet.len = HEADER_LEN;
        packet
    }

    /// A zeroed STATE or STATE_XOR sized packet.
    pub fn with_state_len(kind: PacketKind, sequence: u16) -> Self {
        let mut packet = Self::new(kind, sequence);
        packet.len = STATE_PACKET_LEN;
        packet
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::Truncated(bytes.len()));
        }
        if bytes.len() > NET_PACKET_SIZE {
            return Err(PacketError::Oversized(bytes.len()));
        }

        let mut packet = Self::default();
        packet.data[..bytes.len()].copy_from_slice(bytes);
        packet.len = bytes.len();
        Ok(packet)
    }

    pub(crate) fn write_header(&mut self, kind: u16, sequence: u16) {
        self.write_u16(0, kind);
        self.write_u16(2, sequence);
    }

    #[inline]
    pub fn raw_kind(&self) -> u16 {
        self.read_u16(0)
    }

    #[inline]
    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_u16(self.raw_kind())
    }

    pub fn set_kind(&mut self, kind: PacketKind) {
        self.write_u16(0, kind.as_u16());
    }

    #[inline]
    pub fn sequence(&self) -> u16 {
        self.read_u16(2)
    }

    pub fn set_sequence(&mut self, sequence: u16) {
        self.write_u16(2, sequence);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), PacketError> {
        if !(HEADER_LEN..=NET_PACKET_SIZE).contains(&len) {
            return Err(PacketError::InvalidLength(len));
        }
        self.len = len;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN.min(self.len)..self.len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = HEADER_LEN.min(self.len);
        &mut self.data[start..self.len]
    }

    /// The whole buffer past the header, regardless of the current length.
    /// Used to stage a payload before `set_len`.
    pub fn payload_capacity_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_LEN..]
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    #[inline]
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// XORs `other`'s payload bytes into this packet over this packet's length.
    pub fn xor_payload(&mut self, other: &Packet) {
        for j in HEADER_LEN..self.len {
            self.data[j] ^= other.data[j];
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Packet");
        match self.kind() {
            Some(kind) => s.field("kind", &kind),
            None => s.field("kind", &format_args!("{:#04x}", self.raw_kind())),
        };
        s.field("sequence", &self.sequence())
            .field("len", &self.len)
            .finish()
    }
}

/// Payload of a CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub version: u16,
    pub delay: u16,
    pub episodes: u16,
    pub player: u16,
    pub name: String,
}

impl ConnectInfo {
    /// Writes the payload after an already staged header and returns the
    /// total packet length. The name is cut to [`MAX_NAME_LEN`] bytes.
    pub fn write_into(&self, packet: &mut Packet) -> usize {
        packet.write_u16(4, self.version);
        packet.write_u16(6, self.delay);
        packet.write_u16(8, self.episodes);
        packet.write_u16(10, self.player);

        let name = truncate_name(&self.name).as_bytes();
        let body = packet.payload_capacity_mut();
        let start = CONNECT_HEADER_LEN - HEADER_LEN;
        body[start..start + name.len()].copy_from_slice(name);
        body[start + name.len()] = 0;

        CONNECT_HEADER_LEN + name.len() + 1
    }

    pub fn parse(packet: &Packet) -> Result<Self, PacketError> {
        if packet.raw_kind() != PacketKind::Connect.as_u16() {
            return Err(PacketError::UnexpectedKind {
                expected: PacketKind::Connect,
                actual: packet.raw_kind(),
            });
        }
        if packet.len() < CONNECT_HEADER_LEN {
            return Err(PacketError::Truncated(packet.len()));
        }

        let raw_name = &packet.as_bytes()[CONNECT_HEADER_LEN..];
        let end = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_name.len());

        Ok(Self {
            version: packet.read_u16(4),
            delay: packet.read_u16(6),
            episodes: packet.read_u16(8),
            player: packet.read_u16(10),
            name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
        })
    }
}

/// Longest prefix of `name` that fits in [`MAX_NAME_LEN`] bytes without
/// splitting a character.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
