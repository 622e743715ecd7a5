use std::fmt;
use std::io;

use crate::protocol::PacketError;

/// Why a session ended. The discriminant is the halt number shown to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HaltReason {
    LocalQuit = 0,
    PeerQuit = 1,
    ConnectionLost = 2,
    ConnectionFailed = 3,
    VersionMismatch = 4,
    DelayMismatch = 5,
    PlayerConflict = 6,
}

impl HaltReason {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::LocalQuit => "Quitting...",
            Self::PeerQuit => "Other player quit the game.",
            Self::ConnectionLost => "Network connection was lost.",
            Self::ConnectionFailed => "Network connection failed.",
            Self::VersionMismatch => "Network version mismatch.",
            Self::DelayMismatch => "Network delay mismatch.",
            Self::PlayerConflict => "Network player number conflict.",
        }
    }

    /// Anything other than a local quit waits for acknowledgment from the player.
    pub fn is_abnormal(self) -> bool {
        self != Self::LocalQuit
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("network delay {0} is out of range (1..={max})", max = crate::config::MAX_NETWORK_DELAY)]
    InvalidDelay(u16),
    #[error("outbound packet queue overflow, packet {sequence} will not be retried")]
    QueueFull { sequence: u16 },
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("session halted: {0}")]
    Halted(HaltReason),
}

impl NetError {
    /// Halts end the session; everything else degrades it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Halted(_))
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        match self {
            Self::Halted(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
