use netplay::{Episodes, HaltReason};

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connected {
        opponent: String,
        episodes: Episodes,
    },
    Details {
        tick: u32,
    },
    Desync {
        tick: u32,
        reason: &'static str,
    },
    Halted {
        reason: HaltReason,
    },
    Error {
        message: String,
    },
}
