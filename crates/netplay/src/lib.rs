pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod state;
pub mod stats;
pub mod transport;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DEFAULT_NETWORK_DELAY, Episodes, MAX_NETWORK_DELAY, NetConfig};
pub use connection::{Connection, HandshakeState};
pub use error::{HaltReason, NetError, NetResult};
pub use protocol::{
    ConnectInfo, DEFAULT_PORT, HEADER_LEN, NET_PACKET_QUEUE, NET_RESEND, NET_VERSION, Packet,
    PacketError, PacketKind, STATE_PAYLOAD_LEN,
};
pub use session::{Activity, Session};
pub use stats::{LossyTransport, NetworkStats, PacketLossSimulation};
pub use transport::{MemoryTransport, SentLog, Transport, UdpTransport, memory_link};
pub use window::PacketWindow;
