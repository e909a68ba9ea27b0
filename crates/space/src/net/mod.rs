mod control;
mod frame;
mod handshake;
mod memory;
mod replicator;
mod tcp;
mod transport;

pub use control::{ControlError, ControlMessage, TransportKind, TransportOptions};
pub use frame::{FRAME_LEN, FrameError, POSITION_SCALE, ROTATION_SCALE, TransformFrame, stamp_player_id};
pub use handshake::{Action, ConnectionState, DATA_PRODUCER_LABEL, Handshake, default_capabilities};
pub use memory::{MemoryControl, MemoryData, MemoryNetwork, MemoryServer};
pub use replicator::{ReplicationStats, Replicator, ReplicatorHandle};
pub use tcp::{TcpControl, TcpNetwork, UdpData};
pub use transport::{ControlChannel, DataChannel, NetworkTransport};
