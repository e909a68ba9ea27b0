pub mod config;
pub mod net;
pub mod physics;
pub mod player;
pub mod render;
pub mod scene;
pub mod session;
pub mod sync;

pub use config::{DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT, SpaceConfig};
pub use net::{
    ConnectionState, ControlError, ControlMessage, MemoryNetwork, NetworkTransport,
    ReplicationStats, Replicator, ReplicatorHandle, TcpNetwork, TransformFrame,
};
pub use physics::{PhysicsCommand, PhysicsHandle, PhysicsLoop, PhysicsWorld};
pub use player::{PlayerEvent, PlayerId, PlayerRegistry, RemoteTransform};
pub use render::{HeadlessBackend, MirrorInput, RenderBackend, RenderMirror, RenderWorker};
pub use scene::{Entity, EntityId, EntityPatch, SceneError, SceneMessage, SceneStore};
pub use session::Session;
pub use sync::{KinematicReader, KinematicState, SceneBus, kinematic_channel};
