mod colliders;
mod motion;
mod simulation;
mod timestep;
mod world;

pub use motion::PlayerMotion;
pub use simulation::{PhysicsCommand, PhysicsHandle, PhysicsLoop};
pub use timestep::FixedTimestep;
pub use world::PhysicsWorld;
