mod bus;
mod kinematic;

pub use bus::{SceneBus, SceneSink};
pub use kinematic::{
    KinematicReader, KinematicState, KinematicWriter, kinematic_channel, kinematic_channel_with,
};
