mod interpolation;
mod registry;

pub use interpolation::{RemoteTransform, normalized};
pub use registry::{ChatLine, PlayerEvent, PlayerId, PlayerRecord, PlayerRegistry};
