mod assets;
mod entity;
mod error;
mod message;
mod store;

pub use assets::{
    Accessor, AccessorData, AccessorId, Attribute, Material, MaterialId, Mesh, MeshId, Primitive,
    PrimitiveMode, Skin,
};
pub use entity::{
    Collider, ColliderGeometry, ColliderShape, Entity, EntityChanges, EntityId, EntityPatch,
};
pub use error::SceneError;
pub use message::SceneMessage;
pub use store::SceneStore;
