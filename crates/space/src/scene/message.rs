use std::sync::Arc;

use glam::Mat4;

use super::assets::{Accessor, Material, Mesh};
use super::entity::{Entity, EntityChanges, EntityId, EntityPatch};

/// A structural scene mutation as seen by consumers on other threads.
///
/// Messages are only produced after the store accepted the mutation, so
/// consumers never see a rejected change.
#[derive(Debug, Clone)]
pub enum SceneMessage {
    AddAccessor(Arc<Accessor>),
    AddMaterial(Arc<Material>),
    AddMesh(Arc<Mesh>),
    AddEntity(Entity),
    UpdateEntity {
        id: EntityId,
        patch: EntityPatch,
        changes: EntityChanges,
    },
    RemoveEntity {
        id: EntityId,
    },
    GlobalTransformChanged {
        id: EntityId,
        world: Mat4,
    },
}

impl SceneMessage {
    /// The entity this message is about, if any.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::AddEntity(entity) => Some(entity.id),
            Self::UpdateEntity { id, .. }
            | Self::RemoveEntity { id }
            | Self::GlobalTransformChanged { id, .. } => Some(*id),
            Self::AddAccessor(_) | Self::AddMaterial(_) | Self::AddMesh(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddAccessor(_) => "add_accessor",
            Self::AddMaterial(_) => "add_material",
            Self::AddMesh(_) => "add_mesh",
            Self::AddEntity(_) => "add_entity",
            Self::UpdateEntity { .. } => "update_entity",
            Self::RemoveEntity { .. } => "remove_entity",
            Self::GlobalTransformChanged { .. } => "global_transform_changed",
        }
    }
}
