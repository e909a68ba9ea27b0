use super::assets::{AccessorId, MaterialId, MeshId};
use super::entity::EntityId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SceneError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("unknown parent {parent} for entity {entity}")]
    UnknownParent { entity: EntityId, parent: EntityId },
    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialId),
    #[error("unknown mesh {0:?}")]
    UnknownMesh(MeshId),
    #[error("unknown accessor {0:?}")]
    UnknownAccessor(AccessorId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("parenting {entity} under {parent} would create a cycle")]
    ParentCycle { entity: EntityId, parent: EntityId },
    #[error("the root entity cannot be modified")]
    RootIsImmutable,
}
