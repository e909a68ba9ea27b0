use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::assets::{MaterialId, MeshId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub const ROOT: EntityId = EntityId(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColliderShape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
    /// Convex hull of the entity's mesh.
    Hull,
    /// Triangle mesh of the entity's mesh.
    Mesh,
}

impl ColliderShape {
    /// Hull and mesh shapes need vertex data extracted from the render side.
    pub fn needs_geometry(&self) -> bool {
        matches!(self, Self::Hull | Self::Mesh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub shape: ColliderShape,
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        Self { shape }
    }
}

/// Raw collider geometry computed from a mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColliderGeometry {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl ColliderGeometry {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub parent_id: EntityId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub mesh: Option<MeshId>,
    pub material: Option<MaterialId>,
    pub collider: Option<Collider>,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id: EntityId::ROOT,
            name: name.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            mesh: None,
            material: None,
            collider: None,
        }
    }

    pub fn with_parent(mut self, parent_id: EntityId) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_mesh(mut self, mesh: MeshId) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_collider(mut self, shape: ColliderShape) -> Self {
        self.collider = Some(Collider::new(shape));
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Applies the fields present in `patch` and reports which ones actually changed.
    pub fn apply_patch(&mut self, patch: &EntityPatch) -> EntityChanges {
        let mut changes = EntityChanges::empty();

        if let Some(parent_id) = patch.parent_id {
            if parent_id != self.parent_id {
                self.parent_id = parent_id;
                changes |= EntityChanges::PARENT;
            }
        }

        if let Some(name) = &patch.name {
            if *name != self.name {
                self.name = name.clone();
                changes |= EntityChanges::NAME;
            }
        }

        if let Some(position) = patch.position {
            if position != self.position {
                self.position = position;
                changes |= EntityChanges::TRANSFORM;
            }
        }

        if let Some(rotation) = patch.rotation {
            if rotation != self.rotation {
                self.rotation = rotation;
                changes |= EntityChanges::TRANSFORM;
            }
        }

        if let Some(scale) = patch.scale {
            if scale != self.scale {
                self.scale = scale;
                changes |= EntityChanges::TRANSFORM;
            }
        }

        if let Some(mesh) = patch.mesh {
            if mesh != self.mesh {
                self.mesh = mesh;
                changes |= EntityChanges::MESH;
            }
        }

        if let Some(material) = patch.material {
            if material != self.material {
                self.material = material;
                changes |= EntityChanges::MATERIAL;
            }
        }

        if let Some(collider) = patch.collider {
            if collider != self.collider {
                self.collider = collider;
                changes |= EntityChanges::COLLIDER;
            }
        }

        changes
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntityChanges: u8 {
        const PARENT = 1 << 0;
        const NAME = 1 << 1;
        const TRANSFORM = 1 << 2;
        const MESH = 1 << 3;
        const MATERIAL = 1 << 4;
        const COLLIDER = 1 << 5;
    }
}

impl EntityChanges {
    /// Changes that move the entity in world space.
    pub fn affects_world_transform(self) -> bool {
        self.intersects(Self::PARENT | Self::TRANSFORM)
    }
}

/// Partial entity update. `None` leaves a field untouched; the nested
/// `Option` on references distinguishes "clear" from "leave".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    pub parent_id: Option<EntityId>,
    pub name: Option<String>,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
    pub mesh: Option<Option<MeshId>>,
    pub material: Option<Option<MaterialId>>,
    pub collider: Option<Option<Collider>>,
}

impl EntityPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent_id: EntityId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn mesh(mut self, mesh: Option<MeshId>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn material(mut self, material: Option<MaterialId>) -> Self {
        self.material = Some(material);
        self
    }

    pub fn collider(mut self, collider: Option<Collider>) -> Self {
        self.collider = Some(collider);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_reports_only_real_changes() {
        let mut entity = Entity::new(EntityId(1), "crate").with_position(Vec3::X);

        let changes = entity.apply_patch(&EntityPatch::new().position(Vec3::X).name("crate"));
        assert!(changes.is_empty());

        let changes = entity.apply_patch(
            &EntityPatch::new()
                .position(Vec3::Y)
                .collider(Some(Collider::new(ColliderShape::Sphere { radius: 1.0 }))),
        );
        assert_eq!(changes, EntityChanges::TRANSFORM | EntityChanges::COLLIDER);
        assert!(changes.affects_world_transform());
        assert_eq!(entity.position, Vec3::Y);
    }

    #[test]
    fn clearing_a_reference() {
        let mut entity = Entity::new(EntityId(2), "lamp").with_mesh(MeshId(4));
        let changes = entity.apply_patch(&EntityPatch::new().mesh(None));
        assert_eq!(changes, EntityChanges::MESH);
        assert!(entity.mesh.is_none());
    }
}
