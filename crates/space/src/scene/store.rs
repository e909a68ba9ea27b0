use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use crate::sync::SceneBus;

use super::assets::{Accessor, AccessorId, Material, MaterialId, Mesh, MeshId};
use super::entity::{Entity, EntityChanges, EntityId, EntityPatch};
use super::error::SceneError;
use super::message::SceneMessage;

/// The canonical entity graph.
///
/// `add_entity`, `remove_entity`, `update_entity` and `update_global_transform`
/// are the only entity mutations. Each one is validated in full before
/// anything is touched, then published on the bus in program order.
#[derive(Debug)]
pub struct SceneStore {
    entities: HashMap<EntityId, Entity>,
    children: HashMap<EntityId, Vec<EntityId>>,
    globals: HashMap<EntityId, Mat4>,
    accessors: HashMap<AccessorId, Arc<Accessor>>,
    materials: HashMap<MaterialId, Arc<Material>>,
    meshes: HashMap<MeshId, Arc<Mesh>>,
    bus: SceneBus,
    next_entity_id: u32,
}

impl Default for SceneStore {
    fn default() -> Self {
        Self::new(SceneBus::new())
    }
}

impl SceneStore {
    pub fn new(bus: SceneBus) -> Self {
        let mut children = HashMap::new();
        children.insert(EntityId::ROOT, Vec::new());
        let mut globals = HashMap::new();
        globals.insert(EntityId::ROOT, Mat4::IDENTITY);

        Self {
            entities: HashMap::new(),
            children,
            globals,
            accessors: HashMap::new(),
            materials: HashMap::new(),
            meshes: HashMap::new(),
            bus,
            next_entity_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }

    pub fn add_accessor(&mut self, accessor: Accessor) -> AccessorId {
        let id = accessor.id;
        let accessor = Arc::new(accessor);
        self.accessors.insert(id, Arc::clone(&accessor));
        self.bus.publish(SceneMessage::AddAccessor(accessor));
        id
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = material.id;
        let material = Arc::new(material);
        self.materials.insert(id, Arc::clone(&material));
        self.bus.publish(SceneMessage::AddMaterial(material));
        id
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> Result<MeshId, SceneError> {
        self.validate_mesh(&mesh)
            .inspect_err(|e| log::error!("rejected mesh {:?}: {}", mesh.id, e))?;
        Ok(self.insert_mesh(mesh))
    }

    /// Replaces a mesh wholesale. Entities referencing it pick up the new geometry.
    pub fn replace_mesh(&mut self, mesh: Mesh) -> Result<MeshId, SceneError> {
        if !self.meshes.contains_key(&mesh.id) {
            log::error!("rejected mesh replacement: unknown mesh {:?}", mesh.id);
            return Err(SceneError::UnknownMesh(mesh.id));
        }
        self.add_mesh(mesh)
    }

    fn insert_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = mesh.id;
        let mesh = Arc::new(mesh);
        self.meshes.insert(id, Arc::clone(&mesh));
        self.bus.publish(SceneMessage::AddMesh(mesh));
        id
    }

    fn validate_mesh(&self, mesh: &Mesh) -> Result<(), SceneError> {
        for primitive in &mesh.primitives {
            for accessor in primitive.accessor_ids() {
                if !self.accessors.contains_key(&accessor) {
                    return Err(SceneError::UnknownAccessor(accessor));
                }
            }
            if let Some(material) = primitive.material {
                self.check_material(material)?;
            }
        }
        if let Some(ibm) = mesh.skin.as_ref().and_then(|s| s.inverse_bind_matrices) {
            if !self.accessors.contains_key(&ibm) {
                return Err(SceneError::UnknownAccessor(ibm));
            }
        }
        Ok(())
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, SceneError> {
        self.validate_new_entity(&entity)
            .inspect_err(|e| log::error!("rejected add_entity {}: {}", entity.id, e))?;

        let id = entity.id;
        let parent = entity.parent_id;
        let world = self.global_or_identity(parent) * entity.local_matrix();

        self.children.entry(parent).or_default().push(id);
        self.children.insert(id, Vec::new());
        self.globals.insert(id, world);
        if id.0 >= self.next_entity_id {
            self.next_entity_id = id.0 + 1;
        }
        self.entities.insert(id, entity.clone());

        self.bus.publish(SceneMessage::AddEntity(entity));
        self.bus
            .publish(SceneMessage::GlobalTransformChanged { id, world });
        Ok(id)
    }

    fn validate_new_entity(&self, entity: &Entity) -> Result<(), SceneError> {
        if entity.id.is_root() {
            return Err(SceneError::RootIsImmutable);
        }
        if self.entities.contains_key(&entity.id) {
            return Err(SceneError::DuplicateEntity(entity.id));
        }
        if !self.contains(entity.parent_id) {
            return Err(SceneError::UnknownParent {
                entity: entity.id,
                parent: entity.parent_id,
            });
        }
        if let Some(material) = entity.material {
            self.check_material(material)?;
        }
        if let Some(mesh) = entity.mesh {
            self.check_mesh(mesh)?;
        }
        Ok(())
    }

    /// Removes `id` and its whole subtree, children before parents.
    /// Returns the removed ids in removal order.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Vec<EntityId>, SceneError> {
        if id.is_root() {
            log::error!("rejected remove_entity: root cannot be removed");
            return Err(SceneError::RootIsImmutable);
        }
        let Some(parent) = self.entities.get(&id).map(|e| e.parent_id) else {
            log::error!("rejected remove_entity: unknown entity {}", id);
            return Err(SceneError::UnknownEntity(id));
        };

        let mut order = Vec::new();
        self.collect_post_order(id, &mut order);

        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.retain(|&child| child != id);
        }

        for &removed in &order {
            self.entities.remove(&removed);
            self.children.remove(&removed);
            self.globals.remove(&removed);
            self.bus
                .publish(SceneMessage::RemoveEntity { id: removed });
        }

        log::debug!("removed {} entities under {}", order.len(), id);
        Ok(order)
    }

    fn collect_post_order(&self, id: EntityId, out: &mut Vec<EntityId>) {
        if let Some(children) = self.children.get(&id) {
            for &child in children {
                self.collect_post_order(child, out);
            }
        }
        out.push(id);
    }

    /// Applies a partial update. A parent change keeps the entity where it is
    /// in world space unless the same patch also sets local transform fields.
    pub fn update_entity(
        &mut self,
        id: EntityId,
        patch: EntityPatch,
    ) -> Result<EntityChanges, SceneError> {
        let effective = self
            .prepare_patch(id, patch)
            .inspect_err(|e| log::error!("rejected update_entity {}: {}", id, e))?;

        let Some(entity) = self.entities.get_mut(&id) else {
            return Err(SceneError::UnknownEntity(id));
        };
        let old_parent = entity.parent_id;
        let changes = entity.apply_patch(&effective);
        let new_parent = entity.parent_id;

        if changes.is_empty() {
            return Ok(changes);
        }

        if changes.contains(EntityChanges::PARENT) {
            if let Some(siblings) = self.children.get_mut(&old_parent) {
                siblings.retain(|&child| child != id);
            }
            self.children.entry(new_parent).or_default().push(id);
        }

        self.bus.publish(SceneMessage::UpdateEntity {
            id,
            patch: effective,
            changes,
        });

        if changes.affects_world_transform() {
            self.update_global_transform(id)?;
        }

        Ok(changes)
    }

    fn prepare_patch(&self, id: EntityId, patch: EntityPatch) -> Result<EntityPatch, SceneError> {
        if id.is_root() {
            return Err(SceneError::RootIsImmutable);
        }
        let entity = self
            .entities
            .get(&id)
            .ok_or(SceneError::UnknownEntity(id))?;

        if let Some(Some(material)) = patch.material {
            self.check_material(material)?;
        }
        if let Some(Some(mesh)) = patch.mesh {
            self.check_mesh(mesh)?;
        }

        let mut effective = patch;
        let Some(new_parent) = effective.parent_id.filter(|&p| p != entity.parent_id) else {
            return Ok(effective);
        };

        if !self.contains(new_parent) {
            return Err(SceneError::UnknownParent {
                entity: id,
                parent: new_parent,
            });
        }
        if new_parent == id || self.is_ancestor(id, new_parent) {
            return Err(SceneError::ParentCycle {
                entity: id,
                parent: new_parent,
            });
        }

        let world = self.global_or_identity(id);
        let parent_world = self.global_or_identity(new_parent);
        let local = parent_world.inverse() * world;
        let (scale, rotation, translation) = local.to_scale_rotation_translation();

        effective.position.get_or_insert(translation);
        effective.rotation.get_or_insert(rotation.normalize());
        effective.scale.get_or_insert(scale);

        Ok(effective)
    }

    /// Recomputes the cached world transform of `id` and every descendant,
    /// publishing one notification per entity, parents first.
    pub fn update_global_transform(&mut self, id: EntityId) -> Result<(), SceneError> {
        if !self.contains(id) {
            return Err(SceneError::UnknownEntity(id));
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !current.is_root() {
                let Some(entity) = self.entities.get(&current) else {
                    continue;
                };
                let world = self.global_or_identity(entity.parent_id) * entity.local_matrix();
                self.globals.insert(current, world);
                self.bus.publish(SceneMessage::GlobalTransformChanged {
                    id: current,
                    world,
                });
            }

            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().rev().copied());
            }
        }

        Ok(())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        id.is_root() || self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Arc<Mesh>> {
        self.meshes.get(&id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Arc<Material>> {
        self.materials.get(&id)
    }

    pub fn accessor(&self, id: AccessorId) -> Option<&Arc<Accessor>> {
        self.accessors.get(&id)
    }

    pub fn global_transform(&self, id: EntityId) -> Option<Mat4> {
        self.globals.get(&id).copied()
    }

    pub fn world_position(&self, id: EntityId) -> Option<Vec3> {
        self.global_transform(id)
            .map(|m| m.to_scale_rotation_translation().2)
    }

    pub fn world_rotation(&self, id: EntityId) -> Option<Quat> {
        self.global_transform(id)
            .map(|m| m.to_scale_rotation_translation().1)
    }

    /// Parent chain of `id`, nearest first, ending at root.
    pub fn ancestors(&self, id: EntityId) -> Vec<EntityId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(entity) = self.entities.get(&current) {
            chain.push(entity.parent_id);
            if entity.parent_id.is_root() || chain.len() > self.entities.len() {
                break;
            }
            current = entity.parent_id;
        }
        chain
    }

    pub fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Checks that every entity resolves to root through existing parents.
    pub fn validate(&self) -> Result<(), SceneError> {
        for entity in self.entities.values() {
            let mut current = entity.parent_id;
            let mut steps = 0;
            while !current.is_root() {
                let Some(parent) = self.entities.get(&current) else {
                    return Err(SceneError::UnknownParent {
                        entity: entity.id,
                        parent: current,
                    });
                };
                steps += 1;
                if steps > self.entities.len() {
                    return Err(SceneError::ParentCycle {
                        entity: entity.id,
                        parent: entity.parent_id,
                    });
                }
                current = parent.parent_id;
            }

            if !self.children(entity.parent_id).contains(&entity.id) {
                return Err(SceneError::UnknownParent {
                    entity: entity.id,
                    parent: entity.parent_id,
                });
            }
        }
        Ok(())
    }

    fn global_or_identity(&self, id: EntityId) -> Mat4 {
        self.globals.get(&id).copied().unwrap_or(Mat4::IDENTITY)
    }

    fn check_material(&self, id: MaterialId) -> Result<(), SceneError> {
        if self.materials.contains_key(&id) {
            Ok(())
        } else {
            Err(SceneError::UnknownMaterial(id))
        }
    }

    fn check_mesh(&self, id: MeshId) -> Result<(), SceneError> {
        if self.meshes.contains_key(&id) {
            Ok(())
        } else {
            Err(SceneError::UnknownMesh(id))
        }
    }
}
