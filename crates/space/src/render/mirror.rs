use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use glam::{Mat4, Quat, Vec3};

use crate::config::SpaceConfig;
use crate::physics::PhysicsCommand;
use crate::player::{PlayerEvent, PlayerId, RemoteTransform};
use crate::scene::{
    Accessor, AccessorId, Attribute, ColliderGeometry, Entity, EntityChanges, EntityId,
    EntityPatch, Material, MaterialId, Mesh, MeshId, SceneMessage,
};
use crate::sync::KinematicReader;

use super::{NodeId, NodeKind, PendingQueue, RenderBackend, RenderError};

#[derive(Debug, Clone)]
pub enum MirrorInput {
    Scene(SceneMessage),
    Player(PlayerEvent),
    RemoteTarget {
        player_id: PlayerId,
        position: Vec3,
        rotation: Quat,
    },
    Shutdown,
}

impl From<SceneMessage> for MirrorInput {
    fn from(message: SceneMessage) -> Self {
        MirrorInput::Scene(message)
    }
}

#[derive(Debug)]
struct MirrorNode {
    entity: Entity,
    node: NodeId,
    drawable: Option<NodeId>,
    collider_visual: Option<NodeId>,
    world: Option<Mat4>,
    is_bone: bool,
}

#[derive(Debug)]
struct Avatar {
    node: NodeId,
    transform: RemoteTransform,
    has_target: bool,
}

/// Render-side shadow of the scene graph, one node per live entity.
pub struct RenderMirror<B: RenderBackend> {
    backend: B,
    interpolation_factor: f32,
    nodes: HashMap<EntityId, MirrorNode>,
    accessors: HashMap<AccessorId, Arc<Accessor>>,
    materials: HashMap<MaterialId, Arc<Material>>,
    meshes: HashMap<MeshId, Arc<Mesh>>,
    pending: PendingQueue<EntityId, SceneMessage>,
    /// Live entities with an update parked, keyed to what it waits on.
    blocked: HashMap<EntityId, EntityId>,
    physics: Option<Sender<PhysicsCommand>>,
    local: Option<(KinematicReader, NodeId)>,
    remotes: BTreeMap<PlayerId, Avatar>,
    failures: u64,
}

impl<B: RenderBackend> RenderMirror<B> {
    pub fn new(backend: B, config: &SpaceConfig) -> Self {
        Self {
            backend,
            interpolation_factor: config.interpolation_factor,
            nodes: HashMap::new(),
            accessors: HashMap::new(),
            materials: HashMap::new(),
            meshes: HashMap::new(),
            pending: PendingQueue::new(),
            blocked: HashMap::new(),
            physics: None,
            local: None,
            remotes: BTreeMap::new(),
            failures: 0,
        }
    }

    /// Hull and mesh collider geometry is sent here.
    pub fn with_physics(mut self, physics: Sender<PhysicsCommand>) -> Self {
        self.physics = Some(physics);
        self
    }

    pub fn attach_local_player(&mut self, reader: KinematicReader) -> Result<(), RenderError> {
        if let Some((_, old)) = self.local.take() {
            self.backend.destroy_node(old);
        }
        let node = self.backend.create_node(NodeKind::Avatar(None))?;
        self.backend.set_label(node, "You")?;
        self.local = Some((reader, node));
        Ok(())
    }

    /// Applies one input. Failures are logged and counted, never propagated.
    /// Returns `false` for [`MirrorInput::Shutdown`].
    pub fn apply(&mut self, input: MirrorInput) -> bool {
        let result = match input {
            MirrorInput::Scene(message) => self.apply_scene(message),
            MirrorInput::Player(event) => self.apply_player(event),
            MirrorInput::RemoteTarget {
                player_id,
                position,
                rotation,
            } => {
                self.set_remote_target(player_id, position, rotation);
                Ok(())
            }
            MirrorInput::Shutdown => return false,
        };

        if let Err(e) = result {
            self.record_failure(&e);
        }
        true
    }

    /// Moves avatars and submits one frame.
    pub fn frame(&mut self) -> Result<(), RenderError> {
        if let Some((reader, node)) = &self.local {
            let state = reader.load();
            self.backend.set_world_transform(
                *node,
                Mat4::from_rotation_translation(state.rotation, state.position),
            )?;
        }

        let k = self.interpolation_factor;
        for avatar in self.remotes.values_mut().filter(|a| a.has_target) {
            avatar.transform.step(k);
            self.backend
                .set_world_transform(avatar.node, avatar.transform.matrix())?;
        }

        self.backend.render_frame()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn node(&self, id: EntityId) -> Option<NodeId> {
        self.nodes.get(&id).map(|n| n.node)
    }

    pub fn drawable(&self, id: EntityId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.drawable)
    }

    pub fn collider_visual(&self, id: EntityId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.collider_visual)
    }

    pub fn is_bone(&self, id: EntityId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.is_bone)
    }

    pub fn entity_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn remote_avatar(&self, player_id: PlayerId) -> Option<&RemoteTransform> {
        self.remotes.get(&player_id).map(|a| &a.transform)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn record_failure(&mut self, error: &RenderError) {
        self.failures += 1;
        log::error!("Render mirror: {error}");
    }

    fn apply_scene(&mut self, message: SceneMessage) -> Result<(), RenderError> {
        match message {
            SceneMessage::AddAccessor(accessor) => {
                self.accessors.insert(accessor.id, accessor);
                Ok(())
            }
            SceneMessage::AddMaterial(material) => {
                let id = material.id;
                self.materials.insert(id, material);
                self.rebind_material(id)
            }
            SceneMessage::AddMesh(mesh) => {
                let id = mesh.id;
                if self.meshes.insert(id, mesh).is_some() {
                    self.rebuild_mesh_users(id)?;
                }
                Ok(())
            }
            SceneMessage::AddEntity(entity) => self.add_entity(entity),
            SceneMessage::UpdateEntity { id, patch, changes } => {
                self.update_entity(id, patch, changes)
            }
            SceneMessage::GlobalTransformChanged { id, world } => self.global_changed(id, world),
            SceneMessage::RemoveEntity { id } => {
                self.remove_entity(id);
                Ok(())
            }
        }
    }

    /// First entity this one needs a node for that does not exist yet.
    fn missing_dependency(&self, entity: &Entity) -> Option<EntityId> {
        if !entity.parent_id.is_root() && !self.nodes.contains_key(&entity.parent_id) {
            return Some(entity.parent_id);
        }

        let mesh = entity.mesh.and_then(|id| self.meshes.get(&id))?;
        mesh.joints()
            .iter()
            .find(|joint| **joint != entity.id && !self.nodes.contains_key(joint))
            .copied()
    }

    fn parent_node(&self, parent: EntityId) -> Option<NodeId> {
        self.nodes.get(&parent).map(|n| n.node)
    }

    fn add_entity(&mut self, entity: Entity) -> Result<(), RenderError> {
        if let Some(dependency) = self.missing_dependency(&entity) {
            log::debug!("Deferring {} until {} exists", entity.id, dependency);
            self.pending
                .defer(dependency, SceneMessage::AddEntity(entity));
            return Ok(());
        }

        let id = entity.id;
        if self.nodes.contains_key(&id) {
            self.remove_entity(id);
        }

        let node = self.backend.create_node(NodeKind::Group)?;
        let mut mirror = MirrorNode {
            entity,
            node,
            drawable: None,
            collider_visual: None,
            world: None,
            is_bone: false,
        };

        let built = self.build(&mut mirror);
        self.nodes.insert(id, mirror);
        self.release(id);
        built
    }

    fn build(&mut self, mirror: &mut MirrorNode) -> Result<(), RenderError> {
        let parent = self.parent_node(mirror.entity.parent_id);
        self.backend.set_parent(mirror.node, parent)?;

        let entity = &mirror.entity;
        self.backend.set_local_transform(
            mirror.node,
            entity.position,
            entity.rotation,
            entity.scale,
        )?;
        self.backend.set_label(mirror.node, &entity.name)?;

        self.rebuild_drawable(mirror)?;
        self.rebuild_collider_visual(mirror)
    }

    /// Replays everything that was waiting for `id`.
    fn release(&mut self, id: EntityId) {
        self.blocked.retain(|_, dependency| *dependency != id);
        for message in self.pending.take_ready(&id) {
            if let Err(e) = self.apply_scene(message) {
                self.record_failure(&e);
            }
        }
    }

    fn update_entity(
        &mut self,
        id: EntityId,
        patch: EntityPatch,
        changes: EntityChanges,
    ) -> Result<(), RenderError> {
        if let Some(&dependency) = self.blocked.get(&id) {
            self.pending
                .defer(dependency, SceneMessage::UpdateEntity { id, patch, changes });
            return Ok(());
        }

        let Some(mut mirror) = self.nodes.remove(&id) else {
            log::debug!("Deferring update of {id} until it exists");
            self.pending
                .defer(id, SceneMessage::UpdateEntity { id, patch, changes });
            return Ok(());
        };

        let mut next = mirror.entity.clone();
        next.apply_patch(&patch);

        if let Some(dependency) = self.missing_dependency(&next) {
            self.nodes.insert(id, mirror);
            log::debug!("Deferring update of {id} until {dependency} exists");
            self.blocked.insert(id, dependency);
            self.pending
                .defer(dependency, SceneMessage::UpdateEntity { id, patch, changes });
            return Ok(());
        }

        mirror.entity = next;
        let applied = self.apply_changes(&mut mirror, changes);
        self.nodes.insert(id, mirror);
        applied
    }

    fn apply_changes(
        &mut self,
        mirror: &mut MirrorNode,
        changes: EntityChanges,
    ) -> Result<(), RenderError> {
        if changes.contains(EntityChanges::PARENT) {
            let parent = self.parent_node(mirror.entity.parent_id);
            self.backend.set_parent(mirror.node, parent)?;
        }

        if changes.contains(EntityChanges::TRANSFORM) {
            let entity = &mirror.entity;
            self.backend.set_local_transform(
                mirror.node,
                entity.position,
                entity.rotation,
                entity.scale,
            )?;
        }

        if changes.contains(EntityChanges::NAME) {
            self.backend.set_label(mirror.node, &mirror.entity.name)?;
        }

        if changes.contains(EntityChanges::MESH) {
            self.rebuild_drawable(mirror)?;
        } else if changes.contains(EntityChanges::MATERIAL) {
            self.bind_material(mirror)?;
        }

        let mesh_backed = mirror
            .entity
            .collider
            .is_some_and(|c| c.shape.needs_geometry());
        if changes.contains(EntityChanges::COLLIDER)
            || (changes.contains(EntityChanges::MESH) && mesh_backed)
        {
            self.rebuild_collider_visual(mirror)?;
        }

        Ok(())
    }

    fn rebuild_drawable(&mut self, mirror: &mut MirrorNode) -> Result<(), RenderError> {
        if let Some(old) = mirror.drawable.take() {
            self.backend.destroy_node(old);
        }

        let Some(mesh_id) = mirror.entity.mesh else {
            return Ok(());
        };
        let mesh = self
            .meshes
            .get(&mesh_id)
            .cloned()
            .ok_or(RenderError::UnknownMesh(mesh_id))?;

        let kind = if mesh.is_skinned() {
            NodeKind::SkinnedMesh(mesh_id)
        } else {
            NodeKind::Mesh(mesh_id)
        };
        let drawable = self.backend.create_node(kind)?;
        mirror.drawable = Some(drawable);
        self.backend.set_parent(drawable, Some(mirror.node))?;
        self.bind_material(mirror)?;

        if mesh.is_skinned() {
            let mut bones = Vec::with_capacity(mesh.joints().len());
            for joint in mesh.joints() {
                let joint_node = self
                    .nodes
                    .get_mut(joint)
                    .ok_or(RenderError::MissingJoint(*joint))?;
                if !joint_node.is_bone {
                    self.backend.convert_to_bone(joint_node.node)?;
                    joint_node.is_bone = true;
                }
                bones.push(joint_node.node);
            }
            self.backend.bind_skeleton(drawable, &bones)?;
        }

        Ok(())
    }

    fn bind_material(&mut self, mirror: &MirrorNode) -> Result<(), RenderError> {
        let Some(drawable) = mirror.drawable else {
            return Ok(());
        };

        let from_mesh = || {
            let mesh = self.meshes.get(&mirror.entity.mesh?)?;
            mesh.primitives.iter().find_map(|p| p.material)
        };
        let material = mirror
            .entity
            .material
            .or_else(from_mesh)
            .and_then(|id| self.materials.get(&id))
            .cloned();

        self.backend.bind_material(drawable, material.as_deref())
    }

    fn rebuild_collider_visual(&mut self, mirror: &mut MirrorNode) -> Result<(), RenderError> {
        if let Some(old) = mirror.collider_visual.take() {
            self.backend.destroy_node(old);
        }

        let Some(collider) = mirror.entity.collider else {
            return Ok(());
        };

        let visual = self
            .backend
            .create_node(NodeKind::ColliderVisual(collider.shape))?;
        mirror.collider_visual = Some(visual);
        if let Some(world) = mirror.world {
            self.backend.set_world_transform(visual, world)?;
        }

        if collider.shape.needs_geometry() {
            let id = mirror.entity.id;
            let mesh = mirror.entity.mesh.ok_or(RenderError::NoGeometry(id))?;
            let geometry = self.extract_geometry(mesh)?;
            self.send_physics(PhysicsCommand::ColliderGeometry { id, geometry });
        }

        Ok(())
    }

    /// Positions and triangle indices of every primitive, concatenated.
    fn extract_geometry(&self, mesh_id: MeshId) -> Result<ColliderGeometry, RenderError> {
        let mesh = self
            .meshes
            .get(&mesh_id)
            .ok_or(RenderError::UnknownMesh(mesh_id))?;

        let mut geometry = ColliderGeometry::default();
        for primitive in &mesh.primitives {
            let Some(positions) = primitive
                .attributes
                .get(&Attribute::Position)
                .and_then(|id| self.accessors.get(id))
            else {
                continue;
            };

            let base = geometry.vertices.len() as u32;
            let vertices = positions.vec3_items();
            let count = vertices.len() as u32;
            geometry.vertices.extend(vertices);

            let indices = match primitive.indices.and_then(|id| self.accessors.get(&id)) {
                Some(accessor) => accessor.indices(),
                None => (0..count).collect(),
            };
            geometry.indices.extend(
                indices
                    .chunks_exact(3)
                    .map(|t| [base + t[0], base + t[1], base + t[2]]),
            );
        }

        if geometry.is_empty() {
            return Err(RenderError::MissingPositions(mesh_id));
        }
        Ok(geometry)
    }

    fn send_physics(&mut self, command: PhysicsCommand) {
        if let Some(physics) = &self.physics
            && physics.send(command).is_err()
        {
            log::debug!("Physics loop is gone, no longer forwarding geometry");
            self.physics = None;
        }
    }

    fn rebind_material(&mut self, id: MaterialId) -> Result<(), RenderError> {
        let users: Vec<EntityId> = self
            .nodes
            .values()
            .filter(|n| n.entity.material == Some(id) || n.entity.mesh.is_some())
            .map(|n| n.entity.id)
            .collect();

        for entity in users {
            if let Some(mirror) = self.nodes.remove(&entity) {
                let bound = self.bind_material(&mirror);
                self.nodes.insert(entity, mirror);
                bound?;
            }
        }
        Ok(())
    }

    /// A mesh was replaced wholesale; rebuild everything drawing it.
    fn rebuild_mesh_users(&mut self, id: MeshId) -> Result<(), RenderError> {
        let users: Vec<EntityId> = self
            .nodes
            .values()
            .filter(|n| n.entity.mesh == Some(id))
            .map(|n| n.entity.id)
            .collect();

        for entity in users {
            if let Some(mut mirror) = self.nodes.remove(&entity) {
                let rebuilt = self.apply_changes(&mut mirror, EntityChanges::MESH);
                self.nodes.insert(entity, mirror);
                if let Err(e) = rebuilt {
                    self.record_failure(&e);
                }
            }
        }
        Ok(())
    }

    fn global_changed(&mut self, id: EntityId, world: Mat4) -> Result<(), RenderError> {
        if let Some(&dependency) = self.blocked.get(&id) {
            self.pending
                .defer(dependency, SceneMessage::GlobalTransformChanged { id, world });
            return Ok(());
        }

        let Some(mirror) = self.nodes.get_mut(&id) else {
            self.pending
                .defer(id, SceneMessage::GlobalTransformChanged { id, world });
            return Ok(());
        };

        mirror.world = Some(world);
        if let Some(visual) = mirror.collider_visual {
            self.backend.set_world_transform(visual, world)?;
        }
        Ok(())
    }

    fn remove_entity(&mut self, id: EntityId) {
        let parked = self.pending.discard(&id)
            + self
                .pending
                .discard_where(|message| message.entity_id() == Some(id));
        if parked > 0 {
            log::debug!("Discarded {parked} parked updates for {id}");
        }
        self.blocked
            .retain(|entity, dependency| *entity != id && *dependency != id);

        let Some(mirror) = self.nodes.remove(&id) else {
            return;
        };
        for node in [mirror.collider_visual, mirror.drawable, Some(mirror.node)]
            .into_iter()
            .flatten()
        {
            self.backend.destroy_node(node);
        }
    }

    fn apply_player(&mut self, event: PlayerEvent) -> Result<(), RenderError> {
        match event {
            PlayerEvent::Joined { player_id } => {
                if let Some(old) = self.remotes.remove(&player_id) {
                    self.backend.destroy_node(old.node);
                }
                let node = self.backend.create_node(NodeKind::Avatar(Some(player_id)))?;
                self.backend
                    .set_label(node, &format!("Player {player_id}"))?;
                self.remotes.insert(
                    player_id,
                    Avatar {
                        node,
                        transform: RemoteTransform::default(),
                        has_target: false,
                    },
                );
            }
            PlayerEvent::Left { player_id } => {
                if let Some(avatar) = self.remotes.remove(&player_id) {
                    self.backend.destroy_node(avatar.node);
                }
            }
            PlayerEvent::Nickname { player_id, name } => {
                if let Some(avatar) = self.remotes.get(&player_id) {
                    self.backend.set_label(avatar.node, &name)?;
                }
            }
            PlayerEvent::Address { .. } | PlayerEvent::Falling { .. } | PlayerEvent::Chat { .. } => {}
        }
        Ok(())
    }

    fn set_remote_target(&mut self, player_id: PlayerId, position: Vec3, rotation: Quat) {
        let Some(avatar) = self.remotes.get_mut(&player_id) else {
            log::trace!("Target for unknown player {player_id}");
            return;
        };

        if avatar.has_target {
            avatar.transform.set_target(position, rotation);
        } else {
            avatar.transform = RemoteTransform::new(position, rotation);
            avatar.has_target = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::mpsc;

    use super::*;
    use crate::render::HeadlessBackend;
    use crate::scene::{ColliderShape, Primitive, PrimitiveMode, Skin};

    fn mirror() -> RenderMirror<HeadlessBackend> {
        RenderMirror::new(HeadlessBackend::new(), &SpaceConfig::default())
    }

    fn scene(mirror: &mut RenderMirror<HeadlessBackend>, message: SceneMessage) {
        assert!(mirror.apply(message.into()));
    }

    fn triangle_mesh(id: u32, skin: Option<Skin>) -> (Arc<Accessor>, Arc<Mesh>) {
        let positions = Arc::new(Accessor::f32(
            AccessorId(id),
            3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        ));
        let mut attributes = BTreeMap::new();
        attributes.insert(Attribute::Position, AccessorId(id));
        let primitive = Primitive {
            attributes,
            indices: None,
            material: None,
            mode: PrimitiveMode::Triangles,
        };
        let mut mesh = Mesh::new(MeshId(id), "tri", vec![primitive]);
        if let Some(skin) = skin {
            mesh = mesh.with_skin(skin);
        }
        (positions, Arc::new(mesh))
    }

    #[test]
    fn tolerates_forward_references() {
        let mut mirror = mirror();
        let child = Entity::new(EntityId(2), "child").with_parent(EntityId(1));

        scene(&mut mirror, SceneMessage::AddEntity(child));
        scene(
            &mut mirror,
            SceneMessage::GlobalTransformChanged {
                id: EntityId(2),
                world: Mat4::from_translation(Vec3::X),
            },
        );
        assert_eq!(mirror.entity_count(), 0);
        assert_eq!(mirror.pending_count(), 2);

        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(1), "parent")),
        );
        assert_eq!(mirror.entity_count(), 2);
        assert_eq!(mirror.pending_count(), 0);

        let child_node = mirror.node(EntityId(2)).unwrap();
        let parent_node = mirror.node(EntityId(1)).unwrap();
        assert_eq!(
            mirror.backend().node(child_node).unwrap().parent,
            Some(parent_node)
        );
    }

    #[test]
    fn skinned_mesh_waits_for_joints_then_binds_bones() {
        let mut mirror = mirror();
        let skin = Skin {
            joints: vec![EntityId(10), EntityId(11)],
            inverse_bind_matrices: None,
        };
        let (accessor, mesh) = triangle_mesh(1, Some(skin));
        scene(&mut mirror, SceneMessage::AddAccessor(accessor));
        scene(&mut mirror, SceneMessage::AddMesh(mesh));

        let body = Entity::new(EntityId(5), "body").with_mesh(MeshId(1));
        scene(&mut mirror, SceneMessage::AddEntity(body));
        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(10), "hip")),
        );
        assert!(mirror.node(EntityId(5)).is_none());

        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(11), "knee")),
        );
        let drawable = mirror.drawable(EntityId(5)).unwrap();
        let node = mirror.backend().node(drawable).unwrap();
        assert_eq!(node.kind, NodeKind::SkinnedMesh(MeshId(1)));
        assert_eq!(node.skeleton.len(), 2);
        assert!(mirror.is_bone(EntityId(10)));
        assert!(mirror.is_bone(EntityId(11)));
    }

    #[test]
    fn transform_update_keeps_node_mesh_change_recreates_drawable() {
        let mut mirror = mirror();
        let (accessor, mesh) = triangle_mesh(1, None);
        scene(&mut mirror, SceneMessage::AddAccessor(accessor));
        scene(&mut mirror, SceneMessage::AddMesh(mesh));
        let (accessor, mesh) = triangle_mesh(2, None);
        scene(&mut mirror, SceneMessage::AddAccessor(accessor));
        scene(&mut mirror, SceneMessage::AddMesh(mesh));

        let id = EntityId(1);
        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(id, "thing").with_mesh(MeshId(1))),
        );
        let node = mirror.node(id).unwrap();
        let drawable = mirror.drawable(id).unwrap();

        let patch = EntityPatch::new().position(Vec3::new(0.0, 3.0, 0.0));
        let mut entity = Entity::new(id, "thing");
        let changes = entity.apply_patch(&patch);
        scene(&mut mirror, SceneMessage::UpdateEntity { id, patch, changes });
        assert_eq!(mirror.node(id), Some(node));
        assert_eq!(mirror.drawable(id), Some(drawable));
        assert_eq!(mirror.backend().node(node).unwrap().local.0.y, 3.0);

        let patch = EntityPatch::new().mesh(Some(MeshId(2)));
        scene(
            &mut mirror,
            SceneMessage::UpdateEntity {
                id,
                patch,
                changes: EntityChanges::MESH,
            },
        );
        assert_eq!(mirror.node(id), Some(node));
        assert_ne!(mirror.drawable(id), Some(drawable));
        assert!(mirror.backend().node(drawable).is_none());
    }

    #[test]
    fn updates_behind_a_parked_update_keep_their_order() {
        let mut mirror = mirror();
        let skin = Skin {
            joints: vec![EntityId(50)],
            inverse_bind_matrices: None,
        };
        let (accessor, mesh) = triangle_mesh(1, Some(skin));
        scene(&mut mirror, SceneMessage::AddAccessor(accessor));
        scene(&mut mirror, SceneMessage::AddMesh(mesh));

        let parent = EntityId(1);
        let child = EntityId(2);
        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(parent, "rig").with_mesh(MeshId(1))),
        );
        scene(&mut mirror, SceneMessage::AddEntity(Entity::new(child, "hand")));
        assert!(mirror.node(parent).is_none());

        let patch = EntityPatch::new()
            .parent(parent)
            .position(Vec3::new(-1.0, 0.0, 0.0));
        scene(
            &mut mirror,
            SceneMessage::UpdateEntity {
                id: child,
                patch,
                changes: EntityChanges::PARENT | EntityChanges::TRANSFORM,
            },
        );
        let patch = EntityPatch::new().position(Vec3::splat(9.0));
        scene(
            &mut mirror,
            SceneMessage::UpdateEntity {
                id: child,
                patch,
                changes: EntityChanges::TRANSFORM,
            },
        );
        scene(
            &mut mirror,
            SceneMessage::GlobalTransformChanged {
                id: child,
                world: Mat4::from_translation(Vec3::splat(9.0)),
            },
        );

        let child_node = mirror.node(child).unwrap();
        assert_eq!(mirror.backend().node(child_node).unwrap().parent, None);

        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(50), "joint")),
        );
        assert_eq!(mirror.pending_count(), 0);

        let node = mirror.backend().node(child_node).unwrap();
        assert_eq!(node.parent, mirror.node(parent));
        assert_eq!(node.local.0, Vec3::splat(9.0));

        let patch = EntityPatch::new().position(Vec3::ONE);
        scene(
            &mut mirror,
            SceneMessage::UpdateEntity {
                id: child,
                patch,
                changes: EntityChanges::TRANSFORM,
            },
        );
        assert_eq!(mirror.backend().node(child_node).unwrap().local.0, Vec3::ONE);
    }

    #[test]
    fn collider_visual_is_replaced_not_leaked() {
        let mut mirror = mirror();
        let id = EntityId(1);
        scene(
            &mut mirror,
            SceneMessage::AddEntity(
                Entity::new(id, "crate").with_collider(ColliderShape::Box {
                    half_extents: Vec3::ONE,
                }),
            ),
        );

        for radius in [1.0, 2.0, 3.0] {
            let patch = EntityPatch::new().collider(Some(crate::scene::Collider::new(
                ColliderShape::Sphere { radius },
            )));
            scene(
                &mut mirror,
                SceneMessage::UpdateEntity {
                    id,
                    patch,
                    changes: EntityChanges::COLLIDER,
                },
            );
        }

        let visuals = mirror
            .backend()
            .count(|k| matches!(k, NodeKind::ColliderVisual(_)));
        assert_eq!(visuals, 1);
        let visual = mirror.collider_visual(id).unwrap();
        assert_eq!(
            mirror.backend().node(visual).unwrap().kind,
            NodeKind::ColliderVisual(ColliderShape::Sphere { radius: 3.0 })
        );

        scene(&mut mirror, SceneMessage::RemoveEntity { id });
        assert_eq!(mirror.backend().live_nodes(), 0);
    }

    #[test]
    fn hull_collider_geometry_goes_to_physics() {
        let (tx, rx) = mpsc::channel();
        let mut mirror = mirror().with_physics(tx);
        let (accessor, mesh) = triangle_mesh(4, None);
        scene(&mut mirror, SceneMessage::AddAccessor(accessor));
        scene(&mut mirror, SceneMessage::AddMesh(mesh));

        let entity = Entity::new(EntityId(8), "rock")
            .with_mesh(MeshId(4))
            .with_collider(ColliderShape::Hull);
        scene(&mut mirror, SceneMessage::AddEntity(entity));

        match rx.try_recv().unwrap() {
            PhysicsCommand::ColliderGeometry { id, geometry } => {
                assert_eq!(id, EntityId(8));
                assert_eq!(geometry.vertices.len(), 4);
                assert_eq!(geometry.indices, [[0, 1, 2]]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn construction_failure_is_isolated() {
        let mut mirror = mirror();
        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(1), "a").with_mesh(MeshId(99))),
        );
        assert_eq!(mirror.failures(), 1);
        assert!(mirror.node(EntityId(1)).is_some());

        scene(
            &mut mirror,
            SceneMessage::AddEntity(Entity::new(EntityId(2), "b")),
        );
        assert_eq!(mirror.entity_count(), 2);
        assert!(mirror.frame().is_ok());
    }

    #[test]
    fn remote_avatars_follow_player_events() {
        let mut mirror = mirror();

        mirror.apply(MirrorInput::RemoteTarget {
            player_id: 3,
            position: Vec3::ONE,
            rotation: Quat::IDENTITY,
        });
        assert_eq!(mirror.remote_count(), 0);

        mirror.apply(MirrorInput::Player(PlayerEvent::Joined { player_id: 3 }));
        mirror.apply(MirrorInput::RemoteTarget {
            player_id: 3,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        });
        mirror.apply(MirrorInput::RemoteTarget {
            player_id: 3,
            position: Vec3::new(10.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        mirror.frame().unwrap();
        let x = mirror.remote_avatar(3).unwrap().position.x;
        assert!((x - 2.0).abs() < 1e-5);

        mirror.apply(MirrorInput::Player(PlayerEvent::Left { player_id: 3 }));
        assert!(mirror.remote_avatar(3).is_none());
        assert_eq!(mirror.backend().live_nodes(), 0);
    }

    #[test]
    fn local_avatar_tracks_kinematics() {
        let (mut writer, reader) = crate::sync::kinematic_channel();
        let mut mirror = mirror();
        mirror.attach_local_player(reader).unwrap();

        writer.publish(&crate::sync::KinematicState {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        });
        mirror.frame().unwrap();

        let (_, avatar) = mirror
            .backend()
            .nodes()
            .find(|(_, n)| n.kind == NodeKind::Avatar(None))
            .unwrap();
        let world = avatar.world.unwrap();
        assert_eq!(world.w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(mirror.backend().frames(), 1);
    }
}
