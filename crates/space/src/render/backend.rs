use std::collections::BTreeMap;

use glam::{Mat4, Quat, Vec3};

use crate::player::PlayerId;
use crate::scene::{ColliderShape, EntityId, Material, MaterialId, MeshId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(MeshId),
    SkinnedMesh(MeshId),
    ColliderVisual(ColliderShape),
    /// `None` is the local player.
    Avatar(Option<PlayerId>),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render backend failure: {0}")]
    Backend(String),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("unknown mesh {0:?}")]
    UnknownMesh(MeshId),
    #[error("mesh {0:?} has no position data")]
    MissingPositions(MeshId),
    #[error("joint {0} has no render node")]
    MissingJoint(EntityId),
    #[error("{0} needs mesh geometry for its collider but has no mesh")]
    NoGeometry(EntityId),
}

/// Whatever actually draws. The mirror only ever talks to this.
pub trait RenderBackend: Send {
    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, RenderError>;

    fn destroy_node(&mut self, node: NodeId);

    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), RenderError>;

    fn set_local_transform(
        &mut self,
        node: NodeId,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
    ) -> Result<(), RenderError>;

    fn set_world_transform(&mut self, node: NodeId, world: Mat4) -> Result<(), RenderError>;

    fn bind_material(
        &mut self,
        node: NodeId,
        material: Option<&Material>,
    ) -> Result<(), RenderError>;

    fn convert_to_bone(&mut self, node: NodeId) -> Result<(), RenderError>;

    fn bind_skeleton(&mut self, node: NodeId, bones: &[NodeId]) -> Result<(), RenderError>;

    fn set_label(&mut self, node: NodeId, label: &str) -> Result<(), RenderError>;

    fn render_frame(&mut self) -> Result<(), RenderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub local: (Vec3, Quat, Vec3),
    pub world: Option<Mat4>,
    pub material: Option<MaterialId>,
    pub label: Option<String>,
    pub is_bone: bool,
    pub skeleton: Vec<NodeId>,
}

/// Keeps the node graph in memory and draws nothing.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    nodes: BTreeMap<NodeId, HeadlessNode>,
    next_id: u64,
    frames: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&HeadlessNode> {
        self.nodes.get(&id)
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &HeadlessNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn count(&self, matches: impl Fn(&NodeKind) -> bool) -> usize {
        self.nodes.values().filter(|n| matches(&n.kind)).count()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut HeadlessNode, RenderError> {
        self.nodes.get_mut(&id).ok_or(RenderError::UnknownNode(id))
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, RenderError> {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            HeadlessNode {
                kind,
                parent: None,
                local: (Vec3::ZERO, Quat::IDENTITY, Vec3::ONE),
                world: None,
                material: None,
                label: None,
                is_bone: false,
                skeleton: Vec::new(),
            },
        );
        log::trace!("Created node {id:?} ({kind:?})");
        Ok(id)
    }

    fn destroy_node(&mut self, node: NodeId) {
        if self.nodes.remove(&node).is_some() {
            for child in self.nodes.values_mut() {
                if child.parent == Some(node) {
                    child.parent = None;
                }
            }
        }
    }

    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), RenderError> {
        if let Some(parent) = parent
            && !self.nodes.contains_key(&parent)
        {
            return Err(RenderError::UnknownNode(parent));
        }
        self.get_mut(node)?.parent = parent;
        Ok(())
    }

    fn set_local_transform(
        &mut self,
        node: NodeId,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
    ) -> Result<(), RenderError> {
        self.get_mut(node)?.local = (position, rotation, scale);
        Ok(())
    }

    fn set_world_transform(&mut self, node: NodeId, world: Mat4) -> Result<(), RenderError> {
        self.get_mut(node)?.world = Some(world);
        Ok(())
    }

    fn bind_material(
        &mut self,
        node: NodeId,
        material: Option<&Material>,
    ) -> Result<(), RenderError> {
        self.get_mut(node)?.material = material.map(|m| m.id);
        Ok(())
    }

    fn convert_to_bone(&mut self, node: NodeId) -> Result<(), RenderError> {
        self.get_mut(node)?.is_bone = true;
        Ok(())
    }

    fn bind_skeleton(&mut self, node: NodeId, bones: &[NodeId]) -> Result<(), RenderError> {
        if let Some(missing) = bones.iter().find(|b| !self.nodes.contains_key(b)) {
            return Err(RenderError::UnknownNode(*missing));
        }
        self.get_mut(node)?.skeleton = bones.to_vec();
        Ok(())
    }

    fn set_label(&mut self, node: NodeId, label: &str) -> Result<(), RenderError> {
        self.get_mut(node)?.label = Some(label.to_owned());
        Ok(())
    }

    fn render_frame(&mut self) -> Result<(), RenderError> {
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroying_parent_detaches_children() {
        let mut backend = HeadlessBackend::new();
        let parent = backend.create_node(NodeKind::Group).unwrap();
        let child = backend.create_node(NodeKind::Group).unwrap();
        backend.set_parent(child, Some(parent)).unwrap();

        backend.destroy_node(parent);
        assert_eq!(backend.live_nodes(), 1);
        assert_eq!(backend.node(child).unwrap().parent, None);
        assert!(matches!(
            backend.set_parent(child, Some(parent)),
            Err(RenderError::UnknownNode(_))
        ));
    }
}
