use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeshId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessorId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum AccessorData {
    F32(Arc<[f32]>),
    U32(Arc<[u32]>),
    U16(Arc<[u16]>),
}

impl AccessorData {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(data) => data.len(),
            Self::U32(data) => data.len(),
            Self::U16(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed view over a buffer: `count` items of `item_size` components.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub id: AccessorId,
    pub item_size: usize,
    pub data: AccessorData,
}

impl Accessor {
    pub fn f32(id: AccessorId, item_size: usize, data: Vec<f32>) -> Self {
        Self {
            id,
            item_size,
            data: AccessorData::F32(data.into()),
        }
    }

    pub fn u32(id: AccessorId, data: Vec<u32>) -> Self {
        Self {
            id,
            item_size: 1,
            data: AccessorData::U32(data.into()),
        }
    }

    pub fn u16(id: AccessorId, data: Vec<u16>) -> Self {
        Self {
            id,
            item_size: 1,
            data: AccessorData::U16(data.into()),
        }
    }

    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            return 0;
        }
        self.data.len() / self.item_size
    }

    pub fn vec3_items(&self) -> Vec<[f32; 3]> {
        match &self.data {
            AccessorData::F32(data) if self.item_size == 3 => data
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn indices(&self) -> Vec<u32> {
        match &self.data {
            AccessorData::U32(data) => data.to_vec(),
            AccessorData::U16(data) => data.iter().map(|&i| i as u32).collect(),
            AccessorData::F32(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Attribute {
    Position,
    Normal,
    Tangent,
    TexCoord0,
    Joints0,
    Weights0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrimitiveMode {
    Points,
    Lines,
    #[default]
    Triangles,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Primitive {
    pub attributes: BTreeMap<Attribute, AccessorId>,
    pub indices: Option<AccessorId>,
    pub material: Option<MaterialId>,
    pub mode: PrimitiveMode,
}

impl Primitive {
    pub fn accessor_ids(&self) -> impl Iterator<Item = AccessorId> + '_ {
        self.attributes.values().copied().chain(self.indices)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skin {
    pub joints: Vec<EntityId>,
    pub inverse_bind_matrices: Option<AccessorId>,
}

/// Geometry description. Immutable once created; updates replace the whole mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub id: MeshId,
    pub name: String,
    pub primitives: Vec<Primitive>,
    pub skin: Option<Skin>,
}

impl Mesh {
    pub fn new(id: MeshId, name: impl Into<String>, primitives: Vec<Primitive>) -> Self {
        Self {
            id,
            name: name.into(),
            primitives,
            skin: None,
        }
    }

    pub fn with_skin(mut self, skin: Skin) -> Self {
        self.skin = Some(skin);
        self
    }

    pub fn is_skinned(&self) -> bool {
        self.skin.as_ref().is_some_and(|s| !s.joints.is_empty())
    }

    pub fn joints(&self) -> &[EntityId] {
        match &self.skin {
            Some(skin) => &skin.joints,
            None => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
}

impl Material {
    pub fn new(id: MaterialId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            metallic: 0.0,
            roughness: 1.0,
        }
    }

    pub fn with_color(mut self, base_color: [f32; 4]) -> Self {
        self.base_color = base_color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_views() {
        let positions = Accessor::f32(AccessorId(1), 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(positions.count(), 2);
        assert_eq!(positions.vec3_items(), vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);

        let indices = Accessor::u16(AccessorId(2), vec![0, 1, 2]);
        assert_eq!(indices.indices(), vec![0, 1, 2]);
        assert!(indices.vec3_items().is_empty());
    }
}
