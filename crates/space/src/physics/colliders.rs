use glam::{Mat4, Vec3};
use rapier3d::prelude::*;

use crate::scene::{Collider, ColliderGeometry, ColliderShape};

/// Static collider state tracked for one scene entity.
#[derive(Debug, Clone)]
pub(crate) struct StaticBody {
    pub collider: Collider,
    pub world: Option<Mat4>,
    pub geometry: Option<ColliderGeometry>,
    pub handle: Option<ColliderHandle>,
}

impl StaticBody {
    pub fn new(collider: Collider) -> Self {
        Self {
            collider,
            world: None,
            geometry: None,
            handle: None,
        }
    }

    /// Everything needed to build the rapier collider has arrived.
    pub fn is_buildable(&self) -> bool {
        self.world.is_some() && (!self.collider.shape.needs_geometry() || self.geometry.is_some())
    }

    pub fn scale(&self) -> Vec3 {
        self.world
            .map(|w| w.to_scale_rotation_translation().0)
            .unwrap_or(Vec3::ONE)
    }
}

pub(crate) fn build_collider(
    shape: &ColliderShape,
    scale: Vec3,
    geometry: Option<&ColliderGeometry>,
) -> Option<ColliderBuilder> {
    let scale = scale.abs();
    match shape {
        ColliderShape::Box { half_extents } => {
            let h = *half_extents * scale;
            Some(ColliderBuilder::cuboid(h.x, h.y, h.z))
        }
        ColliderShape::Sphere { radius } => Some(ColliderBuilder::ball(radius * scale.max_element())),
        ColliderShape::Cylinder {
            half_height,
            radius,
        } => Some(ColliderBuilder::cylinder(
            half_height * scale.y,
            radius * scale.x.max(scale.z),
        )),
        ColliderShape::Hull => {
            let points = scaled_points(geometry?, scale);
            ColliderBuilder::convex_hull(&points)
        }
        ColliderShape::Mesh => {
            let geometry = geometry?;
            let points = scaled_points(geometry, scale);
            ColliderBuilder::trimesh(points, geometry.indices.clone()).ok()
        }
    }
}

fn scaled_points(geometry: &ColliderGeometry, scale: Vec3) -> Vec<Vector> {
    geometry
        .vertices
        .iter()
        .map(|v| Vector::new(v[0] * scale.x, v[1] * scale.y, v[2] * scale.z))
        .collect()
}
