use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use spacesync::scene::{
    Accessor, AccessorId, Attribute, ColliderShape, Entity, EntityId, Material, MaterialId, Mesh,
    MeshId, Primitive, PrimitiveMode, SceneError, SceneStore,
};

/// Ids of the entities worth poking at after the scene is built.
#[derive(Debug, Clone, Copy)]
pub struct DemoScene {
    pub platform: EntityId,
    pub pyramid: EntityId,
    pub stack: EntityId,
    pub boulder: EntityId,
}

impl DemoScene {
    /// Ground-level points next to each feature, for something to walk to.
    pub fn landmarks(&self, store: &SceneStore) -> Vec<Vec3> {
        [self.platform, self.pyramid, self.stack, self.boulder]
            .into_iter()
            .filter_map(|id| store.world_position(id))
            .map(|p| Vec3::new(p.x, 0.0, p.z))
            .collect()
    }
}

const PYRAMID_POSITIONS: AccessorId = AccessorId(1);
const PYRAMID_INDICES: AccessorId = AccessorId(2);
const PYRAMID_MESH: MeshId = MeshId(1);
const STONE: MaterialId = MaterialId(1);
const WOOD: MaterialId = MaterialId(2);

fn pyramid(store: &mut SceneStore) -> Result<MeshId, SceneError> {
    #[rustfmt::skip]
    let positions = vec![
        -1.0, 0.0, -1.0,
         1.0, 0.0, -1.0,
         1.0, 0.0,  1.0,
        -1.0, 0.0,  1.0,
         0.0, 1.5,  0.0,
    ];
    let indices = vec![0, 1, 2, 0, 2, 3, 0, 4, 1, 1, 4, 2, 2, 4, 3, 3, 4, 0];

    store.add_accessor(Accessor::f32(PYRAMID_POSITIONS, 3, positions));
    store.add_accessor(Accessor::u16(PYRAMID_INDICES, indices));

    let primitive = Primitive {
        attributes: BTreeMap::from([(Attribute::Position, PYRAMID_POSITIONS)]),
        indices: Some(PYRAMID_INDICES),
        material: Some(STONE),
        mode: PrimitiveMode::Triangles,
    };
    store.add_mesh(Mesh::new(PYRAMID_MESH, "pyramid", vec![primitive]))
}

/// Fills an empty store with a small course to walk around.
pub fn build(store: &mut SceneStore) -> Result<DemoScene, SceneError> {
    store.add_material(Material::new(STONE, "stone").with_color([0.55, 0.55, 0.6, 1.0]));
    store.add_material(Material::new(WOOD, "wood").with_color([0.6, 0.4, 0.2, 1.0]));
    let mesh = pyramid(store)?;

    let platform = store.allocate_id();
    store.add_entity(
        Entity::new(platform, "platform")
            .with_position(Vec3::new(6.0, 0.25, 0.0))
            .with_material(STONE)
            .with_collider(ColliderShape::Box {
                half_extents: Vec3::new(2.0, 0.25, 2.0),
            }),
    )?;

    let pyramid = store.allocate_id();
    store.add_entity(
        Entity::new(pyramid, "pyramid")
            .with_position(Vec3::new(-6.0, 0.0, 0.0))
            .with_scale(Vec3::splat(2.0))
            .with_mesh(mesh)
            .with_collider(ColliderShape::Hull),
    )?;

    let stack = store.allocate_id();
    store.add_entity(
        Entity::new(stack, "stack")
            .with_position(Vec3::new(0.0, 0.0, 6.0))
            .with_rotation(Quat::from_rotation_y(0.4)),
    )?;
    for level in 0..3 {
        let id = store.allocate_id();
        store.add_entity(
            Entity::new(id, format!("crate-{level}"))
                .with_parent(stack)
                .with_position(Vec3::new(0.0, 0.5 + level as f32, 0.0))
                .with_material(WOOD)
                .with_collider(ColliderShape::Box {
                    half_extents: Vec3::splat(0.5),
                }),
        )?;
    }

    let boulder = store.allocate_id();
    store.add_entity(
        Entity::new(boulder, "boulder")
            .with_position(Vec3::new(0.0, 1.0, -6.0))
            .with_material(STONE)
            .with_collider(ColliderShape::Sphere { radius: 1.0 }),
    )?;

    log::info!("Demo scene ready with {} entities", store.len());
    Ok(DemoScene {
        platform,
        pyramid,
        stack,
        boulder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_consistent_scene() {
        let mut store = SceneStore::default();
        let demo = build(&mut store).unwrap();

        assert_eq!(store.len(), 7);
        assert_eq!(store.children(demo.stack).len(), 3);
        store.validate().unwrap();

        let top = store.children(demo.stack)[2];
        let world = store.world_position(top).unwrap();
        assert!((world.y - 2.5).abs() < 1e-5);
        assert!((Vec3::new(world.x, 0.0, world.z) - Vec3::new(0.0, 0.0, 6.0)).length() < 1e-5);
    }

    #[test]
    fn landmarks_sit_on_the_ground_plane() {
        let mut store = SceneStore::default();
        let demo = build(&mut store).unwrap();

        let landmarks = demo.landmarks(&store);
        assert_eq!(landmarks.len(), 4);
        assert!(landmarks.iter().all(|p| p.y == 0.0));
        assert!(landmarks.contains(&Vec3::new(6.0, 0.0, 0.0)));
    }
}
