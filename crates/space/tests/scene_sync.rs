use std::sync::mpsc::{self, Receiver};

use glam::Vec3;
use spacesync::physics::PhysicsLoop;
use spacesync::render::{HeadlessBackend, MirrorInput, RenderMirror};
use spacesync::scene::{ColliderShape, Entity, EntityId, EntityPatch, SceneError, SceneStore};
use spacesync::sync::{SceneBus, kinematic_channel};
use spacesync::{PhysicsCommand, SpaceConfig};

struct Harness {
    store: SceneStore,
    physics: PhysicsLoop,
    mirror: RenderMirror<HeadlessBackend>,
    mirror_rx: Receiver<MirrorInput>,
}

impl Harness {
    fn new() -> Self {
        let config = SpaceConfig {
            ground_plane: false,
            ..SpaceConfig::default()
        };
        let (physics_tx, physics_rx) = mpsc::channel::<PhysicsCommand>();
        let (mirror_tx, mirror_rx) = mpsc::channel::<MirrorInput>();
        let (writer, _reader) = kinematic_channel();

        let mut bus = SceneBus::new();
        bus.subscribe("physics", physics_tx.clone());
        bus.subscribe("render", mirror_tx);

        Self {
            store: SceneStore::new(bus),
            physics: PhysicsLoop::new(config.clone(), physics_rx, writer),
            mirror: RenderMirror::new(HeadlessBackend::new(), &config).with_physics(physics_tx),
            mirror_rx,
        }
    }

    fn settle(&mut self) {
        while let Ok(input) = self.mirror_rx.try_recv() {
            self.mirror.apply(input);
        }
        self.physics.tick();
    }
}

fn crate_box(id: u32, parent: EntityId) -> Entity {
    Entity::new(EntityId(id), format!("crate-{id}"))
        .with_parent(parent)
        .with_position(Vec3::new(id as f32, 0.0, 0.0))
        .with_collider(ColliderShape::Box {
            half_extents: Vec3::splat(0.5),
        })
}

#[test]
fn subtree_removal_leaves_nothing_behind() {
    let mut h = Harness::new();

    h.store.add_entity(crate_box(1, EntityId::ROOT)).unwrap();
    h.store.add_entity(crate_box(2, EntityId(1))).unwrap();
    h.store.add_entity(crate_box(3, EntityId(2))).unwrap();
    h.settle();

    assert_eq!(h.physics.static_collider_count(), 3);
    assert_eq!(h.mirror.entity_count(), 3);
    for id in 1..=3 {
        assert!(h.physics.has_static_collider(EntityId(id)));
        assert!(h.mirror.collider_visual(EntityId(id)).is_some());
    }

    let removed = h.store.remove_entity(EntityId(1)).unwrap();
    assert_eq!(removed, vec![EntityId(3), EntityId(2), EntityId(1)]);
    h.settle();

    assert_eq!(h.physics.static_collider_count(), 0);
    assert_eq!(h.mirror.entity_count(), 0);
    assert_eq!(h.mirror.backend().live_nodes(), 0);
    assert_eq!(h.mirror.failures(), 0);
}

#[test]
fn rejected_reparent_changes_nothing_anywhere() {
    let mut h = Harness::new();

    h.store.add_entity(crate_box(1, EntityId::ROOT)).unwrap();
    h.store.add_entity(crate_box(2, EntityId(1))).unwrap();
    h.settle();

    let err = h
        .store
        .update_entity(EntityId(1), EntityPatch::new().parent(EntityId(2)))
        .unwrap_err();
    assert_eq!(
        err,
        SceneError::ParentCycle {
            entity: EntityId(1),
            parent: EntityId(2)
        }
    );
    assert_eq!(h.store.get(EntityId(1)).unwrap().parent_id, EntityId::ROOT);
    assert!(h.mirror_rx.try_recv().is_err());

    let parent_node = h.mirror.node(EntityId::ROOT);
    let node = h.mirror.node(EntityId(1)).unwrap();
    assert_eq!(h.mirror.backend().node(node).unwrap().parent, parent_node);
}

#[test]
fn moving_a_parent_moves_child_colliders() {
    let mut h = Harness::new();

    h.store.add_entity(crate_box(1, EntityId::ROOT)).unwrap();
    h.store.add_entity(crate_box(2, EntityId(1))).unwrap();
    h.settle();

    h.store
        .update_entity(
            EntityId(1),
            EntityPatch::new().position(Vec3::new(0.0, 10.0, 0.0)),
        )
        .unwrap();
    h.settle();

    let child = h.store.world_position(EntityId(2)).unwrap();
    assert!((child - Vec3::new(2.0, 10.0, 0.0)).length() < 1e-4);

    let visual = h.mirror.collider_visual(EntityId(2)).unwrap();
    let world = h.mirror.backend().node(visual).unwrap().world.unwrap();
    assert!((world.w_axis.truncate() - child).length() < 1e-4);
    assert!(h.physics.has_static_collider(EntityId(2)));
}
