use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use glam::{Mat4, Vec3};
use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::prelude::*;

use crate::config::SpaceConfig;
use crate::scene::{ColliderGeometry, EntityChanges, EntityId, SceneMessage};
use crate::sync::{KinematicState, KinematicWriter};

use super::colliders::{StaticBody, build_collider};
use super::{FixedTimestep, PhysicsWorld, PlayerMotion};

const SCALE_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone)]
pub enum PhysicsCommand {
    Scene(SceneMessage),
    /// Vertex data for a hull or mesh collider, extracted by the render side.
    ColliderGeometry {
        id: EntityId,
        geometry: ColliderGeometry,
    },
    Input {
        horizontal: Vec3,
        yaw: f32,
    },
    Jump,
    Teleport(Vec3),
}

impl From<SceneMessage> for PhysicsCommand {
    fn from(message: SceneMessage) -> Self {
        PhysicsCommand::Scene(message)
    }
}

/// Fixed-rate simulation of the local player against static scene colliders.
pub struct PhysicsLoop {
    config: SpaceConfig,
    world: PhysicsWorld,
    controller: KinematicCharacterController,
    player: RigidBodyHandle,
    player_shape: SharedShape,
    motion: PlayerMotion,
    statics: HashMap<EntityId, StaticBody>,
    commands: Receiver<PhysicsCommand>,
    writer: KinematicWriter,
    timestep: FixedTimestep,
    ticks: u64,
    detached: bool,
}

impl PhysicsLoop {
    pub fn new(
        config: SpaceConfig,
        commands: Receiver<PhysicsCommand>,
        writer: KinematicWriter,
    ) -> Self {
        let dt = config.physics_dt();
        let mut world = PhysicsWorld::new(dt, config.gravity);

        if config.ground_plane {
            world.add_ground(0.0);
        }

        let half_height = config.player_height / 2.0;
        let spawn = Vec3::new(0.0, config.spawn_height + half_height, 0.0);
        let player = world.add_player(spawn, config.player_radius, config.player_height);
        let player_shape = SharedShape::cylinder(half_height, config.player_radius);

        let mut controller = KinematicCharacterController::default();
        controller.offset = CharacterLength::Absolute(0.02);
        controller.up = Vector::Y;
        controller.max_slope_climb_angle = 50_f32.to_radians();
        controller.min_slope_slide_angle = 35_f32.to_radians();
        controller.snap_to_ground = Some(CharacterLength::Absolute(0.1));
        controller.autostep = Some(CharacterAutostep {
            max_height: CharacterLength::Absolute(0.3),
            min_width: CharacterLength::Absolute(0.15),
            include_dynamic_bodies: false,
        });

        let timestep = FixedTimestep::new(config.physics_rate);

        let mut simulation = Self {
            config,
            world,
            controller,
            player,
            player_shape,
            motion: PlayerMotion::new(),
            statics: HashMap::new(),
            commands,
            writer,
            timestep,
            ticks: 0,
            detached: false,
        };
        simulation.publish();
        simulation
    }

    /// Drains pending commands, then runs exactly one fixed step.
    pub fn tick(&mut self) {
        self.drain_commands();

        let dt = self.timestep.dt();
        let desired = self.motion.integrate(&self.config, dt);

        let movement =
            self.world
                .move_character(&self.controller, self.player, &self.player_shape, desired);

        let current = self.world.body_pose(self.player).translation;
        let next = current + movement.translation;
        self.world
            .set_body_position(self.player, Vec3::new(next.x, next.y, next.z));

        self.motion.resolve(movement.grounded);
        self.world.step();
        self.ticks += 1;

        self.publish();
    }

    /// Runs as many ticks as `elapsed` wall time makes due.
    pub fn update(&mut self, elapsed: std::time::Duration) -> u32 {
        let due = self.timestep.advance(elapsed);
        for _ in 0..due {
            self.tick();
        }
        due
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn motion(&self) -> &PlayerMotion {
        &self.motion
    }

    /// Feet position of the local player.
    pub fn player_position(&self) -> Vec3 {
        self.world
            .body_position(self.player)
            .map(|p| p - Vec3::Y * (self.config.player_height / 2.0))
            .unwrap_or(Vec3::ZERO)
    }

    pub fn static_collider_count(&self) -> usize {
        self.statics.values().filter(|s| s.handle.is_some()).count()
    }

    pub fn has_static_collider(&self, id: EntityId) -> bool {
        self.statics
            .get(&id)
            .and_then(|s| s.handle)
            .is_some_and(|h| self.world.contains_collider(h))
    }

    pub fn spawn(mut self) -> io::Result<PhysicsHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("physics".into())
            .spawn(move || {
                log::info!("Physics loop running at {} Hz", self.timestep.rate());
                let mut last = Instant::now();

                while flag.load(Ordering::Acquire) && !self.detached {
                    let now = Instant::now();
                    self.update(now - last);
                    last = now;
                    thread::sleep(self.timestep.until_next());
                }

                log::info!("Physics loop stopped after {} ticks", self.ticks);
            })?;

        Ok(PhysicsHandle {
            running,
            thread: Some(thread),
        })
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.detached {
                        log::debug!("Physics command channel closed");
                    }
                    self.detached = true;
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, command: PhysicsCommand) {
        match command {
            PhysicsCommand::Scene(message) => self.apply_scene(message),
            PhysicsCommand::ColliderGeometry { id, geometry } => {
                let Some(body) = self.statics.get_mut(&id) else {
                    log::debug!("Geometry for {id} without a collider, ignoring");
                    return;
                };
                if !body.collider.shape.needs_geometry() {
                    return;
                }
                body.geometry = Some(geometry);
                self.rebuild(id);
            }
            PhysicsCommand::Input { horizontal, yaw } => self.motion.set_input(horizontal, yaw),
            PhysicsCommand::Jump => self.motion.request_jump(),
            PhysicsCommand::Teleport(feet) => {
                let center = feet + Vec3::Y * (self.config.player_height / 2.0);
                self.world.set_body_position(self.player, center);
                self.motion.stop();
            }
        }
    }

    fn apply_scene(&mut self, message: SceneMessage) {
        match message {
            SceneMessage::AddEntity(entity) => {
                if let Some(collider) = entity.collider {
                    self.remove_static(entity.id);
                    self.statics.insert(entity.id, StaticBody::new(collider));
                }
            }
            SceneMessage::UpdateEntity { id, patch, changes } => {
                if changes.contains(EntityChanges::COLLIDER) {
                    let world = self.statics.get(&id).and_then(|s| s.world);
                    self.remove_static(id);
                    if let Some(Some(collider)) = patch.collider {
                        let mut body = StaticBody::new(collider);
                        body.world = world;
                        self.statics.insert(id, body);
                        self.rebuild(id);
                    }
                } else if changes.contains(EntityChanges::MESH) {
                    let stale = self
                        .statics
                        .get_mut(&id)
                        .filter(|s| s.collider.shape.needs_geometry())
                        .map(|s| s.geometry.take());
                    if stale.is_some() {
                        self.rebuild(id);
                    }
                }
            }
            SceneMessage::GlobalTransformChanged { id, world } => self.move_static(id, world),
            SceneMessage::RemoveEntity { id } => self.remove_static(id),
            SceneMessage::AddAccessor(_)
            | SceneMessage::AddMaterial(_)
            | SceneMessage::AddMesh(_) => {}
        }
    }

    fn move_static(&mut self, id: EntityId, world: Mat4) {
        let Some(body) = self.statics.get_mut(&id) else {
            return;
        };

        let previous_scale = body.scale();
        let had_world = body.world.is_some();
        body.world = Some(world);
        let same_scale = previous_scale.abs_diff_eq(body.scale(), SCALE_EPSILON);

        match body.handle {
            Some(handle) if had_world && same_scale => self.world.set_static_pose(handle, &world),
            _ => self.rebuild(id),
        }
    }

    fn rebuild(&mut self, id: EntityId) {
        let Some(body) = self.statics.get_mut(&id) else {
            return;
        };

        if let Some(handle) = body.handle.take() {
            self.world.remove_collider(handle);
        }

        let Some(world) = body.world.filter(|_| body.is_buildable()) else {
            return;
        };

        match build_collider(&body.collider.shape, body.scale(), body.geometry.as_ref()) {
            Some(builder) => body.handle = Some(self.world.insert_static(builder, &world)),
            None => log::warn!("Could not build collider for {id}"),
        }
    }

    fn remove_static(&mut self, id: EntityId) {
        if let Some(body) = self.statics.remove(&id)
            && let Some(handle) = body.handle
        {
            self.world.remove_collider(handle);
        }
    }

    fn publish(&mut self) {
        let state = KinematicState {
            position: self.player_position(),
            rotation: self.motion.rotation(),
            velocity: self.motion.velocity(),
            is_falling: self.motion.is_falling(),
        };
        self.writer.publish(&state);
    }
}

/// Owner of the running physics thread.
pub struct PhysicsHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PhysicsHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the loop and joins the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Physics thread panicked");
        }
    }
}

impl Drop for PhysicsHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Sender};
    use std::time::Duration;

    use super::*;
    use crate::scene::{ColliderShape, Entity, EntityPatch};
    use crate::sync::{KinematicReader, kinematic_channel};

    fn setup(config: SpaceConfig) -> (PhysicsLoop, Sender<PhysicsCommand>, KinematicReader) {
        let (tx, rx) = mpsc::channel();
        let (writer, reader) = kinematic_channel();
        (PhysicsLoop::new(config, rx, writer), tx, reader)
    }

    fn add_static(tx: &Sender<PhysicsCommand>, id: u32, shape: ColliderShape, world: Mat4) {
        let entity = Entity::new(EntityId(id), "static").with_collider(shape);
        tx.send(SceneMessage::AddEntity(entity).into()).unwrap();
        tx.send(
            SceneMessage::GlobalTransformChanged {
                id: EntityId(id),
                world,
            }
            .into(),
        )
        .unwrap();
    }

    #[test]
    fn player_falls_and_lands_on_ground() {
        let (mut sim, _tx, reader) = setup(SpaceConfig::default());
        assert!((reader.position().y - 2.0).abs() < 1e-4);

        sim.tick();
        assert!(reader.is_falling());

        for _ in 0..180 {
            sim.tick();
        }

        let state = reader.load();
        assert!(state.position.y.abs() < 0.1, "y = {}", state.position.y);
        assert!(!state.is_falling);
        assert!(sim.motion().is_grounded());
    }

    #[test]
    fn lands_on_static_box_without_ground_plane() {
        let config = SpaceConfig {
            ground_plane: false,
            spawn_height: 5.0,
            ..SpaceConfig::default()
        };
        let (mut sim, tx, reader) = setup(config);

        add_static(
            &tx,
            1,
            ColliderShape::Box {
                half_extents: Vec3::new(5.0, 1.0, 5.0),
            },
            Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)),
        );

        for _ in 0..240 {
            sim.tick();
        }

        assert_eq!(sim.static_collider_count(), 1);
        let y = reader.position().y;
        assert!((y - 2.0).abs() < 0.1, "y = {y}");
        assert!(!reader.is_falling());
    }

    #[test]
    fn jump_leaves_ground_once() {
        let (mut sim, tx, reader) = setup(SpaceConfig::default());
        for _ in 0..180 {
            sim.tick();
        }
        assert!(sim.motion().is_grounded());

        tx.send(PhysicsCommand::Jump).unwrap();
        tx.send(PhysicsCommand::Jump).unwrap();
        sim.tick();

        let config = SpaceConfig::default();
        let state = reader.load();
        assert_eq!(state.velocity.y, config.jump_velocity);
        assert!(!state.is_falling);

        sim.tick();
        assert!(reader.load().velocity.y < config.jump_velocity);
    }

    #[test]
    fn static_collider_follows_entity_lifecycle() {
        let (mut sim, tx, _reader) = setup(SpaceConfig::default());
        let id = EntityId(7);

        add_static(
            &tx,
            7,
            ColliderShape::Sphere { radius: 1.0 },
            Mat4::from_translation(Vec3::new(10.0, 1.0, 0.0)),
        );
        sim.tick();
        assert!(sim.has_static_collider(id));

        let patch = EntityPatch::default().collider(None);
        tx.send(
            SceneMessage::UpdateEntity {
                id,
                patch,
                changes: EntityChanges::COLLIDER,
            }
            .into(),
        )
        .unwrap();
        sim.tick();
        assert!(!sim.has_static_collider(id));
        assert_eq!(sim.static_collider_count(), 0);

        add_static(
            &tx,
            7,
            ColliderShape::Box {
                half_extents: Vec3::ONE,
            },
            Mat4::IDENTITY,
        );
        tx.send(SceneMessage::RemoveEntity { id }.into()).unwrap();
        sim.tick();
        assert_eq!(sim.static_collider_count(), 0);
    }

    #[test]
    fn hull_waits_for_geometry() {
        let (mut sim, tx, _reader) = setup(SpaceConfig::default());
        let id = EntityId(3);

        add_static(
            &tx,
            3,
            ColliderShape::Hull,
            Mat4::from_translation(Vec3::new(-10.0, 0.0, 0.0)),
        );
        sim.tick();
        assert!(!sim.has_static_collider(id));

        let geometry = ColliderGeometry {
            vertices: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            indices: Vec::new(),
        };
        tx.send(PhysicsCommand::ColliderGeometry { id, geometry })
            .unwrap();
        sim.tick();
        assert!(sim.has_static_collider(id));
    }

    #[test]
    fn handle_stop_is_idempotent() {
        let (sim, tx, reader) = setup(SpaceConfig::default());
        let mut handle = sim.spawn().unwrap();

        tx.send(PhysicsCommand::Teleport(Vec3::new(4.0, 0.0, 0.0)))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(handle.is_running());
        assert!(reader.version() > 1);

        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
        assert!((reader.position().x - 4.0).abs() < 1e-3);
    }
}
