use glam::{Mat4, Quat, Vec3};
use rapier3d::control::{EffectiveCharacterMovement, KinematicCharacterController};
use rapier3d::prelude::*;

const GROUND_HALF_SIZE: Real = 500.0;
const GROUND_HALF_THICKNESS: Real = 0.5;

/// Thin wrapper over the rapier pipeline and its sets.
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
}

impl PhysicsWorld {
    pub fn new(dt: Real, gravity: Real) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.min_ccd_dt = dt / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, -gravity, 0.0),
        }
    }

    pub fn step(&mut self) {
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    pub fn add_player(&mut self, position: Vec3, radius: Real, height: Real) -> RigidBodyHandle {
        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(Vector::new(position.x, position.y, position.z))
            .lock_rotations()
            .build();

        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::cylinder(height / 2.0, radius)
            .friction(0.0)
            .build();

        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        handle
    }

    /// A wide static slab whose top face sits at `y`.
    pub fn add_ground(&mut self, y: Real) -> ColliderHandle {
        let collider =
            ColliderBuilder::cuboid(GROUND_HALF_SIZE, GROUND_HALF_THICKNESS, GROUND_HALF_SIZE)
                .translation(Vector::new(0.0, y - GROUND_HALF_THICKNESS, 0.0))
                .build();
        self.colliders.insert(collider)
    }

    pub fn insert_static(&mut self, builder: ColliderBuilder, world: &Mat4) -> ColliderHandle {
        let (_, rotation, translation) = world.to_scale_rotation_translation();
        let collider = builder.position(pose(translation, rotation)).build();
        self.colliders.insert(collider)
    }

    pub fn set_static_pose(&mut self, handle: ColliderHandle, world: &Mat4) {
        let (_, rotation, translation) = world.to_scale_rotation_translation();
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_position(pose(translation, rotation));
        }
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) {
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, true);
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn contains_collider(&self, handle: ColliderHandle) -> bool {
        self.colliders.contains(handle)
    }

    pub fn body_pose(&self, handle: RigidBodyHandle) -> Pose {
        self.bodies
            .get(handle)
            .map(|b| *b.position())
            .unwrap_or(Pose::IDENTITY)
    }

    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }

    pub fn set_body_position(&mut self, handle: RigidBodyHandle, position: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            let current_rot = *body.rotation();
            let new_pose =
                Pose::from_parts(Vector::new(position.x, position.y, position.z), current_rot);
            body.set_position(new_pose, true);
        }
    }

    pub fn move_character(
        &self,
        controller: &KinematicCharacterController,
        handle: RigidBodyHandle,
        shape: &SharedShape,
        desired_translation: Vec3,
    ) -> EffectiveCharacterMovement {
        let filter = QueryFilter::default().exclude_rigid_body(handle);
        let query_pipeline = self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        );

        controller.move_shape(
            self.integration_parameters.dt,
            &query_pipeline,
            shape.as_ref(),
            &self.body_pose(handle),
            Vector::new(
                desired_translation.x,
                desired_translation.y,
                desired_translation.z,
            ),
            |_collision| {},
        )
    }
}

fn pose(translation: Vec3, rotation: Quat) -> Pose {
    let rot = Rotation::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w).normalize();
    Pose::from_parts(Vector::new(translation.x, translation.y, translation.z), rot)
}
