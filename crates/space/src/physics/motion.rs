use glam::{Quat, Vec3};

use crate::config::SpaceConfig;

/// Local player motion state owned by the physics loop.
///
/// Horizontal velocity is input, set from outside every tick. Vertical
/// velocity is integrated here.
#[derive(Debug, Clone, Default)]
pub struct PlayerMotion {
    horizontal: Vec3,
    vertical: f32,
    yaw: f32,
    grounded: bool,
    jump_requested: bool,
}

impl PlayerMotion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, horizontal: Vec3, yaw: f32) {
        self.horizontal = Vec3::new(horizontal.x, 0.0, horizontal.z);
        self.yaw = yaw;
    }

    /// Repeated requests before the next tick collapse into one jump.
    pub fn request_jump(&mut self) {
        self.jump_requested = true;
    }

    pub fn jump_pending(&self) -> bool {
        self.jump_requested
    }

    /// Advances vertical velocity by one tick and returns the desired translation.
    ///
    /// Gravity first, then the terminal clamp, then the jump. A jump request
    /// is consumed by this call whether or not the player is on the ground.
    pub fn integrate(&mut self, config: &SpaceConfig, dt: f32) -> Vec3 {
        self.vertical -= config.gravity * dt;
        self.vertical = self
            .vertical
            .clamp(-config.terminal_velocity, config.terminal_velocity);

        if std::mem::take(&mut self.jump_requested) && self.grounded {
            self.vertical = config.jump_velocity;
            self.grounded = false;
        }

        self.velocity() * dt
    }

    /// Feeds back the collision result of the tick.
    pub fn resolve(&mut self, grounded: bool) {
        self.grounded = grounded;
        if grounded && self.vertical < 0.0 {
            self.vertical = 0.0;
        }
    }

    pub fn stop(&mut self) {
        self.vertical = 0.0;
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.horizontal.x, self.vertical, self.horizontal.z)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw)
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    pub fn is_falling(&self) -> bool {
        !self.grounded && self.vertical < 0.0
    }
}
