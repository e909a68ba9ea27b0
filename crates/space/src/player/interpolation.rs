use glam::{Mat4, Quat, Vec3, Vec4};

/// Cosmetic smoothing of a remote transform toward the last network sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteTransform {
    pub position: Vec3,
    pub rotation: Quat,
    target_position: Vec3,
    target_rotation: Quat,
}

impl Default for RemoteTransform {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Quat::IDENTITY)
    }
}

impl RemoteTransform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            target_position: position,
            target_rotation: rotation,
        }
    }

    /// Inputs with a non-finite position or a zero-length rotation are ignored.
    pub fn set_target(&mut self, position: Vec3, rotation: Quat) {
        let Some(rotation) = normalized(rotation) else {
            return;
        };
        if !position.is_finite() {
            return;
        }
        self.target_position = position;
        self.target_rotation = rotation;
    }

    pub fn target(&self) -> (Vec3, Quat) {
        (self.target_position, self.target_rotation)
    }

    /// One frame of `value += (target - value) * k`.
    pub fn step(&mut self, k: f32) {
        let k = k.clamp(0.0, 1.0);
        self.position += (self.target_position - self.position) * k;
        self.rotation = self.rotation.lerp(self.target_rotation, k);
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

/// Unit-length `rotation`, or `None` when it has no usable direction.
pub fn normalized(rotation: Quat) -> Option<Quat> {
    Vec4::from(rotation).try_normalize().map(Quat::from_vec4)
}
