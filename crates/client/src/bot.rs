use std::time::Duration;

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Steering {
    pub horizontal: Vec3,
    pub yaw: f32,
    pub jump: bool,
}

/// Walks between waypoints forever, hopping now and then.
#[derive(Debug)]
pub struct Wanderer {
    waypoints: Vec<Vec3>,
    next: usize,
    speed: f32,
    arrive_radius: f32,
    jump_interval: Option<Duration>,
    since_jump: Duration,
}

impl Wanderer {
    pub fn new(waypoints: Vec<Vec3>, speed: f32) -> Self {
        Self {
            waypoints,
            next: 0,
            speed,
            arrive_radius: 1.5,
            jump_interval: None,
            since_jump: Duration::ZERO,
        }
    }

    pub fn with_jumps(mut self, every: Duration) -> Self {
        self.jump_interval = Some(every).filter(|d| !d.is_zero());
        self
    }

    pub fn target(&self) -> Option<Vec3> {
        self.waypoints.get(self.next).copied()
    }

    pub fn steer(&mut self, position: Vec3, elapsed: Duration) -> Steering {
        let mut jump = false;
        if let Some(interval) = self.jump_interval {
            self.since_jump += elapsed;
            if self.since_jump >= interval {
                self.since_jump = Duration::ZERO;
                jump = true;
            }
        }

        let Some(mut target) = self.target() else {
            return Steering {
                horizontal: Vec3::ZERO,
                yaw: 0.0,
                jump,
            };
        };

        let flat = |p: Vec3| Vec3::new(p.x, 0.0, p.z);
        if flat(target - position).length() < self.arrive_radius {
            self.next = (self.next + 1) % self.waypoints.len();
            log::debug!("Heading to waypoint {}", self.next);
            target = self.waypoints[self.next];
        }

        let direction = flat(target - position).normalize_or_zero();
        // Yaw 0 faces -Z.
        let yaw = if direction == Vec3::ZERO {
            0.0
        } else {
            (-direction.x).atan2(-direction.z)
        };

        Steering {
            horizontal: direction * self.speed,
            yaw,
            jump,
        }
    }
}
