use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PHYSICS_RATE: u32 = 60;
pub const DEFAULT_PUBLISH_RATE: u32 = 15;
pub const DEFAULT_CONTROL_PORT: u16 = 4000;
pub const DEFAULT_DATA_PORT: u16 = 4001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub physics_rate: u32,
    pub publish_rate: u32,

    pub gravity: f32,
    pub terminal_velocity: f32,
    pub jump_velocity: f32,

    pub player_radius: f32,
    pub player_height: f32,
    pub spawn_height: f32,
    pub ground_plane: bool,

    /// Fraction of the remaining distance covered per rendered frame.
    pub interpolation_factor: f32,
    pub render_rate: u32,

    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            physics_rate: DEFAULT_PHYSICS_RATE,
            publish_rate: DEFAULT_PUBLISH_RATE,

            gravity: 9.81,
            terminal_velocity: 50.0,
            jump_velocity: 5.0,

            player_radius: 0.3,
            player_height: 1.8,
            spawn_height: 2.0,
            ground_plane: true,

            interpolation_factor: 0.2,
            render_rate: 60,

            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

impl SpaceConfig {
    pub fn physics_dt(&self) -> f32 {
        1.0 / self.physics_rate.max(1) as f32
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.publish_rate.max(1) as f64)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_rate.max(1) as f64)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rates_clamp_to_one_hertz() {
        let config = SpaceConfig {
            physics_rate: 0,
            publish_rate: 0,
            render_rate: 0,
            ..SpaceConfig::default()
        };

        assert_eq!(config.physics_dt(), 1.0);
        assert_eq!(config.publish_interval(), Duration::from_secs(1));
        assert_eq!(config.frame_interval(), Duration::from_secs(1));
    }
}
