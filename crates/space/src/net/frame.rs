use glam::{Quat, Vec3};

use crate::player::PlayerId;

pub const FRAME_LEN: usize = 21;

/// Millimetre precision, roughly ±2147 km of range in an `i32`.
pub const POSITION_SCALE: f32 = 1000.0;
pub const ROTATION_SCALE: f32 = 32767.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("transform frame must be {FRAME_LEN} bytes, got {0}")]
    Length(usize),
}

/// One player's quantized transform as carried on the data channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformFrame {
    pub player_id: PlayerId,
    pub position: Vec3,
    pub rotation: Quat,
}

impl TransformFrame {
    pub fn new(player_id: PlayerId, position: Vec3, rotation: Quat) -> Self {
        Self {
            player_id,
            position,
            rotation,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = self.player_id;

        let p = self.position.to_array();
        for (i, v) in p.into_iter().enumerate() {
            let at = 1 + i * 4;
            buf[at..at + 4].copy_from_slice(&quantize_position(v).to_le_bytes());
        }

        let r = self.rotation.to_array();
        for (i, v) in r.into_iter().enumerate() {
            let at = 13 + i * 2;
            buf[at..at + 2].copy_from_slice(&quantize_rotation(v).to_le_bytes());
        }

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let bytes: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::Length(bytes.len()))?;

        let position = |at: usize| {
            let raw = i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
            raw as f32 / POSITION_SCALE
        };
        let rotation = |at: usize| {
            let raw = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
            raw as f32 / ROTATION_SCALE
        };

        Ok(Self {
            player_id: bytes[0],
            position: Vec3::new(position(1), position(5), position(9)),
            rotation: Quat::from_xyzw(rotation(13), rotation(15), rotation(17), rotation(19)),
        })
    }
}

/// Overwrites the sender id of an encoded frame in place.
pub fn stamp_player_id(frame: &mut [u8], player_id: PlayerId) -> Result<(), FrameError> {
    if frame.len() != FRAME_LEN {
        return Err(FrameError::Length(frame.len()));
    }
    frame[0] = player_id;
    Ok(())
}

#[inline]
fn quantize_position(v: f32) -> i32 {
    (v * POSITION_SCALE) as i32
}

#[inline]
fn quantize_rotation(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * ROTATION_SCALE) as i16
}
