//! Single-writer, multi-reader kinematic state shared between threads.
//!
//! The physics loop owns the only [`KinematicWriter`]; render and network
//! hold [`KinematicReader`] clones. Every component is stored as an atomic
//! `f32` bit pattern, and a sequence counter turns the group into a seqlock:
//!
//! - the writer bumps the sequence to an odd value, stores the components
//!   with relaxed ordering and publishes the next even value with `Release`;
//! - a reader loads the sequence with `Acquire`, loads the components, then
//!   re-checks the sequence after an `Acquire` fence and retries if a write
//!   overlapped.
//!
//! The writer never waits. Readers only spin while a write is in flight.

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering, fence};

use glam::{Quat, Vec3};

const SPINS_BEFORE_YIELD: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub is_falling: bool,
}

impl Default for KinematicState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            is_falling: false,
        }
    }
}

#[derive(Debug)]
struct Slots {
    sequence: AtomicU64,
    position: [AtomicU32; 3],
    rotation: [AtomicU32; 4],
    velocity: [AtomicU32; 3],
    falling: AtomicBool,
}

impl Slots {
    fn new(initial: &KinematicState) -> Self {
        let bits = |v: f32| AtomicU32::new(v.to_bits());
        Self {
            sequence: AtomicU64::new(0),
            position: [
                bits(initial.position.x),
                bits(initial.position.y),
                bits(initial.position.z),
            ],
            rotation: [
                bits(initial.rotation.x),
                bits(initial.rotation.y),
                bits(initial.rotation.z),
                bits(initial.rotation.w),
            ],
            velocity: [
                bits(initial.velocity.x),
                bits(initial.velocity.y),
                bits(initial.velocity.z),
            ],
            falling: AtomicBool::new(initial.is_falling),
        }
    }

    fn store_components(&self, state: &KinematicState) {
        let store = |slot: &AtomicU32, v: f32| slot.store(v.to_bits(), Ordering::Relaxed);

        store(&self.position[0], state.position.x);
        store(&self.position[1], state.position.y);
        store(&self.position[2], state.position.z);
        store(&self.rotation[0], state.rotation.x);
        store(&self.rotation[1], state.rotation.y);
        store(&self.rotation[2], state.rotation.z);
        store(&self.rotation[3], state.rotation.w);
        store(&self.velocity[0], state.velocity.x);
        store(&self.velocity[1], state.velocity.y);
        store(&self.velocity[2], state.velocity.z);
        self.falling.store(state.is_falling, Ordering::Relaxed);
    }

    fn load_components(&self) -> KinematicState {
        let load = |slot: &AtomicU32| f32::from_bits(slot.load(Ordering::Relaxed));

        KinematicState {
            position: Vec3::new(
                load(&self.position[0]),
                load(&self.position[1]),
                load(&self.position[2]),
            ),
            rotation: Quat::from_xyzw(
                load(&self.rotation[0]),
                load(&self.rotation[1]),
                load(&self.rotation[2]),
                load(&self.rotation[3]),
            ),
            velocity: Vec3::new(
                load(&self.velocity[0]),
                load(&self.velocity[1]),
                load(&self.velocity[2]),
            ),
            is_falling: self.falling.load(Ordering::Relaxed),
        }
    }
}

/// The unique write side. Not `Clone`: there is exactly one writer.
#[derive(Debug)]
pub struct KinematicWriter {
    slots: Arc<Slots>,
}

#[derive(Debug, Clone)]
pub struct KinematicReader {
    slots: Arc<Slots>,
}

pub fn kinematic_channel() -> (KinematicWriter, KinematicReader) {
    kinematic_channel_with(KinematicState::default())
}

pub fn kinematic_channel_with(initial: KinematicState) -> (KinematicWriter, KinematicReader) {
    let slots = Arc::new(Slots::new(&initial));
    (
        KinematicWriter {
            slots: Arc::clone(&slots),
        },
        KinematicReader { slots },
    )
}

impl KinematicWriter {
    pub fn publish(&mut self, state: &KinematicState) {
        let slots = &*self.slots;
        let sequence = slots.sequence.load(Ordering::Relaxed);

        slots
            .sequence
            .store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        slots.store_components(state);

        slots
            .sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    pub fn reader(&self) -> KinematicReader {
        KinematicReader {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl KinematicReader {
    pub fn load(&self) -> KinematicState {
        let slots = &*self.slots;
        let mut spins = 0u32;

        loop {
            let before = slots.sequence.load(Ordering::Acquire);
            if before & 1 == 0 {
                let state = slots.load_components();
                fence(Ordering::Acquire);
                let after = slots.sequence.load(Ordering::Relaxed);
                if before == after {
                    return state;
                }
            }

            spins += 1;
            if spins < SPINS_BEFORE_YIELD {
                hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Number of completed publishes.
    pub fn version(&self) -> u64 {
        self.slots.sequence.load(Ordering::Acquire) / 2
    }

    pub fn position(&self) -> Vec3 {
        self.load().position
    }

    pub fn rotation(&self) -> Quat {
        self.load().rotation
    }

    pub fn is_falling(&self) -> bool {
        self.load().is_falling
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn publish_and_load() {
        let (mut writer, reader) = kinematic_channel();
        assert_eq!(reader.load(), KinematicState::default());
        assert_eq!(reader.version(), 0);

        let state = KinematicState {
            position: Vec3::new(1.0, 2.0, -3.5),
            rotation: Quat::from_rotation_y(0.5),
            velocity: Vec3::new(0.0, -9.0, 0.0),
            is_falling: true,
        };
        writer.publish(&state);

        assert_eq!(reader.load(), state);
        assert_eq!(writer.reader().load(), state);
        assert_eq!(reader.version(), 1);
    }

    #[test]
    fn concurrent_reads_are_never_torn() {
        let (mut writer, reader) = kinematic_channel();

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let reader = reader.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        let s = reader.load();
                        assert_eq!(s.position.x, s.position.y);
                        assert_eq!(s.position.y, s.position.z);
                        assert_eq!(s.position.x, s.velocity.x);
                        assert_eq!(s.is_falling, s.position.x as u32 % 2 == 1);
                    }
                })
            })
            .collect();

        for i in 0..50_000u32 {
            let v = i as f32;
            writer.publish(&KinematicState {
                position: Vec3::splat(v),
                rotation: Quat::IDENTITY,
                velocity: Vec3::splat(v),
                is_falling: i % 2 == 1,
            });
        }

        for handle in readers {
            handle.join().unwrap();
        }
    }
}
