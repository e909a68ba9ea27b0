use std::io;
use std::sync::mpsc::{self, Sender};

use glam::Vec3;

use crate::config::SpaceConfig;
use crate::net::{ControlError, NetworkTransport, Replicator, ReplicatorHandle};
use crate::physics::{PhysicsCommand, PhysicsHandle, PhysicsLoop};
use crate::render::{MirrorInput, RenderBackend, RenderHandle, RenderMirror, RenderWorker};
use crate::scene::SceneStore;
use crate::sync::{KinematicReader, SceneBus, kinematic_channel};

/// Everything one joined space owns, passed around explicitly.
pub struct Session<B: RenderBackend> {
    config: SpaceConfig,
    scene: SceneStore,
    physics_tx: Sender<PhysicsCommand>,
    mirror_tx: Sender<MirrorInput>,
    kinematics: KinematicReader,
    physics: Option<PhysicsHandle>,
    render: Option<RenderHandle<B>>,
    network: Option<ReplicatorHandle>,
}

impl<B: RenderBackend + 'static> Session<B> {
    /// Starts the physics and render threads around a fresh scene store.
    pub fn start(config: SpaceConfig, backend: B) -> io::Result<Self> {
        let (physics_tx, physics_rx) = mpsc::channel();
        let (mirror_tx, mirror_rx) = mpsc::channel();
        let (writer, kinematics) = kinematic_channel();

        let mut bus = SceneBus::new();
        bus.subscribe("physics", physics_tx.clone());
        bus.subscribe("render", mirror_tx.clone());
        let scene = SceneStore::new(bus);

        let physics = PhysicsLoop::new(config.clone(), physics_rx, writer).spawn()?;

        let mut mirror = RenderMirror::new(backend, &config).with_physics(physics_tx.clone());
        mirror
            .attach_local_player(kinematics.clone())
            .map_err(io::Error::other)?;
        let render = RenderWorker::new(mirror, mirror_rx, &config).spawn(mirror_tx.clone())?;

        log::info!(
            "Session started: physics {} Hz, render {} Hz",
            config.physics_rate,
            config.render_rate
        );

        Ok(Self {
            config,
            scene,
            physics_tx,
            mirror_tx,
            kinematics,
            physics: Some(physics),
            render: Some(render),
            network: None,
        })
    }

    /// Starts replicating on the current tokio runtime.
    pub fn connect<T: NetworkTransport>(
        &mut self,
        transport: T,
        space_id: &str,
        nickname: Option<String>,
    ) -> &ReplicatorHandle {
        if let Some(old) = self.network.take() {
            old.shutdown();
        }

        let mut replicator = Replicator::new(transport, &self.config, space_id, self.kinematics.clone())
            .with_mirror(self.mirror_tx.clone());
        if let Some(name) = nickname {
            replicator = replicator.with_nickname(name);
        }

        self.network.insert(replicator.spawn())
    }

    pub fn scene(&self) -> &SceneStore {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneStore {
        &mut self.scene
    }

    pub fn kinematics(&self) -> &KinematicReader {
        &self.kinematics
    }

    pub fn network(&self) -> Option<&ReplicatorHandle> {
        self.network.as_ref()
    }

    pub fn set_input(&self, horizontal: Vec3, yaw: f32) {
        self.command(PhysicsCommand::Input { horizontal, yaw });
    }

    pub fn jump(&self) {
        self.command(PhysicsCommand::Jump);
    }

    pub fn teleport(&self, feet: Vec3) {
        self.command(PhysicsCommand::Teleport(feet));
    }

    fn command(&self, command: PhysicsCommand) {
        if self.physics_tx.send(command).is_err() {
            log::debug!("Physics loop already stopped");
        }
    }

    /// False from the moment `leave` runs, even while the network task is
    /// still winding down.
    pub fn is_active(&self) -> bool {
        self.physics.is_some()
            || self.render.is_some()
            || self.network.as_ref().is_some_and(|n| !n.is_shutting_down())
    }

    /// Tears down physics, then render, then the network. Every step is
    /// skipped when already done, so this can be called any number of times.
    /// Returns the render mirror on the call that stopped it.
    pub fn leave(&mut self) -> Option<RenderMirror<B>> {
        if let Some(mut physics) = self.physics.take() {
            physics.stop();
            log::info!("Physics stopped");
        }

        let mirror = self.render.take().and_then(|mut render| render.stop());
        if mirror.is_some() {
            log::info!("Render stopped");
        }

        if let Some(network) = &self.network {
            network.shutdown();
        }

        mirror
    }

    /// Waits for the network task to wind down after `leave`.
    pub async fn closed(&mut self) -> Result<(), ControlError> {
        match self.network.take() {
            Some(mut network) => {
                network.shutdown();
                let result = network.join().await;
                log::info!("Network stopped");
                result
            }
            None => Ok(()),
        }
    }
}

impl<B: RenderBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if let Some(mut physics) = self.physics.take() {
            physics.stop();
        }
        if let Some(mut render) = self.render.take() {
            render.stop();
        }
        if let Some(network) = self.network.take() {
            network.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::render::HeadlessBackend;
    use crate::scene::{ColliderShape, Entity};

    #[test]
    fn leave_is_idempotent() {
        let mut session = Session::start(SpaceConfig::default(), HeadlessBackend::new()).unwrap();
        assert!(session.is_active());

        let id = session.scene_mut().allocate_id();
        session
            .scene_mut()
            .add_entity(Entity::new(id, "floor").with_collider(ColliderShape::Box {
                half_extents: glam::Vec3::new(5.0, 0.5, 5.0),
            }))
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let mirror = session.leave().unwrap();
        assert_eq!(mirror.entity_count(), 1);
        assert!(mirror.collider_visual(id).is_some());
        assert!(mirror.backend().frames() > 0);

        assert!(session.leave().is_none());
        assert!(!session.is_active());

        session.jump();
    }

    #[tokio::test]
    async fn leaving_a_connected_session_deactivates_it_at_once() {
        let mut session = Session::start(SpaceConfig::default(), HeadlessBackend::new()).unwrap();
        let (network, _server) = crate::net::MemoryNetwork::new();
        session.connect(network, "lobby", None);

        session.leave();
        assert!(!session.is_active());
        assert!(session.network().is_some());

        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap()
            .unwrap();
        assert!(session.network().is_none());
    }
}
