use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::SpaceConfig;
use crate::player::{PlayerEvent, PlayerRegistry, normalized};
use crate::render::MirrorInput;
use crate::sync::KinematicReader;

use super::{
    Action, ConnectionState, ControlChannel, ControlError, ControlMessage, DataChannel, Handshake,
    NetworkTransport, TransformFrame, TransportKind,
};

/// Counters shared between the replicator task and whoever watches it.
#[derive(Debug, Default)]
pub struct ReplicationStats {
    reconnects: AtomicU32,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    state: AtomicU8,
}

impl ReplicationStats {
    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Relaxed) {
            1 => ConnectionState::Handshake,
            2 => ConnectionState::TransportSetup,
            3 => ConnectionState::Joined,
            4 => ConnectionState::Streaming,
            5 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Handshake => 1,
            ConnectionState::TransportSetup => 2,
            ConnectionState::Joined => 3,
            ConnectionState::Streaming => 4,
            ConnectionState::Reconnecting => 5,
        };
        self.state.store(raw, Ordering::Relaxed);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum SessionEnd {
    Shutdown,
    Closed,
}

enum Event {
    Shutdown { closed: bool },
    Control(Option<Result<ControlMessage, ControlError>>),
    Request(ControlMessage),
    Publish,
    Frame(Result<Vec<u8>, ControlError>),
}

struct Link<D> {
    send: Option<D>,
    receive: Option<D>,
}

impl<D> Link<D> {
    fn set(&mut self, kind: TransportKind, channel: D) {
        match kind {
            TransportKind::Send => self.send = Some(channel),
            TransportKind::Receive => self.receive = Some(channel),
        }
    }
}

/// Drives one client connection: handshake, publishing, inbound frames and reconnects.
pub struct Replicator<T: NetworkTransport> {
    transport: T,
    space_id: String,
    nickname: Option<String>,
    publish_interval: Duration,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    kinematics: KinematicReader,
    registry: PlayerRegistry,
    mirror: Option<Sender<MirrorInput>>,
    requests: mpsc::UnboundedReceiver<ControlMessage>,
    request_tx: mpsc::UnboundedSender<ControlMessage>,
    stats: Arc<ReplicationStats>,
    reached_streaming: bool,
}

impl<T: NetworkTransport> Replicator<T> {
    pub fn new(
        transport: T,
        config: &SpaceConfig,
        space_id: impl Into<String>,
        kinematics: KinematicReader,
    ) -> Self {
        let (request_tx, requests) = mpsc::unbounded_channel();
        Self {
            transport,
            space_id: space_id.into(),
            nickname: None,
            publish_interval: config.publish_interval(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            kinematics,
            registry: PlayerRegistry::new(),
            mirror: None,
            requests,
            request_tx,
            stats: Arc::new(ReplicationStats::default()),
            reached_streaming: false,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Player events and remote targets are forwarded here.
    pub fn with_mirror(mut self, mirror: Sender<MirrorInput>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn stats(&self) -> Arc<ReplicationStats> {
        Arc::clone(&self.stats)
    }

    /// Runs on the current tokio runtime until shut down or out of reconnects.
    pub fn spawn(self) -> ReplicatorHandle {
        let (shutdown, signal) = watch::channel(false);
        let stats = self.stats();
        let requests = self.request_tx.clone();
        let task = tokio::spawn(self.run(signal));

        ReplicatorHandle {
            shutdown,
            requests,
            stats,
            task: Some(task),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControlError> {
        let mut attempts = 0u32;

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            self.reached_streaming = false;
            let outcome = self.session(&mut shutdown).await;
            self.forget_players();

            match outcome {
                Ok(SessionEnd::Shutdown) => break Ok(()),
                Ok(SessionEnd::Closed) => log::warn!("Control channel closed"),
                Err(e) => log::warn!("Session failed: {e}"),
            }

            if self.reached_streaming {
                attempts = 0;
            }
            attempts += 1;
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            self.stats.set_state(ConnectionState::Reconnecting);

            if attempts > self.max_reconnect_attempts {
                log::error!("Giving up after {} reconnect attempts", attempts - 1);
                break Err(ControlError::ReconnectLimit(attempts - 1));
            }

            log::warn!(
                "Reconnecting ({attempts}/{}) in {:?}",
                self.max_reconnect_attempts,
                self.reconnect_delay
            );

            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                _ = time::sleep(self.reconnect_delay) => {}
            }
        };

        self.stats.set_state(ConnectionState::Disconnected);
        result
    }

    async fn session(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ControlError> {
        self.stats.set_state(ConnectionState::Handshake);
        let mut control = self.transport.connect_control().await?;
        let mut handshake = Handshake::new(self.space_id.clone(), self.nickname.clone());
        let mut link = Link {
            send: None,
            receive: None,
        };

        let mut publish = time::interval(self.publish_interval);
        publish.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reported_falling = false;

        let actions = handshake.start();
        self.execute(actions, &mut handshake, &mut control, &mut link)
            .await?;

        loop {
            let streaming = handshake.is_streaming();
            let joined = handshake.player_id().is_some();

            let event = tokio::select! {
                changed = shutdown.changed() => Event::Shutdown { closed: changed.is_err() },
                message = control.recv() => Event::Control(message),
                Some(request) = self.requests.recv(), if joined => Event::Request(request),
                _ = publish.tick(), if streaming => Event::Publish,
                frame = recv_frame(&mut link.receive) => Event::Frame(frame),
            };

            match event {
                Event::Shutdown { closed } => {
                    if closed || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                Event::Control(None) => {
                    handshake.disconnected();
                    return Ok(SessionEnd::Closed);
                }
                Event::Control(Some(Err(e))) => log::warn!("Dropping control message: {e}"),
                Event::Control(Some(Ok(message))) => {
                    let subject = message.subject();
                    match handshake.handle(message) {
                        Ok(actions) => {
                            self.execute(actions, &mut handshake, &mut control, &mut link)
                                .await?
                        }
                        Err(ControlError::Rejected(reason)) => {
                            return Err(ControlError::Rejected(reason));
                        }
                        Err(e @ ControlError::MissingTransport(_)) => {
                            log::error!("Cannot handle {subject}: {e}")
                        }
                        Err(e) => log::warn!("Ignoring {subject}: {e}"),
                    }
                }
                Event::Request(message) => control.send(&message).await?,
                Event::Publish => {
                    let falling = self.publish(&handshake, &link).await;
                    if falling != reported_falling {
                        reported_falling = falling;
                        control
                            .send(&ControlMessage::SetGrounded {
                                is_grounded: !falling,
                            })
                            .await?;
                    }
                }
                Event::Frame(Ok(bytes)) => self.dispatch(&bytes),
                Event::Frame(Err(e)) => {
                    log::warn!("Receive transport failed: {e}");
                    link.receive = None;
                }
            }
        }
    }

    async fn execute(
        &mut self,
        actions: Vec<Action>,
        handshake: &mut Handshake,
        control: &mut T::Control,
        link: &mut Link<T::Data>,
    ) -> Result<(), ControlError> {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(message) => control.send(&message).await?,
                Action::OpenTransport { kind, remote } => {
                    let channel = self.transport.open_data(kind, remote).await?;
                    let local = channel.local_addr();
                    link.set(kind, channel);
                    queue.extend(handshake.transport_opened(kind, local)?);
                }
                Action::Joined(player_id) => {
                    self.registry.set_local(Some(player_id));
                    log::info!("Joined space {} as player {player_id}", self.space_id);
                }
                Action::StartStreaming => {
                    self.reached_streaming = true;
                    log::info!("Streaming transforms every {:?}", self.publish_interval);
                }
                Action::Player(event) => self.apply_player(event),
                Action::Consume {
                    player_id,
                    data_producer_id,
                } => log::debug!("Receiving player {player_id} via {data_producer_id}"),
            }
        }

        self.stats.set_state(handshake.state());
        Ok(())
    }

    /// Samples the kinematic channel and sends one frame. Returns the falling flag.
    async fn publish(&self, handshake: &Handshake, link: &Link<T::Data>) -> bool {
        let state = self.kinematics.load();

        let (Some(player_id), Some(send)) = (handshake.player_id(), link.send.as_ref()) else {
            return state.is_falling;
        };

        let frame = TransformFrame::new(player_id, state.position, state.rotation).encode();
        match send.send(&frame).await {
            Ok(()) => ReplicationStats::bump(&self.stats.frames_sent),
            Err(e) => log::debug!("Frame not sent: {e}"),
        }

        state.is_falling
    }

    fn dispatch(&mut self, bytes: &[u8]) {
        let mut frame = match TransformFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                ReplicationStats::bump(&self.stats.frames_dropped);
                log::debug!("Dropping datagram: {e}");
                return;
            }
        };

        let Some(rotation) = normalized(frame.rotation) else {
            ReplicationStats::bump(&self.stats.frames_dropped);
            log::debug!("Dropping degenerate rotation for player {}", frame.player_id);
            return;
        };
        frame.rotation = rotation;

        if !self
            .registry
            .update_target(frame.player_id, frame.position, frame.rotation)
        {
            ReplicationStats::bump(&self.stats.frames_dropped);
            log::trace!("Frame for unknown player {}", frame.player_id);
            return;
        }

        ReplicationStats::bump(&self.stats.frames_received);
        self.notify(MirrorInput::RemoteTarget {
            player_id: frame.player_id,
            position: frame.position,
            rotation: frame.rotation,
        });
    }

    fn apply_player(&mut self, event: PlayerEvent) {
        match self.registry.apply(event) {
            Some(event) => {
                log::debug!("Player event {event:?}");
                self.notify(MirrorInput::Player(event));
            }
            None => log::trace!("Player event for unknown id ignored"),
        }
    }

    fn forget_players(&mut self) {
        for player_id in self.registry.clear() {
            self.notify(MirrorInput::Player(PlayerEvent::Left { player_id }));
        }
    }

    fn notify(&mut self, input: MirrorInput) {
        if let Some(mirror) = &self.mirror
            && mirror.send(input).is_err()
        {
            log::debug!("Render mirror is gone, no longer forwarding");
            self.mirror = None;
        }
    }
}

async fn recv_frame<D: DataChannel>(channel: &mut Option<D>) -> Result<Vec<u8>, ControlError> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

/// Owner of a spawned replicator task.
pub struct ReplicatorHandle {
    shutdown: watch::Sender<bool>,
    requests: mpsc::UnboundedSender<ControlMessage>,
    stats: Arc<ReplicationStats>,
    task: Option<JoinHandle<Result<(), ControlError>>>,
}

impl ReplicatorHandle {
    pub fn stats(&self) -> &Arc<ReplicationStats> {
        &self.stats
    }

    /// Queues a client request such as `set_name`, `chat` or `set_avatar`.
    /// Nothing is sent before the server has confirmed the join.
    pub fn request(&self, message: ControlMessage) -> Result<(), ControlError> {
        self.requests.send(message).map_err(|_| ControlError::Closed)
    }

    /// Signals the task to stop. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Waits for the task to finish. Returns immediately on later calls.
    pub async fn join(&mut self) -> Result<(), ControlError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| ControlError::Io(std::io::Error::other(e)))?,
            None => Ok(()),
        }
    }
}
