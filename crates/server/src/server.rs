use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use spacesync::net::{ControlChannel, ControlError, ControlMessage, TcpControl};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::directory::{ConnId, Directory, DirectoryStats, Replies};
use crate::events::{DisconnectReason, ServerEvent};

const DATAGRAM_BUFFER: usize = 512;

enum Inbound {
    Message(ConnId, ControlMessage),
    Closed(ConnId),
}

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Inbound(Inbound),
    Datagram(io::Result<(usize, SocketAddr)>),
    Sweep,
    Stats,
}

/// Control listener plus the UDP relay, driven from one task.
pub struct SpaceServer {
    listener: TcpListener,
    data: Arc<UdpSocket>,
    config: ServerConfig,
    directory: Directory,
    outboxes: HashMap<ConnId, mpsc::UnboundedSender<ControlMessage>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    next_conn: ConnId,
}

impl SpaceServer {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((config.bind, config.control_port)).await?;
        let data = UdpSocket::bind((config.bind, config.data_port)).await?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            data: Arc::new(data),
            directory: Directory::new(config.max_players),
            config,
            outboxes: HashMap::new(),
            inbound_tx,
            inbound_rx,
            next_conn: 1,
        })
    }

    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn data_addr(&self) -> io::Result<SocketAddr> {
        self.data.local_addr()
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> io::Result<DirectoryStats> {
        let mut stats = time::interval(Duration::from_secs(self.config.stats_interval_secs.max(1)));
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
        stats.tick().await;

        let join_timeout = Duration::from_secs(self.config.join_timeout_secs);
        let mut sweep = time::interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buf = [0u8; DATAGRAM_BUFFER];

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => Event::Shutdown,
                accepted = self.listener.accept() => Event::Accepted(accepted),
                Some(inbound) = self.inbound_rx.recv() => Event::Inbound(inbound),
                received = self.data.recv_from(&mut buf) => Event::Datagram(received),
                _ = sweep.tick() => Event::Sweep,
                _ = stats.tick() => Event::Stats,
            };

            match event {
                Event::Shutdown => break,
                Event::Accepted(Ok((stream, peer))) => {
                    if let Err(e) = self.accept(stream, peer) {
                        self.emit(ServerEvent::Error {
                            message: format!("Could not set up connection from {peer}: {e}"),
                        });
                    }
                }
                Event::Accepted(Err(e)) => self.emit(ServerEvent::Error {
                    message: format!("Accept failed: {e}"),
                }),
                Event::Inbound(Inbound::Message(conn, message)) => {
                    let replies = self.directory.handle(conn, message);
                    self.deliver(replies);
                }
                Event::Inbound(Inbound::Closed(conn)) => {
                    self.outboxes.remove(&conn);
                    let replies = self.directory.disconnect(conn, DisconnectReason::Graceful);
                    self.deliver(replies);
                }
                Event::Datagram(Ok((len, from))) => {
                    let targets = self.directory.relay(from, &mut buf[..len]);
                    for to in targets {
                        if let Err(e) = self.data.send_to(&buf[..len], to).await {
                            log::debug!("Relay to {to} failed: {e}");
                        }
                    }
                }
                Event::Datagram(Err(e)) => {
                    // ICMP port unreachable from a departed client surfaces here.
                    log::debug!("Data socket error: {e}");
                }
                Event::Sweep => {
                    for conn in self.directory.expire_unjoined(Instant::now(), join_timeout) {
                        // Dropping the outbox ends the connection task.
                        self.outboxes.remove(&conn);
                    }
                }
                Event::Stats => {
                    let s = self.directory.stats();
                    log::info!(
                        "{}/{} players, {} connections, {} frames relayed, {} dropped",
                        s.players,
                        s.max_players,
                        s.connections,
                        s.frames_relayed,
                        s.frames_dropped
                    );
                }
            }

            self.flush_events();
        }

        for conn in self.directory.connection_ids() {
            self.directory.disconnect(conn, DisconnectReason::Shutdown);
        }
        self.outboxes.clear();
        self.flush_events();

        Ok(self.directory.stats())
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let ip = match self.config.public_ip {
            Some(ip) => ip,
            None => stream.local_addr()?.ip(),
        };
        let advertised = SocketAddr::new(ip, self.data.local_addr()?.port());

        let conn = self.next_conn;
        self.next_conn += 1;

        let (outbox, outgoing) = mpsc::unbounded_channel();
        self.outboxes.insert(conn, outbox);
        self.directory.connect(conn, peer, advertised);

        tokio::spawn(connection(
            conn,
            TcpControl::new(stream),
            self.inbound_tx.clone(),
            outgoing,
        ));
        Ok(())
    }

    fn deliver(&mut self, replies: Replies) {
        for (conn, message) in replies {
            if let Some(outbox) = self.outboxes.get(&conn)
                && outbox.send(message).is_err()
            {
                log::debug!("Connection {conn} already closed");
            }
        }
    }

    fn flush_events(&mut self) {
        let events: Vec<ServerEvent> = self.directory.drain_events().collect();
        for event in events {
            self.emit(event);
        }
    }

    fn emit(&self, event: ServerEvent) {
        match event {
            ServerEvent::Error { .. } | ServerEvent::JoinDenied { .. } => log::warn!("{event}"),
            ServerEvent::Connected { .. } | ServerEvent::Chat { .. } => log::debug!("{event}"),
            _ => log::info!("{event}"),
        }
    }
}

/// Pumps one client's control stream until either side closes.
async fn connection(
    conn: ConnId,
    mut control: TcpControl,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut outgoing: mpsc::UnboundedReceiver<ControlMessage>,
) {
    loop {
        tokio::select! {
            received = control.recv() => match received {
                Some(Ok(message)) => {
                    if inbound.send(Inbound::Message(conn, message)).is_err() {
                        return;
                    }
                }
                Some(Err(ControlError::Io(e))) => {
                    log::debug!("Connection {conn} read failed: {e}");
                    break;
                }
                Some(Err(e)) => log::warn!("Connection {conn}: {e}"),
                None => break,
            },
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = control.send(&message).await {
                        log::debug!("Connection {conn} write failed: {e}");
                        break;
                    }
                }
                None => return,
            },
        }
    }

    let _ = inbound.send(Inbound::Closed(conn));
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::mpsc as std_mpsc;

    use glam::Vec3;
    use spacesync::net::ReplicatorHandle;
    use spacesync::sync::{KinematicState, kinematic_channel_with};
    use spacesync::{
        ConnectionState, MirrorInput, PlayerEvent, Replicator, SpaceConfig, TcpNetwork,
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn client(
        server: SocketAddr,
        position: Vec3,
    ) -> (ReplicatorHandle, std_mpsc::Receiver<MirrorInput>) {
        let (_writer, reader) = kinematic_channel_with(KinematicState {
            position,
            ..KinematicState::default()
        });
        let (mirror_tx, mirror_rx) = std_mpsc::channel();
        let config = SpaceConfig {
            reconnect_delay_ms: 50,
            ..SpaceConfig::default()
        };
        let handle = Replicator::new(TcpNetwork::new(server), &config, "plaza", reader)
            .with_nickname(format!("at {position}"))
            .with_mirror(mirror_tx)
            .spawn();
        (handle, mirror_rx)
    }

    async fn wait_for(inputs: &std_mpsc::Receiver<MirrorInput>, check: impl Fn(&MirrorInput) -> bool) {
        let deadline = time::Instant::now() + WAIT;
        loop {
            if inputs.try_iter().any(|input| check(&input)) {
                return;
            }
            assert!(time::Instant::now() < deadline, "timed out waiting for mirror input");
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn two_clients_see_each_other_move() {
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control_port: 0,
            data_port: 0,
            ..ServerConfig::default()
        };
        let server = SpaceServer::bind(config).await.unwrap();
        let addr = server.control_addr().unwrap();
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(server.run(signal));

        let (mut alice, alice_inputs) = client(addr, Vec3::new(1.0, 0.0, 0.0));
        let alice_stats = alice.stats().clone();
        let deadline = time::Instant::now() + WAIT;
        while alice_stats.state() != ConnectionState::Streaming {
            assert!(time::Instant::now() < deadline);
            time::sleep(Duration::from_millis(10)).await;
        }

        let bob_at = Vec3::new(5.0, 1.0, -2.0);
        let (mut bob, bob_inputs) = client(addr, bob_at);

        wait_for(&alice_inputs, |input| {
            matches!(input, MirrorInput::Player(PlayerEvent::Joined { player_id: 2 }))
        })
        .await;
        wait_for(&bob_inputs, |input| {
            matches!(input, MirrorInput::Player(PlayerEvent::Joined { player_id: 1 }))
        })
        .await;
        wait_for(&alice_inputs, |input| {
            matches!(input, MirrorInput::RemoteTarget { player_id: 2, position, .. }
                if (*position - bob_at).length() < 0.01)
        })
        .await;

        bob.shutdown();
        time::timeout(WAIT, bob.join()).await.unwrap().unwrap();
        wait_for(&alice_inputs, |input| {
            matches!(input, MirrorInput::Player(PlayerEvent::Left { player_id: 2 }))
        })
        .await;

        alice.shutdown();
        time::timeout(WAIT, alice.join()).await.unwrap().unwrap();

        shutdown.send_replace(true);
        let stats = time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert!(stats.frames_relayed >= 1);
        assert_eq!(stats.players, 0);
    }
}
