use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use spacesync::PlayerId;
use spacesync::net::{
    ControlMessage, FRAME_LEN, TransportKind, TransportOptions, default_capabilities,
    stamp_player_id,
};

use crate::config::MAX_PLAYER_ID;
use crate::events::{DisconnectReason, ServerEvent};

pub type ConnId = u64;

/// Control messages to deliver, in order.
pub type Replies = Vec<(ConnId, ControlMessage)>;

#[derive(Debug)]
struct Member {
    peer: SocketAddr,
    connected_at: Instant,
    advertised: SocketAddr,
    player_id: Option<PlayerId>,
    space_id: Option<String>,
    nickname: Option<String>,
    falling: bool,
    send_addr: Option<SocketAddr>,
    receive_addr: Option<SocketAddr>,
    data_producer: Option<String>,
}

impl Member {
    fn joined(&self) -> Option<(PlayerId, &str)> {
        Some((self.player_id?, self.space_id.as_deref()?))
    }
}

/// Every connection, which space it joined and where its datagrams go.
#[derive(Debug)]
pub struct Directory {
    members: BTreeMap<ConnId, Member>,
    players: BTreeMap<PlayerId, ConnId>,
    senders: HashMap<SocketAddr, ConnId>,
    max_players: usize,
    events: Vec<ServerEvent>,
    frames_relayed: u64,
    frames_dropped: u64,
}

impl Directory {
    pub fn new(max_players: usize) -> Self {
        Self {
            members: BTreeMap::new(),
            players: BTreeMap::new(),
            senders: HashMap::new(),
            max_players: max_players.min(MAX_PLAYER_ID as usize),
            events: Vec::new(),
            frames_relayed: 0,
            frames_dropped: 0,
        }
    }

    /// `advertised` is the data address handed out in `transport_created`.
    pub fn connect(&mut self, conn: ConnId, peer: SocketAddr, advertised: SocketAddr) {
        self.members.insert(
            conn,
            Member {
                peer,
                connected_at: Instant::now(),
                advertised,
                player_id: None,
                space_id: None,
                nickname: None,
                falling: false,
                send_addr: None,
                receive_addr: None,
                data_producer: None,
            },
        );
        self.events.push(ServerEvent::Connected { conn, addr: peer });
    }

    pub fn handle(&mut self, conn: ConnId, message: ControlMessage) -> Replies {
        let Some(member) = self.members.get_mut(&conn) else {
            return Vec::new();
        };

        match message {
            ControlMessage::GetRouterRtpCapabilities => vec![(
                conn,
                ControlMessage::RouterRtpCapabilities {
                    capabilities: default_capabilities(),
                },
            )],
            ControlMessage::SetRtpCapabilities { .. } => Vec::new(),
            ControlMessage::CreateTransport { kind } => vec![(
                conn,
                ControlMessage::TransportCreated {
                    kind,
                    options: TransportOptions::new(member.advertised),
                },
            )],
            ControlMessage::ConnectTransport { kind, options } => {
                self.connect_transport(conn, kind, &options)
            }
            ControlMessage::Join { space_id } => self.join(conn, space_id),
            ControlMessage::Produce { kind } => {
                log::debug!("Connection {conn} asked to produce {kind} media");
                vec![(
                    conn,
                    ControlMessage::ProducerId {
                        id: format!("{conn}-{kind}"),
                    },
                )]
            }
            ControlMessage::ProduceData { label } => self.produce_data(conn, &label),
            ControlMessage::SetName { name } => {
                member.nickname = Some(name.clone());
                self.to_space(conn, |player_id| ControlMessage::PlayerNickname {
                    player_id,
                    name: name.clone(),
                })
            }
            ControlMessage::SetGrounded { is_grounded } => {
                member.falling = !is_grounded;
                self.to_space(conn, |player_id| ControlMessage::PlayerFallingState {
                    player_id,
                    is_falling: !is_grounded,
                })
            }
            ControlMessage::Chat { text } => {
                if let Some((player_id, _)) = member.joined() {
                    self.events.push(ServerEvent::Chat {
                        player_id,
                        text: text.clone(),
                    });
                }
                let timestamp = now_millis();
                self.to_space(conn, |player_id| ControlMessage::PlayerChat {
                    player_id,
                    text: text.clone(),
                    timestamp,
                })
            }
            ControlMessage::SetAvatar { url } => {
                log::info!("Connection {conn} set avatar {url}");
                Vec::new()
            }
            other => {
                log::warn!("Connection {conn} sent unexpected {}", other.subject());
                vec![(
                    conn,
                    ControlMessage::Error {
                        message: format!("unexpected {}", other.subject()),
                    },
                )]
            }
        }
    }

    fn connect_transport(
        &mut self,
        conn: ConnId,
        kind: TransportKind,
        options: &TransportOptions,
    ) -> Replies {
        let Some(member) = self.members.get_mut(&conn) else {
            return Vec::new();
        };

        let mut addr = match options.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                return vec![(
                    conn,
                    ControlMessage::Error {
                        message: e.to_string(),
                    },
                )];
            }
        };
        // Clients bound to the wildcard address report it verbatim.
        if addr.ip().is_unspecified() {
            addr.set_ip(member.peer.ip());
        }

        match kind {
            TransportKind::Send => {
                if let Some(old) = member.send_addr.replace(addr) {
                    self.senders.remove(&old);
                }
                self.senders.insert(addr, conn);
            }
            TransportKind::Receive => member.receive_addr = Some(addr),
        }
        log::debug!("Connection {conn} {kind} transport at {addr}");

        vec![(conn, ControlMessage::TransportConnected { kind })]
    }

    fn lowest_free_id(&self) -> Option<PlayerId> {
        if self.players.len() >= self.max_players {
            return None;
        }
        (1..=MAX_PLAYER_ID).find(|id| !self.players.contains_key(id))
    }

    fn join(&mut self, conn: ConnId, space_id: String) -> Replies {
        let Some(member) = self.members.get(&conn) else {
            return Vec::new();
        };
        if member.player_id.is_some() {
            return vec![(
                conn,
                ControlMessage::Error {
                    message: "already joined".into(),
                },
            )];
        }

        let Some(player_id) = self.lowest_free_id() else {
            self.events.push(ServerEvent::JoinDenied {
                addr: member.peer,
                reason: "server is full".into(),
            });
            return vec![(
                conn,
                ControlMessage::Error {
                    message: "server is full".into(),
                },
            )];
        };

        let mut replies = vec![(conn, ControlMessage::JoinSuccess { player_id })];
        for (&other, peer) in self.space(&space_id) {
            let Some(other_id) = peer.player_id else {
                continue;
            };
            replies.push((conn, ControlMessage::PlayerJoined { player_id: other_id }));
            if let Some(name) = &peer.nickname {
                replies.push((
                    conn,
                    ControlMessage::PlayerNickname {
                        player_id: other_id,
                        name: name.clone(),
                    },
                ));
            }
            if peer.falling {
                replies.push((
                    conn,
                    ControlMessage::PlayerFallingState {
                        player_id: other_id,
                        is_falling: true,
                    },
                ));
            }
            replies.push((other, ControlMessage::PlayerJoined { player_id }));
        }

        if let Some(member) = self.members.get_mut(&conn) {
            member.player_id = Some(player_id);
            member.space_id = Some(space_id.clone());
        }
        self.players.insert(player_id, conn);
        self.events.push(ServerEvent::PlayerJoined {
            player_id,
            space_id,
        });
        replies
    }

    fn produce_data(&mut self, conn: ConnId, label: &str) -> Replies {
        let Some(member) = self.members.get_mut(&conn) else {
            return Vec::new();
        };
        let Some(player_id) = member.player_id else {
            return vec![(
                conn,
                ControlMessage::Error {
                    message: "produce_data before join".into(),
                },
            )];
        };

        let id = format!("{player_id}-{label}");
        member.data_producer = Some(id.clone());
        let space_id = member.space_id.clone().unwrap_or_default();

        let mut replies = vec![(conn, ControlMessage::DataProducerId { id: id.clone() })];
        for (&other, peer) in self.space(&space_id) {
            let Some(other_id) = peer.player_id.filter(|&p| p != player_id) else {
                continue;
            };
            replies.push((
                other,
                ControlMessage::CreateDataConsumer {
                    player_id,
                    data_producer_id: id.clone(),
                },
            ));
            if let Some(theirs) = &peer.data_producer {
                replies.push((
                    conn,
                    ControlMessage::CreateDataConsumer {
                        player_id: other_id,
                        data_producer_id: theirs.clone(),
                    },
                ));
            }
        }
        replies
    }

    /// Builds one message per other member of the sender's space.
    fn to_space(&self, conn: ConnId, message: impl Fn(PlayerId) -> ControlMessage) -> Replies {
        let Some((player_id, space_id)) = self.members.get(&conn).and_then(Member::joined) else {
            return vec![(
                conn,
                ControlMessage::Error {
                    message: "not joined".into(),
                },
            )];
        };

        self.space(space_id)
            .filter(|(other, _)| **other != conn)
            .map(|(&other, _)| (other, message(player_id)))
            .collect()
    }

    fn space<'a>(&'a self, space_id: &'a str) -> impl Iterator<Item = (&'a ConnId, &'a Member)> {
        self.members
            .iter()
            .filter(move |(_, m)| m.player_id.is_some() && m.space_id.as_deref() == Some(space_id))
    }

    /// Connections older than `timeout` that still have no player id.
    pub fn expire_unjoined(&mut self, now: Instant, timeout: Duration) -> Vec<ConnId> {
        let expired: Vec<ConnId> = self
            .members
            .iter()
            .filter(|(_, m)| m.player_id.is_none())
            .filter(|(_, m)| now.saturating_duration_since(m.connected_at) >= timeout)
            .map(|(&conn, _)| conn)
            .collect();

        for &conn in &expired {
            self.disconnect(conn, DisconnectReason::Timeout);
            self.events.push(ServerEvent::TimedOut { conn });
        }
        expired
    }

    pub fn disconnect(&mut self, conn: ConnId, reason: DisconnectReason) -> Replies {
        let Some(member) = self.members.remove(&conn) else {
            return Vec::new();
        };
        if let Some(addr) = member.send_addr {
            self.senders.remove(&addr);
        }

        let Some((player_id, space_id)) = member.joined() else {
            return Vec::new();
        };
        self.players.remove(&player_id);
        self.events.push(ServerEvent::PlayerLeft { player_id, reason });

        self.space(space_id)
            .map(|(&other, _)| (other, ControlMessage::PlayerLeft { player_id }))
            .collect()
    }

    /// Stamps the sender's id into `frame` and returns where to forward it.
    pub fn relay(&mut self, from: SocketAddr, frame: &mut [u8]) -> Vec<SocketAddr> {
        if frame.len() != FRAME_LEN {
            self.frames_dropped += 1;
            log::trace!("Dropping {} byte datagram from {from}", frame.len());
            return Vec::new();
        }

        let sender = self
            .senders
            .get(&from)
            .and_then(|conn| self.members.get(conn))
            .and_then(Member::joined);
        let Some((player_id, space_id)) = sender else {
            self.frames_dropped += 1;
            log::trace!("Dropping frame from unknown address {from}");
            return Vec::new();
        };

        if stamp_player_id(frame, player_id).is_err() {
            self.frames_dropped += 1;
            return Vec::new();
        }

        let targets: Vec<SocketAddr> = self
            .space(space_id)
            .filter(|(_, m)| m.player_id != Some(player_id))
            .filter_map(|(_, m)| m.receive_addr)
            .collect();
        self.frames_relayed += targets.len() as u64;
        targets
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.members.keys().copied().collect()
    }

    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            connections: self.members.len(),
            players: self.players.len(),
            max_players: self.max_players,
            frames_relayed: self.frames_relayed,
            frames_dropped: self.frames_dropped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStats {
    pub connections: usize,
    pub players: usize,
    pub max_players: usize,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use spacesync::TransformFrame;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn subjects(replies: &Replies, to: ConnId) -> Vec<&'static str> {
        replies
            .iter()
            .filter(|(c, _)| *c == to)
            .map(|(_, m)| m.subject())
            .collect()
    }

    /// Connects, opens both transports at 127.0.0.1:{base,base+1} and joins.
    fn join(dir: &mut Directory, conn: ConnId, space: &str, base: u16) -> Replies {
        dir.connect(conn, addr(9000 + conn as u16), addr(4001));
        for (kind, port) in [(TransportKind::Send, base), (TransportKind::Receive, base + 1)] {
            let options = TransportOptions::new(SocketAddr::from(([0, 0, 0, 0], port)));
            dir.handle(conn, ControlMessage::ConnectTransport { kind, options });
        }
        dir.handle(
            conn,
            ControlMessage::Join {
                space_id: space.into(),
            },
        )
    }

    #[test]
    fn ids_are_lowest_free() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        join(&mut dir, 2, "a", 200);
        let replies = join(&mut dir, 3, "b", 300);
        assert_eq!(replies[0].1, ControlMessage::JoinSuccess { player_id: 3 });

        dir.disconnect(2, DisconnectReason::Graceful);
        let replies = join(&mut dir, 4, "a", 400);
        assert_eq!(replies[0].1, ControlMessage::JoinSuccess { player_id: 2 });
    }

    #[test]
    fn full_server_denies_join() {
        let mut dir = Directory::new(1);
        join(&mut dir, 1, "a", 100);
        let replies = join(&mut dir, 2, "a", 200);
        assert_eq!(subjects(&replies, 2), ["error"]);
        assert!(
            dir.drain_events()
                .any(|e| matches!(e, ServerEvent::JoinDenied { .. }))
        );
    }

    #[test]
    fn newcomer_learns_existing_players() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        dir.handle(
            1,
            ControlMessage::SetName {
                name: "alice".into(),
            },
        );
        join(&mut dir, 5, "b", 500);

        let replies = join(&mut dir, 2, "a", 200);
        assert_eq!(
            subjects(&replies, 2),
            ["join_success", "player_joined", "player_nickname"]
        );
        assert_eq!(subjects(&replies, 1), ["player_joined"]);
        assert!(subjects(&replies, 5).is_empty());
    }

    #[test]
    fn produce_data_links_consumers_both_ways() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        join(&mut dir, 2, "a", 200);
        dir.handle(
            1,
            ControlMessage::ProduceData {
                label: "transforms".into(),
            },
        );

        let replies = dir.handle(
            2,
            ControlMessage::ProduceData {
                label: "transforms".into(),
            },
        );
        assert_eq!(subjects(&replies, 2), ["data_producer_id", "create_data_consumer"]);
        assert_eq!(
            replies
                .iter()
                .find(|(c, _)| *c == 1)
                .map(|(_, m)| m.clone()),
            Some(ControlMessage::CreateDataConsumer {
                player_id: 2,
                data_producer_id: "2-transforms".into()
            })
        );
    }

    #[test]
    fn grounded_and_chat_fan_out_to_space() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        join(&mut dir, 2, "a", 200);
        join(&mut dir, 3, "b", 300);

        let replies = dir.handle(1, ControlMessage::SetGrounded { is_grounded: false });
        assert_eq!(
            replies,
            vec![(
                2,
                ControlMessage::PlayerFallingState {
                    player_id: 1,
                    is_falling: true
                }
            )]
        );

        let replies = dir.handle(2, ControlMessage::Chat { text: "hi".into() });
        assert_eq!(replies.len(), 1);
        assert!(matches!(
            &replies[0],
            (1, ControlMessage::PlayerChat { player_id: 2, text, .. }) if text == "hi"
        ));
    }

    #[test]
    fn requests_before_join_are_errors() {
        let mut dir = Directory::new(254);
        dir.connect(1, addr(9001), addr(4001));
        let replies = dir.handle(1, ControlMessage::Chat { text: "hi".into() });
        assert_eq!(subjects(&replies, 1), ["error"]);
    }

    #[test]
    fn relay_stamps_sender_and_skips_other_spaces() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        join(&mut dir, 2, "a", 200);
        join(&mut dir, 3, "b", 300);

        let mut frame = TransformFrame::new(0, Vec3::ONE, Quat::IDENTITY).encode();
        let targets = dir.relay(addr(100), &mut frame);
        assert_eq!(targets, vec![addr(201)]);
        assert_eq!(TransformFrame::decode(&frame).unwrap().player_id, 1);

        assert!(dir.relay(addr(777), &mut frame).is_empty());
        assert!(dir.relay(addr(100), &mut frame[..20]).is_empty());
        assert_eq!(dir.stats().frames_dropped, 2);
        assert_eq!(dir.stats().frames_relayed, 1);
    }

    #[test]
    fn only_unjoined_connections_expire() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        dir.connect(2, addr(9002), addr(4001));

        let later = Instant::now() + Duration::from_secs(60);
        assert!(dir.expire_unjoined(Instant::now(), Duration::from_secs(10)).is_empty());
        assert_eq!(dir.expire_unjoined(later, Duration::from_secs(10)), vec![2]);
        assert_eq!(dir.stats().connections, 1);
        assert_eq!(dir.stats().players, 1);
    }

    #[test]
    fn disconnect_tells_the_space() {
        let mut dir = Directory::new(254);
        join(&mut dir, 1, "a", 100);
        join(&mut dir, 2, "a", 200);

        let replies = dir.disconnect(1, DisconnectReason::Graceful);
        assert_eq!(
            replies,
            vec![(2, ControlMessage::PlayerLeft { player_id: 1 })]
        );

        let mut frame = TransformFrame::new(0, Vec3::ONE, Quat::IDENTITY).encode();
        assert!(dir.relay(addr(100), &mut frame).is_empty());
        assert_eq!(dir.stats().players, 1);
    }
}
