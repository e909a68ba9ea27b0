use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use serde_json::json;

use crate::player::{PlayerEvent, PlayerId};

use super::{ControlError, ControlMessage, TransportKind, TransportOptions};

pub const DATA_PRODUCER_LABEL: &str = "transforms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Handshake,
    TransportSetup,
    Joined,
    Streaming,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Handshake => "handshake",
            ConnectionState::TransportSetup => "transport_setup",
            ConnectionState::Joined => "joined",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Side effect requested by the handshake for the driver to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(ControlMessage),
    OpenTransport {
        kind: TransportKind,
        remote: SocketAddr,
    },
    Joined(PlayerId),
    StartStreaming,
    Player(PlayerEvent),
    Consume {
        player_id: PlayerId,
        data_producer_id: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct TransportSlot {
    remote: SocketAddr,
    opened: bool,
    connected: bool,
}

/// Client side of the control handshake, free of any I/O.
#[derive(Debug)]
pub struct Handshake {
    space_id: String,
    nickname: Option<String>,
    state: ConnectionState,
    player_id: Option<PlayerId>,
    transports: HashMap<TransportKind, TransportSlot>,
    join_sent: bool,
}

impl Handshake {
    pub fn new(space_id: impl Into<String>, nickname: Option<String>) -> Self {
        Self {
            space_id: space_id.into(),
            nickname,
            state: ConnectionState::Disconnected,
            player_id: None,
            transports: HashMap::new(),
            join_sent: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConnectionState::Streaming
    }

    pub fn remote(&self, kind: TransportKind) -> Option<SocketAddr> {
        self.transports.get(&kind).map(|slot| slot.remote)
    }

    /// Begins a fresh handshake, discarding everything from a previous one.
    pub fn start(&mut self) -> Vec<Action> {
        self.transports.clear();
        self.player_id = None;
        self.join_sent = false;
        self.transition(ConnectionState::Handshake);
        vec![Action::Send(ControlMessage::GetRouterRtpCapabilities)]
    }

    /// The control channel went away. The next `start` re-runs everything.
    pub fn disconnected(&mut self) {
        self.transports.clear();
        self.player_id = None;
        self.join_sent = false;
        self.transition(ConnectionState::Reconnecting);
    }

    pub fn reset(&mut self) {
        self.disconnected();
        self.transition(ConnectionState::Disconnected);
    }

    /// The driver bound the local end of a transport announced by the server.
    pub fn transport_opened(
        &mut self,
        kind: TransportKind,
        local: SocketAddr,
    ) -> Result<Vec<Action>, ControlError> {
        let slot = self
            .transports
            .get_mut(&kind)
            .ok_or(ControlError::MissingTransport(kind))?;
        slot.opened = true;

        Ok(vec![Action::Send(ControlMessage::ConnectTransport {
            kind,
            options: TransportOptions::new(local),
        })])
    }

    pub fn handle(&mut self, message: ControlMessage) -> Result<Vec<Action>, ControlError> {
        if let Some(event) = PlayerEvent::from_control(&message) {
            return Ok(vec![Action::Player(event)]);
        }

        match message {
            ControlMessage::RouterRtpCapabilities { capabilities } => {
                self.expect(ConnectionState::Handshake, "router_rtp_capabilities")?;
                self.transition(ConnectionState::TransportSetup);
                Ok(vec![
                    Action::Send(ControlMessage::SetRtpCapabilities { capabilities }),
                    Action::Send(ControlMessage::CreateTransport {
                        kind: TransportKind::Send,
                    }),
                    Action::Send(ControlMessage::CreateTransport {
                        kind: TransportKind::Receive,
                    }),
                ])
            }
            ControlMessage::TransportCreated { kind, options } => {
                self.expect(ConnectionState::TransportSetup, "transport_created")?;
                let remote = options.socket_addr()?;
                self.transports.insert(
                    kind,
                    TransportSlot {
                        remote,
                        opened: false,
                        connected: false,
                    },
                );
                Ok(vec![Action::OpenTransport { kind, remote }])
            }
            ControlMessage::TransportConnected { kind } => {
                self.expect(ConnectionState::TransportSetup, "transport_connected")?;
                let slot = self
                    .transports
                    .get_mut(&kind)
                    .ok_or(ControlError::MissingTransport(kind))?;
                slot.connected = true;

                let ready = [TransportKind::Send, TransportKind::Receive]
                    .iter()
                    .all(|k| self.transports.get(k).is_some_and(|s| s.connected));

                if ready && !self.join_sent {
                    self.join_sent = true;
                    Ok(vec![Action::Send(ControlMessage::Join {
                        space_id: self.space_id.clone(),
                    })])
                } else {
                    Ok(Vec::new())
                }
            }
            ControlMessage::JoinSuccess { player_id } => {
                self.expect(ConnectionState::TransportSetup, "join_success")?;
                self.player_id = Some(player_id);
                self.transition(ConnectionState::Joined);

                let mut actions = vec![Action::Joined(player_id)];
                if let Some(name) = &self.nickname {
                    actions.push(Action::Send(ControlMessage::SetName { name: name.clone() }));
                }
                actions.push(Action::Send(ControlMessage::ProduceData {
                    label: DATA_PRODUCER_LABEL.into(),
                }));
                Ok(actions)
            }
            ControlMessage::DataProducerId { id } => {
                self.expect(ConnectionState::Joined, "data_producer_id")?;
                log::debug!("Data producer {id} ready");
                self.transition(ConnectionState::Streaming);
                Ok(vec![Action::StartStreaming])
            }
            ControlMessage::CreateDataConsumer {
                player_id,
                data_producer_id,
            } => {
                let receive = self
                    .transports
                    .get(&TransportKind::Receive)
                    .filter(|slot| slot.opened)
                    .ok_or(ControlError::MissingTransport(TransportKind::Receive))?;
                log::debug!("Consuming player {player_id} on {}", receive.remote);
                Ok(vec![Action::Consume {
                    player_id,
                    data_producer_id,
                }])
            }
            ControlMessage::ProducerId { id } => {
                log::debug!("Ignoring media producer {id}");
                Ok(Vec::new())
            }
            ControlMessage::CreateConsumer { player_id, .. } => {
                log::debug!("Ignoring media consumer for player {player_id}");
                Ok(Vec::new())
            }
            ControlMessage::Error { message } => Err(ControlError::Rejected(message)),
            other => Err(ControlError::Unexpected {
                subject: other.subject(),
                state: self.state,
            }),
        }
    }

    fn expect(&self, state: ConnectionState, subject: &'static str) -> Result<(), ControlError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ControlError::Unexpected {
                subject,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::debug!("Connection {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Capabilities the server advertises. Opaque to the client.
pub fn default_capabilities() -> serde_json::Value {
    json!({
        "dataChannels": {
            "ordered": false,
            "maxRetransmits": 0,
        },
        "frameLength": super::FRAME_LEN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn sent(actions: &[Action]) -> Vec<&'static str> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(m) => Some(m.subject()),
                _ => None,
            })
            .collect()
    }

    fn drive_to_streaming(handshake: &mut Handshake) {
        handshake.start();
        handshake
            .handle(ControlMessage::RouterRtpCapabilities {
                capabilities: default_capabilities(),
            })
            .unwrap();

        for (kind, port) in [(TransportKind::Send, 4001), (TransportKind::Receive, 4001)] {
            handshake
                .handle(ControlMessage::TransportCreated {
                    kind,
                    options: TransportOptions::new(addr(port)),
                })
                .unwrap();
            handshake.transport_opened(kind, addr(5000)).unwrap();
            handshake
                .handle(ControlMessage::TransportConnected { kind })
                .unwrap();
        }

        handshake
            .handle(ControlMessage::JoinSuccess { player_id: 4 })
            .unwrap();
        handshake
            .handle(ControlMessage::DataProducerId { id: "dp".into() })
            .unwrap();
    }

    #[test]
    fn full_handshake_reaches_streaming() {
        let mut handshake = Handshake::new("lobby", Some("ada".into()));
        assert_eq!(handshake.state(), ConnectionState::Disconnected);

        let actions = handshake.start();
        assert_eq!(sent(&actions), ["get_router_rtp_capabilities"]);
        assert_eq!(handshake.state(), ConnectionState::Handshake);

        let actions = handshake
            .handle(ControlMessage::RouterRtpCapabilities {
                capabilities: default_capabilities(),
            })
            .unwrap();
        assert_eq!(
            sent(&actions),
            ["set_rtp_capabilities", "create_transport", "create_transport"]
        );
        assert_eq!(handshake.state(), ConnectionState::TransportSetup);

        let actions = handshake
            .handle(ControlMessage::TransportCreated {
                kind: TransportKind::Send,
                options: TransportOptions::new(addr(4001)),
            })
            .unwrap();
        assert_eq!(
            actions,
            [Action::OpenTransport {
                kind: TransportKind::Send,
                remote: addr(4001)
            }]
        );
        let actions = handshake
            .transport_opened(TransportKind::Send, addr(5000))
            .unwrap();
        assert_eq!(sent(&actions), ["connect_transport"]);

        let actions = handshake
            .handle(ControlMessage::TransportConnected {
                kind: TransportKind::Send,
            })
            .unwrap();
        assert!(actions.is_empty());

        handshake
            .handle(ControlMessage::TransportCreated {
                kind: TransportKind::Receive,
                options: TransportOptions::new(addr(4001)),
            })
            .unwrap();
        handshake
            .transport_opened(TransportKind::Receive, addr(5001))
            .unwrap();
        let actions = handshake
            .handle(ControlMessage::TransportConnected {
                kind: TransportKind::Receive,
            })
            .unwrap();
        assert_eq!(sent(&actions), ["join"]);

        let actions = handshake
            .handle(ControlMessage::JoinSuccess { player_id: 4 })
            .unwrap();
        assert_eq!(actions[0], Action::Joined(4));
        assert_eq!(sent(&actions), ["set_name", "produce_data"]);
        assert_eq!(handshake.state(), ConnectionState::Joined);

        let actions = handshake
            .handle(ControlMessage::DataProducerId { id: "dp".into() })
            .unwrap();
        assert_eq!(actions, [Action::StartStreaming]);
        assert!(handshake.is_streaming());
        assert_eq!(handshake.player_id(), Some(4));
    }

    #[test]
    fn out_of_order_messages_are_rejected() {
        let mut handshake = Handshake::new("lobby", None);
        handshake.start();

        let err = handshake
            .handle(ControlMessage::JoinSuccess { player_id: 1 })
            .unwrap_err();
        assert!(matches!(err, ControlError::Unexpected { .. }));
        assert_eq!(handshake.state(), ConnectionState::Handshake);
    }

    #[test]
    fn consumer_without_receive_transport_fails_that_path_only() {
        let mut handshake = Handshake::new("lobby", None);
        handshake.start();

        let err = handshake
            .handle(ControlMessage::CreateDataConsumer {
                player_id: 2,
                data_producer_id: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::MissingTransport(TransportKind::Receive)
        ));
        assert_eq!(handshake.state(), ConnectionState::Handshake);

        assert!(matches!(
            handshake.transport_opened(TransportKind::Send, addr(1)),
            Err(ControlError::MissingTransport(TransportKind::Send))
        ));
    }

    #[test]
    fn player_events_pass_through_in_any_state() {
        let mut handshake = Handshake::new("lobby", None);
        let actions = handshake
            .handle(ControlMessage::PlayerJoined { player_id: 9 })
            .unwrap();
        assert_eq!(
            actions,
            [Action::Player(PlayerEvent::Joined { player_id: 9 })]
        );
    }

    #[test]
    fn disconnect_then_start_is_a_fresh_handshake() {
        let mut handshake = Handshake::new("lobby", None);
        drive_to_streaming(&mut handshake);
        assert!(handshake.is_streaming());

        handshake.disconnected();
        assert_eq!(handshake.state(), ConnectionState::Reconnecting);
        assert_eq!(handshake.player_id(), None);
        assert_eq!(handshake.remote(TransportKind::Send), None);

        let actions = handshake.start();
        assert_eq!(sent(&actions), ["get_router_rtp_capabilities"]);
        assert_eq!(handshake.state(), ConnectionState::Handshake);
    }

    #[test]
    fn server_error_is_surfaced() {
        let mut handshake = Handshake::new("lobby", None);
        handshake.start();
        assert!(matches!(
            handshake.handle(ControlMessage::Error {
                message: "space is full".into()
            }),
            Err(ControlError::Rejected(_))
        ));
    }
}
