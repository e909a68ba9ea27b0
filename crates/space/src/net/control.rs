use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;

use super::ConnectionState;

/// Direction of a data transport as seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Send,
    Receive,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Send => f.write_str("send"),
            TransportKind::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub address: String,
}

impl TransportOptions {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ControlError> {
        self.address
            .parse()
            .map_err(|_| ControlError::InvalidOptions(self.address.clone()))
    }
}

/// Reliable control channel message, `{"subject": ..., "data": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "subject",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ControlMessage {
    GetRouterRtpCapabilities,
    RouterRtpCapabilities {
        capabilities: serde_json::Value,
    },
    SetRtpCapabilities {
        capabilities: serde_json::Value,
    },
    Join {
        space_id: String,
    },
    JoinSuccess {
        player_id: PlayerId,
    },
    CreateTransport {
        #[serde(rename = "type")]
        kind: TransportKind,
    },
    TransportCreated {
        #[serde(rename = "type")]
        kind: TransportKind,
        options: TransportOptions,
    },
    ConnectTransport {
        #[serde(rename = "type")]
        kind: TransportKind,
        options: TransportOptions,
    },
    TransportConnected {
        #[serde(rename = "type")]
        kind: TransportKind,
    },
    Produce {
        kind: String,
    },
    ProduceData {
        label: String,
    },
    ProducerId {
        id: String,
    },
    DataProducerId {
        id: String,
    },
    CreateConsumer {
        player_id: PlayerId,
        producer_id: String,
    },
    CreateDataConsumer {
        player_id: PlayerId,
        data_producer_id: String,
    },
    PlayerJoined {
        player_id: PlayerId,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    PlayerAddress {
        player_id: PlayerId,
        address: String,
    },
    PlayerNickname {
        player_id: PlayerId,
        name: String,
    },
    PlayerChat {
        player_id: PlayerId,
        text: String,
        timestamp: u64,
    },
    PlayerFallingState {
        player_id: PlayerId,
        is_falling: bool,
    },
    SetAvatar {
        url: String,
    },
    SetName {
        name: String,
    },
    SetGrounded {
        is_grounded: bool,
    },
    Chat {
        text: String,
    },
    Error {
        message: String,
    },
}

impl ControlMessage {
    pub fn encode(&self) -> Result<String, ControlError> {
        serde_json::to_string(self).map_err(ControlError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ControlError> {
        serde_json::from_str(text).map_err(ControlError::Malformed)
    }

    pub fn subject(&self) -> &'static str {
        match self {
            ControlMessage::GetRouterRtpCapabilities => "get_router_rtp_capabilities",
            ControlMessage::RouterRtpCapabilities { .. } => "router_rtp_capabilities",
            ControlMessage::SetRtpCapabilities { .. } => "set_rtp_capabilities",
            ControlMessage::Join { .. } => "join",
            ControlMessage::JoinSuccess { .. } => "join_success",
            ControlMessage::CreateTransport { .. } => "create_transport",
            ControlMessage::TransportCreated { .. } => "transport_created",
            ControlMessage::ConnectTransport { .. } => "connect_transport",
            ControlMessage::TransportConnected { .. } => "transport_connected",
            ControlMessage::Produce { .. } => "produce",
            ControlMessage::ProduceData { .. } => "produce_data",
            ControlMessage::ProducerId { .. } => "producer_id",
            ControlMessage::DataProducerId { .. } => "data_producer_id",
            ControlMessage::CreateConsumer { .. } => "create_consumer",
            ControlMessage::CreateDataConsumer { .. } => "create_data_consumer",
            ControlMessage::PlayerJoined { .. } => "player_joined",
            ControlMessage::PlayerLeft { .. } => "player_left",
            ControlMessage::PlayerAddress { .. } => "player_address",
            ControlMessage::PlayerNickname { .. } => "player_nickname",
            ControlMessage::PlayerChat { .. } => "player_chat",
            ControlMessage::PlayerFallingState { .. } => "player_falling_state",
            ControlMessage::SetAvatar { .. } => "set_avatar",
            ControlMessage::SetName { .. } => "set_name",
            ControlMessage::SetGrounded { .. } => "set_grounded",
            ControlMessage::Chat { .. } => "chat",
            ControlMessage::Error { .. } => "error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode control message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no {0} transport has been created")]
    MissingTransport(TransportKind),
    #[error("invalid transport options: {0:?}")]
    InvalidOptions(String),
    #[error("unexpected {subject} while {state}")]
    Unexpected {
        subject: &'static str,
        state: ConnectionState,
    },
    #[error("server rejected the session: {0}")]
    Rejected(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("control channel closed")]
    Closed,
    #[error("gave up after {0} reconnect attempts")]
    ReconnectLimit(u32),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_shape_uses_subject_and_camel_case() {
        let msg = ControlMessage::PlayerFallingState {
            player_id: 3,
            is_falling: true,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"subject": "player_falling_state", "data": {"playerId": 3, "isFalling": true}})
        );

        let msg = ControlMessage::CreateTransport {
            kind: TransportKind::Receive,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"subject": "create_transport", "data": {"type": "receive"}})
        );
    }

    #[test]
    fn decodes_unit_subject_without_data() {
        let msg = ControlMessage::decode(r#"{"subject":"get_router_rtp_capabilities"}"#).unwrap();
        assert_eq!(msg, ControlMessage::GetRouterRtpCapabilities);
        assert_eq!(msg.subject(), "get_router_rtp_capabilities");
    }

    #[test]
    fn decodes_join_from_peer() {
        let msg = ControlMessage::decode(r#"{"subject":"join","data":{"spaceId":"lobby"}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Join {
                space_id: "lobby".into()
            }
        );
    }

    #[test]
    fn malformed_input_is_an_error() {
        for text in [
            "not json",
            r#"{"subject":"no_such_subject","data":{}}"#,
            r#"{"subject":"player_left","data":{"playerId":"three"}}"#,
            r#"{"data":{"playerId":3}}"#,
        ] {
            assert!(matches!(
                ControlMessage::decode(text),
                Err(ControlError::Malformed(_))
            ));
        }
    }

    #[test]
    fn transport_options_parse_address() {
        let options = TransportOptions {
            address: "127.0.0.1:4001".into(),
        };
        assert_eq!(options.socket_addr().unwrap().port(), 4001);

        let bad = TransportOptions {
            address: "nowhere".into(),
        };
        assert!(matches!(
            bad.socket_addr(),
            Err(ControlError::InvalidOptions(_))
        ));
    }
}
