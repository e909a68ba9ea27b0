use std::fmt;
use std::net::SocketAddr;

use spacesync::PlayerId;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected {
        conn: u64,
        addr: SocketAddr,
    },
    PlayerJoined {
        player_id: PlayerId,
        space_id: String,
    },
    PlayerLeft {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
    JoinDenied {
        addr: SocketAddr,
        reason: String,
    },
    Chat {
        player_id: PlayerId,
        text: String,
    },
    TimedOut {
        conn: u64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out before joining",
            DisconnectReason::Shutdown => "dropped at shutdown",
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Connected { conn, addr } => {
                write!(f, "Connection {conn} from {addr}")
            }
            ServerEvent::PlayerJoined {
                player_id,
                space_id,
            } => write!(f, "Player {player_id} joined space {space_id}"),
            ServerEvent::PlayerLeft { player_id, reason } => {
                write!(f, "Player {player_id} {}", reason.as_str())
            }
            ServerEvent::JoinDenied { addr, reason } => {
                write!(f, "Join denied to {addr}: {reason}")
            }
            ServerEvent::Chat { player_id, text } => write!(f, "[{player_id}] {text}"),
            ServerEvent::TimedOut { conn } => {
                write!(f, "Connection {conn} {}", DisconnectReason::Timeout.as_str())
            }
            ServerEvent::Error { message } => f.write_str(message),
        }
    }
}
