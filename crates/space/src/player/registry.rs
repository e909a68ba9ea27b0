use std::collections::{BTreeMap, VecDeque};

use glam::{Quat, Vec3};

use crate::net::ControlMessage;

pub type PlayerId = u8;

const CHAT_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Joined {
        player_id: PlayerId,
    },
    Left {
        player_id: PlayerId,
    },
    Address {
        player_id: PlayerId,
        address: String,
    },
    Nickname {
        player_id: PlayerId,
        name: String,
    },
    Falling {
        player_id: PlayerId,
        is_falling: bool,
    },
    Chat {
        player_id: PlayerId,
        text: String,
        timestamp: u64,
    },
}

impl PlayerEvent {
    pub fn player_id(&self) -> PlayerId {
        match self {
            PlayerEvent::Joined { player_id }
            | PlayerEvent::Left { player_id }
            | PlayerEvent::Address { player_id, .. }
            | PlayerEvent::Nickname { player_id, .. }
            | PlayerEvent::Falling { player_id, .. }
            | PlayerEvent::Chat { player_id, .. } => *player_id,
        }
    }

    /// Maps the per-player control subjects; everything else is `None`.
    pub fn from_control(message: &ControlMessage) -> Option<Self> {
        let event = match message {
            ControlMessage::PlayerJoined { player_id } => PlayerEvent::Joined {
                player_id: *player_id,
            },
            ControlMessage::PlayerLeft { player_id } => PlayerEvent::Left {
                player_id: *player_id,
            },
            ControlMessage::PlayerAddress { player_id, address } => PlayerEvent::Address {
                player_id: *player_id,
                address: address.clone(),
            },
            ControlMessage::PlayerNickname { player_id, name } => PlayerEvent::Nickname {
                player_id: *player_id,
                name: name.clone(),
            },
            ControlMessage::PlayerFallingState {
                player_id,
                is_falling,
            } => PlayerEvent::Falling {
                player_id: *player_id,
                is_falling: *is_falling,
            },
            ControlMessage::PlayerChat {
                player_id,
                text,
                timestamp,
            } => PlayerEvent::Chat {
                player_id: *player_id,
                text: text.clone(),
                timestamp: *timestamp,
            },
            _ => return None,
        };
        Some(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub text: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub nickname: Option<String>,
    pub address: Option<String>,
    pub is_falling: bool,
    pub chat: VecDeque<ChatLine>,
    pub target: Option<(Vec3, Quat)>,
}

impl PlayerRecord {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            name: format!("Player {id}"),
            nickname: None,
            address: None,
            is_falling: false,
            chat: VecDeque::new(),
            target: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.name)
    }
}

/// Remote players known to this client, keyed by id.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, PlayerRecord>,
    local: Option<PlayerId>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns it back when a record changed, `None` when
    /// the id is unknown (or the event is a no-op).
    pub fn apply(&mut self, event: PlayerEvent) -> Option<PlayerEvent> {
        match &event {
            PlayerEvent::Joined { player_id } => {
                if Some(*player_id) == self.local {
                    return None;
                }
                if self.players.contains_key(player_id) {
                    return None;
                }
                self.players
                    .insert(*player_id, PlayerRecord::new(*player_id));
            }
            PlayerEvent::Left { player_id } => {
                self.players.remove(player_id)?;
            }
            PlayerEvent::Address { player_id, address } => {
                self.players.get_mut(player_id)?.address = Some(address.clone());
            }
            PlayerEvent::Nickname { player_id, name } => {
                self.players.get_mut(player_id)?.nickname = Some(name.clone());
            }
            PlayerEvent::Falling {
                player_id,
                is_falling,
            } => {
                self.players.get_mut(player_id)?.is_falling = *is_falling;
            }
            PlayerEvent::Chat {
                player_id,
                text,
                timestamp,
            } => {
                let record = self.players.get_mut(player_id)?;
                if record.chat.len() == CHAT_HISTORY {
                    record.chat.pop_front();
                }
                record.chat.push_back(ChatLine {
                    text: text.clone(),
                    timestamp: *timestamp,
                });
            }
        }
        Some(event)
    }

    /// Records the latest network transform. `false` for unknown ids.
    pub fn update_target(&mut self, id: PlayerId, position: Vec3, rotation: Quat) -> bool {
        match self.players.get_mut(&id) {
            Some(record) => {
                record.target = Some((position, rotation));
                true
            }
            None => false,
        }
    }

    pub fn set_local(&mut self, id: Option<PlayerId>) {
        self.local = id;
        if let Some(id) = id {
            self.players.remove(&id);
        }
    }

    pub fn local(&self) -> Option<PlayerId> {
        self.local
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerRecord> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Forgets everyone and returns the ids that were known.
    pub fn clear(&mut self) -> Vec<PlayerId> {
        self.local = None;
        let ids = self.players.keys().copied().collect();
        self.players.clear();
        ids
    }
}
