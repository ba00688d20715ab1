//! Side-effect-free decode-and-scan used by the gateway to route a
//! connection before it is bridged to a room.

use crate::codec::decode_frame;
use crate::packets::Packet;

/// A create/join target named by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameTarget {
    pub cookie: u32,
    pub name: String,
}

/// Lobby intent extracted from one frame.
///
/// Each field captures the first packet of its kind in the flattened
/// sequence; a frame can carry several intents at once (clients commonly
/// batch `ClientInfo` with `CreateGame`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbyAction {
    pub client_version: Option<u32>,
    pub wants_game_list: bool,
    pub create: Option<GameTarget>,
    pub join: Option<GameTarget>,
}

impl LobbyAction {
    /// The room this frame wants to attach to, if any.
    #[must_use]
    pub fn room_target(&self) -> Option<&GameTarget> {
        self.create.as_ref().or(self.join.as_ref())
    }
}

/// Decodes `bytes` and scans the flat sequence for lobby intent.
/// Returns `None` when the frame does not decode.
#[must_use]
pub fn sniff_lobby_action(bytes: &[u8]) -> Option<LobbyAction> {
    let packets = decode_frame(bytes).ok()?;

    let mut action = LobbyAction::default();
    for packet in &packets {
        match packet {
            Packet::ClientInfo { version } => {
                if action.client_version.is_none() {
                    action.client_version = Some(*version);
                }
            }
            Packet::GameListRequest => {
                action.wants_game_list = true;
            }
            Packet::CreateGame { cookie, name, .. } => {
                if action.create.is_none() {
                    action.create = Some(GameTarget {
                        cookie: *cookie,
                        name: name.clone(),
                    });
                }
            }
            Packet::JoinGame { cookie, name, .. } => {
                if action.join.is_none() {
                    action.join = Some(GameTarget {
                        cookie: *cookie,
                        name: name.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_batch, encode_packet};

    #[test]
    fn undecodable_frame_yields_none() {
        assert_eq!(sniff_lobby_action(&[0xAB, 0xCD]), None);
    }

    #[test]
    fn client_info_is_recorded() {
        let frame = encode_packet(&Packet::ClientInfo { version: 7 });
        let action = sniff_lobby_action(&frame).unwrap();
        assert_eq!(action.client_version, Some(7));
        assert!(action.room_target().is_none());
    }

    #[test]
    fn batched_client_info_and_create_yield_both() {
        let frame = encode_batch(&[
            Packet::ClientInfo { version: 7 },
            Packet::CreateGame {
                cookie: 0xAA,
                name: "room1".into(),
                password: String::new(),
                difficulty: 2,
            },
        ]);

        let action = sniff_lobby_action(&frame).unwrap();
        assert_eq!(action.client_version, Some(7));
        let target = action.room_target().unwrap();
        assert_eq!(target.cookie, 0xAA);
        assert_eq!(target.name, "room1");
    }

    #[test]
    fn game_list_request_is_flagged() {
        let frame = encode_packet(&Packet::GameListRequest);
        let action = sniff_lobby_action(&frame).unwrap();
        assert!(action.wants_game_list);
    }

    #[test]
    fn decodable_frame_without_intent_is_empty() {
        let frame = encode_packet(&Packet::Turn { turn: 4 });
        let action = sniff_lobby_action(&frame).unwrap();
        assert_eq!(action, LobbyAction::default());
    }
}
