//! Packet model for the lobby relay wire protocol.

/// Protocol version advertised in `ServerInfo` right after the WS handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// `Message` target id that relays to every joined player except the sender.
pub const BROADCAST_ID: u8 = 0xFF;

/// Number of player slots in a room. Slot 0 is always the host.
pub const MAX_PLAYERS: usize = 4;

/// Wire codes, one byte at the start of every packet.
pub mod code {
    pub const BATCH: u8 = 0x00;
    pub const MESSAGE: u8 = 0x01;
    pub const TURN: u8 = 0x02;
    pub const DROP_PLAYER: u8 = 0x03;
    pub const JOIN_ACCEPT: u8 = 0x12;
    pub const CONNECT: u8 = 0x13;
    pub const DISCONNECT: u8 = 0x14;
    pub const JOIN_REJECT: u8 = 0x15;
    pub const GAME_LIST: u8 = 0x21;
    pub const CREATE_GAME: u8 = 0x22;
    pub const JOIN_GAME: u8 = 0x23;
    pub const LEAVE_GAME: u8 = 0x24;
    pub const CLIENT_INFO: u8 = 0x31;
    pub const SERVER_INFO: u8 = 0x32;
}

/// Admission outcome carried in `JoinReject`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    Success = 0,
    AlreadyInGame = 1,
    NotFound = 2,
    IncorrectPassword = 3,
    VersionMismatch = 4,
    Full = 5,
    CreateExists = 6,
}

impl From<RejectReason> for u8 {
    fn from(reason: RejectReason) -> u8 {
        reason as u8
    }
}

/// One row of a `GameList` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameEntry {
    pub game_type: u32,
    pub name: String,
}

/// A decoded (or to-be-encoded) lobby packet.
///
/// Two codes are asymmetric on the wire: clients send the short forms
/// (`Turn`, `GameListRequest`) and the server encodes the long forms
/// (`TurnBroadcast`, `GameList`). The decoder only ever produces the short
/// forms; see the codec for the exact layouts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// Container frame; the decoder flattens its contents in order.
    Batch(Vec<Packet>),
    Message {
        id: u8,
        payload: Vec<u8>,
    },
    /// A turn as received from a client; the wire form carries no player id.
    Turn {
        turn: u32,
    },
    /// A turn as relayed to other players, stamped with the sender's slot.
    TurnBroadcast {
        id: u8,
        turn: u32,
    },
    DropPlayer {
        id: u8,
        reason: u32,
    },
    JoinAccept {
        cookie: u32,
        index: u8,
        seed: u32,
        difficulty: u32,
    },
    Connect {
        id: u8,
    },
    Disconnect {
        id: u8,
        reason: u32,
    },
    JoinReject {
        cookie: u32,
        reason: u8,
    },
    /// Request form of the game list; carries no payload.
    GameListRequest,
    /// Response form of the game list, one entry per active room.
    GameList {
        entries: Vec<GameEntry>,
    },
    CreateGame {
        cookie: u32,
        name: String,
        password: String,
        difficulty: u32,
    },
    JoinGame {
        cookie: u32,
        name: String,
        password: String,
    },
    LeaveGame,
    ClientInfo {
        version: u32,
    },
    ServerInfo {
        version: u32,
    },
}

impl Packet {
    /// The wire code this packet encodes under.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Packet::Batch(_) => code::BATCH,
            Packet::Message { .. } => code::MESSAGE,
            Packet::Turn { .. } | Packet::TurnBroadcast { .. } => code::TURN,
            Packet::DropPlayer { .. } => code::DROP_PLAYER,
            Packet::JoinAccept { .. } => code::JOIN_ACCEPT,
            Packet::Connect { .. } => code::CONNECT,
            Packet::Disconnect { .. } => code::DISCONNECT,
            Packet::JoinReject { .. } => code::JOIN_REJECT,
            Packet::GameListRequest | Packet::GameList { .. } => code::GAME_LIST,
            Packet::CreateGame { .. } => code::CREATE_GAME,
            Packet::JoinGame { .. } => code::JOIN_GAME,
            Packet::LeaveGame => code::LEAVE_GAME,
            Packet::ClientInfo { .. } => code::CLIENT_INFO,
            Packet::ServerInfo { .. } => code::SERVER_INFO,
        }
    }

    /// Builds a `JoinReject` from a typed reason.
    #[must_use]
    pub fn reject(cookie: u32, reason: RejectReason) -> Self {
        Packet::JoinReject {
            cookie,
            reason: reason.into(),
        }
    }
}
