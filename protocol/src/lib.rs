//! Wire protocol shared between the lobby relay server and its clients.
//!
//! The crate is transport-agnostic: one WebSocket binary message is one
//! frame, a frame decodes to one or more packets (`Batch` flattening), and
//! encoding is the exact inverse for every symmetric layout.

pub mod codec;
pub mod packets;
pub mod sniff;

pub use codec::{
    decode_frame, encode_batch, encode_packet, CodecError, MAX_BATCH_DEPTH, MAX_FRAME_BYTES,
};
pub use packets::{
    code, GameEntry, Packet, RejectReason, BROADCAST_ID, MAX_PLAYERS, PROTOCOL_VERSION,
};
pub use sniff::{sniff_lobby_action, GameTarget, LobbyAction};

/// Returns the protocol crate version string.
pub fn protocol_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
