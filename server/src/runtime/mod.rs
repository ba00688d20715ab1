pub mod core;
pub mod directory;
pub mod gateway;
pub mod room;
pub mod storage;

pub use core::LobbyRuntime;
pub use gateway::{start_ws_gateway, WsGatewayHandle};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// WebSocket close codes shared by the gateway and room actors.
pub mod close {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL: u16 = 1002;
    pub const POLICY: u16 = 1008;
    pub const CAPACITY: u16 = 1009;
    pub const INTERNAL: u16 = 1011;
}

/// Identifier for one attached WebSocket connection, unique per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
