use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use protocol::{
    decode_frame, encode_packet, Packet, RejectReason, BROADCAST_ID, MAX_FRAME_BYTES, MAX_PLAYERS,
};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::directory::{DirectoryHandle, DirectoryUpsert};
use super::{close, now_ms, ConnId};

/// Decode failures tolerated per connection before a protocol close.
const MAX_INVALID_PACKETS: u32 = 2;
/// Sliding window for the per-connection packet budget.
const RATE_WINDOW: Duration = Duration::from_secs(15);
/// Packets allowed per connection inside one window.
const MAX_MESSAGES_PER_WINDOW: u32 = 512;
/// Command backlog per room actor.
const COMMAND_BUFFER: usize = 256;

/// Outbound traffic from a room to one attached socket.
#[derive(Debug)]
pub enum RoomEgress {
    Frame(Vec<u8>),
    Close { code: u16, reason: &'static str },
}

#[derive(Debug)]
enum RoomCommand {
    Attach {
        conn: ConnId,
        egress: mpsc::Sender<RoomEgress>,
    },
    Frame {
        conn: ConnId,
        bytes: Vec<u8>,
    },
    Detach {
        conn: ConnId,
        error: bool,
    },
    Shutdown,
}

/// Introspection snapshot for one room actor.
#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub name: Option<String>,
    pub game_type: u32,
    pub players: u32,
    pub slots_total: u32,
    pub created_at_ms: Option<u64>,
    pub last_activity_ms: u64,
}

impl RoomStats {
    fn new() -> Self {
        Self {
            name: None,
            game_type: 0,
            players: 0,
            slots_total: MAX_PLAYERS as u32,
            created_at_ms: None,
            last_activity_ms: now_ms(),
        }
    }
}

/// Cheap cloneable handle to one room actor.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
    stats: Arc<Mutex<RoomStats>>,
    instance: u64,
}

impl RoomHandle {
    pub async fn attach(&self, conn: ConnId, egress: mpsc::Sender<RoomEgress>) -> anyhow::Result<()> {
        self.tx.send(RoomCommand::Attach { conn, egress }).await?;
        Ok(())
    }

    pub async fn frame(&self, conn: ConnId, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.tx.send(RoomCommand::Frame { conn, bytes }).await?;
        Ok(())
    }

    /// Reports the socket as gone; `error` selects the default disconnect
    /// reason when no override was stashed.
    pub async fn detach(&self, conn: ConnId, error: bool) -> anyhow::Result<()> {
        self.tx.send(RoomCommand::Detach { conn, error }).await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.tx.send(RoomCommand::Shutdown).await?;
        Ok(())
    }

    pub async fn stats(&self) -> RoomStats {
        self.stats.lock().await.clone()
    }

    #[must_use]
    pub fn instance(&self) -> u64 {
        self.instance
    }
}

/// Packet budget over a sliding window; entries expire after `RATE_WINDOW`.
struct SlidingWindow {
    events: VecDeque<(Instant, u32)>,
    total: u32,
}

impl SlidingWindow {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            total: 0,
        }
    }

    fn push(&mut self, count: u32, now: Instant) -> u32 {
        while let Some(&(at, n)) = self.events.front() {
            if now.duration_since(at) >= RATE_WINDOW {
                self.events.pop_front();
                self.total -= n;
            } else {
                break;
            }
        }
        self.events.push_back((now, count));
        self.total += count;
        self.total
    }
}

struct ConnState {
    egress: mpsc::Sender<RoomEgress>,
    client_version: Option<u32>,
    invalid_frames: u32,
    window: SlidingWindow,
    close_reason: Option<u32>,
    slot: Option<usize>,
    closing: bool,
}

impl ConnState {
    fn new(egress: mpsc::Sender<RoomEgress>) -> Self {
        Self {
            egress,
            client_version: None,
            invalid_frames: 0,
            window: SlidingWindow::new(),
            close_reason: None,
            slot: None,
            closing: false,
        }
    }
}

/// Game metadata created by the first successful `CreateGame`.
struct GameState {
    name: String,
    password: String,
    difficulty: u32,
    seed: u32,
    game_type: u32,
    version: u32,
    created_at_ms: u64,
}

struct Room {
    name: String,
    directory: DirectoryHandle,
    state: Option<GameState>,
    slots: [Option<ConnId>; MAX_PLAYERS],
    conns: HashMap<ConnId, ConnState>,
    stats: Arc<Mutex<RoomStats>>,
    ever_attached: bool,
}

/// Spawns a room actor. All room state lives on the actor task; the handle
/// only carries the command channel and the stats cell. The actor exits once
/// its last connection detaches and removes itself from `registry`.
pub fn start_room(
    name: String,
    directory: DirectoryHandle,
    registry: Arc<DashMap<String, RoomHandle>>,
    instance: u64,
) -> RoomHandle {
    let (tx, mut rx) = mpsc::channel::<RoomCommand>(COMMAND_BUFFER);
    let stats = Arc::new(Mutex::new(RoomStats::new()));
    let stats_clone = stats.clone();

    let actor_name = name.clone();
    tokio::spawn(async move {
        let mut room = Room {
            name: actor_name.clone(),
            directory,
            state: None,
            slots: [None; MAX_PLAYERS],
            conns: HashMap::new(),
            stats: stats_clone,
            ever_attached: false,
        };

        while let Some(cmd) = rx.recv().await {
            match cmd {
                RoomCommand::Attach { conn, egress } => room.handle_attach(conn, egress),
                RoomCommand::Frame { conn, bytes } => room.handle_frame(conn, bytes).await,
                RoomCommand::Detach { conn, error } => room.handle_detach(conn, error).await,
                RoomCommand::Shutdown => {
                    room.close_room(0).await;
                    break;
                }
            }

            if room.ever_attached && room.conns.is_empty() {
                break;
            }
        }

        registry.remove_if(&actor_name, |_, handle| handle.instance() == instance);
        log::debug!("room actor '{actor_name}' stopped");
    });

    RoomHandle {
        tx,
        stats,
        instance,
    }
}

impl Room {
    fn handle_attach(&mut self, conn: ConnId, egress: mpsc::Sender<RoomEgress>) {
        self.ever_attached = true;
        self.conns.insert(conn, ConnState::new(egress));
        log::debug!("room '{}': {conn} attached", self.name);
    }

    async fn handle_frame(&mut self, conn: ConnId, bytes: Vec<u8>) {
        let Some(state) = self.conns.get_mut(&conn) else {
            return;
        };
        if state.closing {
            return;
        }

        if bytes.len() > MAX_FRAME_BYTES {
            log::warn!("room '{}': oversize frame from {conn}", self.name);
            self.close_conn(conn, close::CAPACITY, "frame too large");
            return;
        }

        let packets = match decode_frame(&bytes) {
            Ok(packets) => packets,
            Err(err) => {
                state.invalid_frames += 1;
                log::debug!("room '{}': decode failure from {conn}: {err}", self.name);
                if state.invalid_frames > MAX_INVALID_PACKETS {
                    self.close_conn(conn, close::PROTOCOL, "invalid packet");
                }
                return;
            }
        };

        let budget = state.window.push(packets.len() as u32, Instant::now());
        if budget > MAX_MESSAGES_PER_WINDOW {
            log::warn!("room '{}': {conn} exceeded the packet budget", self.name);
            self.close_conn(conn, close::POLICY, "flood");
            return;
        }

        self.touch().await;

        for packet in packets {
            self.dispatch(conn, packet).await;
            if self.conns.get(&conn).map_or(true, |c| c.closing) {
                break;
            }
        }
    }

    async fn dispatch(&mut self, conn: ConnId, packet: Packet) {
        match packet {
            Packet::ClientInfo { version } => {
                if let Some(state) = self.conns.get_mut(&conn) {
                    state.client_version = Some(version);
                }
            }
            Packet::CreateGame {
                cookie,
                name,
                password,
                difficulty,
            } => {
                self.handle_create(conn, cookie, name, password, difficulty)
                    .await;
            }
            Packet::JoinGame {
                cookie,
                name,
                password,
            } => {
                self.handle_join(conn, cookie, name, password).await;
            }
            Packet::LeaveGame => self.handle_leave(conn).await,
            Packet::DropPlayer { id, reason } => self.handle_drop(conn, id, reason).await,
            Packet::Message { id, payload } => self.handle_message(conn, id, payload).await,
            Packet::Turn { turn } => self.handle_turn(conn, turn).await,
            other => {
                log::debug!(
                    "room '{}': ignoring packet {:#04x} from {conn}",
                    self.name,
                    other.code()
                );
            }
        }
    }

    async fn handle_create(
        &mut self,
        conn: ConnId,
        cookie: u32,
        name: String,
        password: String,
        difficulty: u32,
    ) {
        if !valid_room_name(&name) {
            log::warn!("room '{}': invalid room name from {conn}", self.name);
            self.close_conn(conn, close::PROTOCOL, "invalid name");
            return;
        }

        let (joined, version) = match self.conns.get(&conn) {
            Some(state) => (state.slot.is_some(), state.client_version),
            None => return,
        };
        if joined {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::AlreadyInGame))
                .await;
            return;
        }
        let Some(version) = version else {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::VersionMismatch))
                .await;
            return;
        };
        if self.state.is_some() {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::CreateExists))
                .await;
            return;
        }
        let Some(slot) = self.free_slot() else {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::Full))
                .await;
            return;
        };

        let seed: u32 = rand::random();
        self.state = Some(GameState {
            name: name.clone(),
            password,
            difficulty,
            seed,
            game_type: 0,
            version,
            created_at_ms: now_ms(),
        });
        self.promote(conn, slot);

        self.send_packet(
            conn,
            &Packet::JoinAccept {
                cookie,
                index: slot as u8,
                seed,
                difficulty,
            },
        )
        .await;
        self.broadcast(&Packet::Connect { id: slot as u8 }, None).await;
        self.update_directory().await;
        self.refresh_stats().await;

        log::info!("room '{name}': created by {conn} (difficulty {difficulty})");
    }

    async fn handle_join(&mut self, conn: ConnId, cookie: u32, name: String, password: String) {
        let (joined, version) = match self.conns.get(&conn) {
            Some(state) => (state.slot.is_some(), state.client_version),
            None => return,
        };
        if joined {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::AlreadyInGame))
                .await;
            return;
        }
        let Some(version) = version else {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::VersionMismatch))
                .await;
            return;
        };

        let reject = match &self.state {
            None => Some(RejectReason::NotFound),
            Some(state) if state.name != name => Some(RejectReason::NotFound),
            Some(state) if state.password != password => Some(RejectReason::IncorrectPassword),
            Some(state) if state.version != version => Some(RejectReason::VersionMismatch),
            Some(_) => None,
        };
        if let Some(reason) = reject {
            self.send_packet(conn, &Packet::reject(cookie, reason)).await;
            return;
        }
        let Some(slot) = self.free_slot() else {
            self.send_packet(conn, &Packet::reject(cookie, RejectReason::Full))
                .await;
            return;
        };

        let (seed, difficulty) = match &self.state {
            Some(state) => (state.seed, state.difficulty),
            None => return,
        };
        self.promote(conn, slot);

        self.send_packet(
            conn,
            &Packet::JoinAccept {
                cookie,
                index: slot as u8,
                seed,
                difficulty,
            },
        )
        .await;
        self.broadcast(&Packet::Connect { id: slot as u8 }, None).await;
        self.update_directory().await;
        self.refresh_stats().await;

        log::info!("room '{}': {conn} joined slot {slot}", self.name);
    }

    async fn handle_leave(&mut self, conn: ConnId) {
        let slot = self.conns.get(&conn).and_then(|state| state.slot);
        if slot == Some(0) {
            self.close_room(3).await;
            return;
        }

        if let Some(state) = self.conns.get_mut(&conn) {
            state.close_reason = Some(3);
        }
        self.close_conn(conn, close::NORMAL, "leave");
    }

    async fn handle_drop(&mut self, conn: ConnId, id: u8, reason: u32) {
        let sender_slot = self.conns.get(&conn).and_then(|state| state.slot);
        if sender_slot != Some(0) {
            log::warn!("room '{}': non-host drop attempt from {conn}", self.name);
            self.close_conn(conn, close::POLICY, "not host");
            return;
        }

        if id == 0 {
            self.close_room(reason).await;
            return;
        }

        let Some(target) = self
            .slots
            .get(id as usize)
            .copied()
            .flatten()
        else {
            return;
        };
        if let Some(state) = self.conns.get_mut(&target) {
            state.close_reason = Some(reason);
        }
        self.close_conn(target, close::NORMAL, "dropped");
    }

    async fn handle_message(&mut self, conn: ConnId, id: u8, payload: Vec<u8>) {
        let Some(sender_slot) = self.conns.get(&conn).and_then(|state| state.slot) else {
            log::debug!("room '{}': message from unjoined {conn}", self.name);
            return;
        };

        let relay = Packet::Message {
            id: sender_slot as u8,
            payload,
        };
        if id == BROADCAST_ID {
            self.broadcast(&relay, Some(conn)).await;
        } else if let Some(target) = self.slots.get(id as usize).copied().flatten() {
            self.send_packet(target, &relay).await;
        }
    }

    async fn handle_turn(&mut self, conn: ConnId, turn: u32) {
        let Some(sender_slot) = self.conns.get(&conn).and_then(|state| state.slot) else {
            log::debug!("room '{}': turn from unjoined {conn}", self.name);
            return;
        };

        self.broadcast(
            &Packet::TurnBroadcast {
                id: sender_slot as u8,
                turn,
            },
            Some(conn),
        )
        .await;
    }

    async fn handle_detach(&mut self, conn: ConnId, error: bool) {
        let Some(state) = self.conns.remove(&conn) else {
            return;
        };
        let reason = state
            .close_reason
            .unwrap_or(if error { 0 } else { 3 });

        let Some(slot) = state.slot else {
            log::debug!("room '{}': {conn} detached before joining", self.name);
            return;
        };
        // Already cleared when the room was closed underneath this socket.
        if self.slots[slot] != Some(conn) {
            return;
        }

        if slot == 0 {
            self.close_room(reason).await;
            return;
        }

        self.slots[slot] = None;
        self.broadcast(
            &Packet::Disconnect {
                id: slot as u8,
                reason,
            },
            None,
        )
        .await;

        if self.occupied() == 0 {
            self.state = None;
            self.remove_directory().await;
        } else {
            self.update_directory().await;
        }
        self.refresh_stats().await;

        log::info!(
            "room '{}': {conn} left slot {slot} (reason {reason})",
            self.name
        );
    }

    /// Disconnect-broadcasts every occupied slot in ascending order, then
    /// closes every attached socket and drops the room metadata.
    async fn close_room(&mut self, reason: u32) {
        let Some(state) = self.state.take() else {
            for conn in self.conns.keys().copied().collect::<Vec<_>>() {
                self.close_conn(conn, close::NORMAL, "room closed");
            }
            return;
        };

        for slot in 0..MAX_PLAYERS {
            if self.slots[slot].is_some() {
                self.broadcast(
                    &Packet::Disconnect {
                        id: slot as u8,
                        reason,
                    },
                    None,
                )
                .await;
            }
        }

        for conn in self.conns.keys().copied().collect::<Vec<_>>() {
            if let Some(conn_state) = self.conns.get_mut(&conn) {
                conn_state.close_reason = Some(reason);
            }
            self.close_conn(conn, close::NORMAL, "room closed");
        }

        self.slots = [None; MAX_PLAYERS];
        if let Err(err) = self.directory.remove(state.name.clone()).await {
            log::warn!("room '{}': directory remove failed: {err}", state.name);
        }
        self.refresh_stats().await;

        log::info!("room '{}' closed (reason {reason})", state.name);
    }

    async fn send_packet(&mut self, conn: ConnId, packet: &Packet) {
        self.send_frame(conn, encode_packet(packet)).await;
    }

    async fn send_frame(&mut self, conn: ConnId, frame: Vec<u8>) {
        let Some(state) = self.conns.get(&conn) else {
            return;
        };
        if state.closing {
            return;
        }
        if state.egress.try_send(RoomEgress::Frame(frame)).is_err() {
            log::warn!("room '{}': send to {conn} failed, closing", self.name);
            self.close_conn(conn, close::INTERNAL, "send failure");
        }
    }

    async fn broadcast(&mut self, packet: &Packet, exclude: Option<ConnId>) {
        let frame = encode_packet(packet);
        for slot in 0..MAX_PLAYERS {
            let Some(target) = self.slots[slot] else {
                continue;
            };
            if Some(target) == exclude {
                continue;
            }
            self.send_frame(target, frame.clone()).await;
        }
    }

    /// Marks the connection closing and pushes the close downstream. The
    /// connection record stays until the gateway reports the detach.
    fn close_conn(&mut self, conn: ConnId, code: u16, reason: &'static str) {
        if let Some(state) = self.conns.get_mut(&conn) {
            if state.closing {
                return;
            }
            state.closing = true;
            let _ = state.egress.try_send(RoomEgress::Close { code, reason });
        }
    }

    fn promote(&mut self, conn: ConnId, slot: usize) {
        if let Some(state) = self.conns.get_mut(&conn) {
            state.slot = Some(slot);
        }
        self.slots[slot] = Some(conn);
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    async fn update_directory(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let update = DirectoryUpsert {
            name: state.name.clone(),
            game_type: state.game_type,
            slots_used: self.occupied() as u32,
            slots_total: MAX_PLAYERS as u32,
        };
        if let Err(err) = self.directory.upsert(update).await {
            log::warn!("room '{}': directory upsert failed: {err}", self.name);
        }
    }

    async fn remove_directory(&self) {
        if let Err(err) = self.directory.remove(self.name.clone()).await {
            log::warn!("room '{}': directory remove failed: {err}", self.name);
        }
    }

    async fn touch(&self) {
        let mut stats = self.stats.lock().await;
        stats.last_activity_ms = now_ms();
    }

    async fn refresh_stats(&self) {
        let mut stats = self.stats.lock().await;
        stats.players = self.occupied() as u32;
        stats.name = self.state.as_ref().map(|state| state.name.clone());
        stats.game_type = self.state.as_ref().map_or(0, |state| state.game_type);
        stats.created_at_ms = self.state.as_ref().map(|state| state.created_at_ms);
    }
}

/// Room names are one to 32 characters of `[A-Za-z0-9_-]`.
fn valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
