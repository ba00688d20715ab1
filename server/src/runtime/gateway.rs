use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{encode_packet, sniff_lobby_action, Packet, PROTOCOL_VERSION};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::core::LobbyRuntime;
use super::room::{RoomEgress, RoomHandle};
use super::{close, ConnId};

/// Grace period for a connection to get bridged after its first frame.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Frames buffered per connection before the bridge is up.
const MAX_PENDING_MESSAGES: usize = 256;
const MAX_PENDING_BYTES: usize = 14 * 1024 * 1024;

/// Tighter limits for frames that did not decode at all.
const MAX_PENDING_UNKNOWN_MESSAGES: usize = 32;
const MAX_PENDING_UNKNOWN_BYTES: usize = 1024 * 1024;

/// Outbound room-to-client backlog.
const EGRESS_BUFFER: usize = 256;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

#[derive(Clone)]
pub struct WsGatewayHandle {
    local_addr: SocketAddr,
    accept_task: Arc<JoinHandle<()>>,
}

impl WsGatewayHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close(&self) {
        self.accept_task.abort();
    }
}

pub async fn start_ws_gateway(
    runtime: Arc<LobbyRuntime>,
    host: &str,
    port: u16,
) -> anyhow::Result<WsGatewayHandle> {
    let bind_addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind WS gateway to '{bind_addr}'"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve WS gateway local address")?;

    let accept_task = tokio::spawn(accept_loop(listener, runtime));

    Ok(WsGatewayHandle {
        local_addr,
        accept_task: Arc::new(accept_task),
    })
}

async fn accept_loop(listener: TcpListener, runtime: Arc<LobbyRuntime>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("WS accept failed: {err}");
                continue;
            }
        };

        let runtime_clone = runtime.clone();
        tokio::spawn(async move {
            log::info!("WS client connected from {peer}");
            if let Err(err) = handle_connection(stream, runtime_clone).await {
                log::debug!("WS connection from {peer} ended: {err}");
            }
            log::info!("WS client disconnected from {peer}");
        });
    }
}

async fn handle_connection(stream: TcpStream, runtime: Arc<LobbyRuntime>) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_hdr_async(stream, check_request)
        .await
        .context("WS handshake failed")?;

    drive_connection(ws, runtime).await
}

fn check_request(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    match request.uri().path() {
        "/ws" | "/websocket" => Ok(response),
        other => {
            log::debug!("rejecting WS upgrade for unknown path '{other}'");
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    }
}

/// Buffered frames awaiting a bridge, with the two-tier overflow policy:
/// undecodable frames trip the smaller limits with a protocol close, any
/// frame can trip the capacity limits.
struct PendingBuffer {
    frames: Vec<Vec<u8>>,
    bytes: usize,
    unknown: usize,
    unknown_bytes: usize,
}

impl PendingBuffer {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            bytes: 0,
            unknown: 0,
            unknown_bytes: 0,
        }
    }

    fn push(&mut self, frame: Vec<u8>, known: bool) -> Option<(u16, &'static str)> {
        self.bytes += frame.len();
        if !known {
            self.unknown += 1;
            self.unknown_bytes += frame.len();
        }
        self.frames.push(frame);

        if !known
            && (self.unknown > MAX_PENDING_UNKNOWN_MESSAGES
                || self.unknown_bytes > MAX_PENDING_UNKNOWN_BYTES)
        {
            return Some((close::PROTOCOL, "invalid packet"));
        }
        if self.frames.len() > MAX_PENDING_MESSAGES || self.bytes > MAX_PENDING_BYTES {
            return Some((close::CAPACITY, "pending overflow"));
        }
        None
    }
}

async fn drive_connection(
    ws: WebSocketStream<TcpStream>,
    runtime: Arc<LobbyRuntime>,
) -> anyhow::Result<()> {
    let (mut sink, mut stream) = ws.split();

    // Unsolicited greeting before anything else.
    let server_info = encode_packet(&Packet::ServerInfo {
        version: PROTOCOL_VERSION,
    });
    sink.send(Message::Binary(server_info))
        .await
        .context("failed to send server info")?;

    let mut pending = PendingBuffer::new();
    let mut client_version: Option<u32> = None;
    let mut deadline: Option<Instant> = None;

    // Sniffing: watch lobby traffic until a frame names a room.
    let (room, conn, first_frame, egress_rx) = loop {
        tokio::select! {
            _ = maybe_sleep_until(deadline) => {
                log::debug!("connect timeout while sniffing");
                return close_with(&mut sink, close::INTERNAL, "connect timeout").await;
            }
            message = stream.next() => {
                let frame = match message {
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err).context("WS read failed"),
                };

                if deadline.is_none() {
                    deadline = Some(Instant::now() + CONNECT_TIMEOUT);
                }

                let Some(action) = sniff_lobby_action(&frame) else {
                    if let Some((code, reason)) = pending.push(frame, false) {
                        log::warn!("closing with {code}: {reason}");
                        return close_with(&mut sink, code, reason).await;
                    }
                    continue;
                };

                if let Some(version) = action.client_version {
                    client_version = Some(version);
                }

                if let Some(target) = action.room_target() {
                    let room = runtime.room(&target.name);
                    let conn = runtime.next_conn_id();
                    let (egress_tx, egress_rx) = mpsc::channel(EGRESS_BUFFER);
                    if room.attach(conn, egress_tx).await.is_err() {
                        log::warn!("bridge to room '{}' failed", target.name);
                        return close_with(&mut sink, close::INTERNAL, "bridge failed").await;
                    }
                    log::debug!(
                        "bridging {conn} to room '{}' (client version {client_version:?})",
                        target.name
                    );
                    break (room, conn, frame, egress_rx);
                }

                if action.wants_game_list {
                    let list = match runtime.directory().list_frame().await {
                        Ok(list) => list,
                        Err(err) => {
                            log::error!("directory query failed: {err}");
                            return close_with(&mut sink, close::INTERNAL, "directory unavailable")
                                .await;
                        }
                    };
                    sink.send(Message::Binary(list))
                        .await
                        .context("failed to send game list")?;
                    continue;
                }

                // Anything else that decoded buffers until the bridge is up.
                // That includes bare ClientInfo frames: the room re-reads the
                // version from the drained bytes.
                if let Some((code, reason)) = pending.push(frame, true) {
                    log::warn!("closing with {code}: {reason}");
                    return close_with(&mut sink, code, reason).await;
                }
            }
        }
    };

    // Drain buffered frames in arrival order, then the frame that triggered
    // the bridge.
    for frame in pending.frames.drain(..) {
        if room.frame(conn, frame).await.is_err() {
            return close_with(&mut sink, close::INTERNAL, "room unavailable").await;
        }
    }
    if room.frame(conn, first_frame).await.is_err() {
        return close_with(&mut sink, close::INTERNAL, "room unavailable").await;
    }

    relay(&mut sink, &mut stream, &room, conn, egress_rx).await
}

/// Bridged: a pure byte conduit between the client socket and the room.
async fn relay(
    sink: &mut WsSink,
    stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    room: &RoomHandle,
    conn: ConnId,
    mut egress_rx: mpsc::Receiver<RoomEgress>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            egress = egress_rx.recv() => match egress {
                Some(RoomEgress::Frame(frame)) => {
                    if sink.send(Message::Binary(frame)).await.is_err() {
                        let _ = room.detach(conn, true).await;
                        return Ok(());
                    }
                }
                Some(RoomEgress::Close { code, reason }) => {
                    let _ = close_with(sink, code, reason).await;
                    let _ = room.detach(conn, false).await;
                    return Ok(());
                }
                None => {
                    let _ = close_with(sink, close::INTERNAL, "room unavailable").await;
                    return Ok(());
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => {
                    if room.frame(conn, bytes).await.is_err() {
                        return close_with(sink, close::INTERNAL, "room unavailable").await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = room.detach(conn, false).await;
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = room.detach(conn, true).await;
                    return Err(err).context("WS read failed");
                }
            },
        }
    }
}

async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

async fn close_with(sink: &mut WsSink, code: u16, reason: &'static str) -> anyhow::Result<()> {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    };
    // The peer may already be gone; nothing to do about it here.
    let _ = sink.send(Message::Close(Some(frame))).await;
    Ok(())
}
