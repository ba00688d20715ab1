use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::{decode_frame, encode_batch, encode_packet, GameEntry, Packet};
use server::config::ServerConfig;
use server::runtime::directory::DirectoryUpsert;
use server::runtime::{start_ws_gateway, LobbyRuntime, WsGatewayHandle};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_gateway() -> (Arc<LobbyRuntime>, WsGatewayHandle) {
    let runtime = Arc::new(LobbyRuntime::bootstrap(ServerConfig::default()));
    let gateway = start_ws_gateway(runtime.clone(), "127.0.0.1", 0)
        .await
        .expect("gateway must start");
    (runtime, gateway)
}

async fn connect(gateway: &WsGatewayHandle) -> WsClient {
    let url = format!("ws://{}/ws", gateway.local_addr());
    let (ws, _) = connect_async(&url).await.expect("connect must succeed");
    ws
}

async fn read_binary(ws: &mut WsClient) -> Vec<u8> {
    loop {
        let message = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("connection errored");
        match message {
            Message::Binary(bytes) => return bytes,
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

async fn read_close_code(ws: &mut WsClient) -> u16 {
    loop {
        let message = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for the close");
        match message {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    }
}

/// Consumes the unsolicited ServerInfo greeting.
async fn skip_greeting(ws: &mut WsClient) {
    let greeting = read_binary(ws).await;
    assert_eq!(greeting[0], protocol::code::SERVER_INFO);
}

fn create_frame(cookie: u32, name: &str) -> Vec<u8> {
    encode_batch(&[
        Packet::ClientInfo { version: 7 },
        Packet::CreateGame {
            cookie,
            name: name.to_string(),
            password: String::new(),
            difficulty: 2,
        },
    ])
}

fn join_frame(cookie: u32, name: &str) -> Vec<u8> {
    encode_batch(&[
        Packet::ClientInfo { version: 7 },
        Packet::JoinGame {
            cookie,
            name: name.to_string(),
            password: String::new(),
        },
    ])
}

#[tokio::test]
async fn handshake_sends_server_info_first() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;

    let greeting = read_binary(&mut ws).await;
    assert_eq!(greeting, vec![0x32, 0x01, 0x00, 0x00, 0x00]);

    gateway.close();
}

#[tokio::test]
async fn game_list_request_is_answered_from_the_directory() {
    let (runtime, gateway) = start_gateway().await;
    runtime
        .directory()
        .upsert(DirectoryUpsert {
            name: "room1".to_string(),
            game_type: 0,
            slots_used: 1,
            slots_total: 4,
        })
        .await
        .unwrap();

    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    ws.send(Message::Binary(encode_packet(&Packet::ClientInfo {
        version: 7,
    })))
    .await
    .unwrap();
    ws.send(Message::Binary(encode_packet(&Packet::GameListRequest)))
        .await
        .unwrap();

    let list = read_binary(&mut ws).await;
    assert_eq!(
        list,
        encode_packet(&Packet::GameList {
            entries: vec![GameEntry {
                game_type: 0,
                name: "room1".to_string(),
            }],
        })
    );

    gateway.close();
}

#[tokio::test]
async fn create_bridges_to_a_room_and_publishes_it() {
    let (runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    ws.send(Message::Binary(create_frame(0x0102_0304, "room1")))
        .await
        .unwrap();

    let accept = decode_frame(&read_binary(&mut ws).await).unwrap();
    match accept.as_slice() {
        [Packet::JoinAccept { cookie, index, .. }] => {
            assert_eq!(*cookie, 0x0102_0304);
            assert_eq!(*index, 0);
        }
        other => panic!("expected JoinAccept, got {other:?}"),
    }
    assert_eq!(
        decode_frame(&read_binary(&mut ws).await).unwrap(),
        vec![Packet::Connect { id: 0 }]
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let entries = runtime.directory().snapshot().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "room1");
    assert_eq!(entries[0].slots_used, 1);

    gateway.close();
}

#[tokio::test]
async fn second_client_joins_through_its_own_bridge() {
    let (_runtime, gateway) = start_gateway().await;

    let mut host = connect(&gateway).await;
    skip_greeting(&mut host).await;
    host.send(Message::Binary(create_frame(1, "room1")))
        .await
        .unwrap();
    read_binary(&mut host).await; // JoinAccept
    read_binary(&mut host).await; // Connect{0}

    let mut guest = connect(&gateway).await;
    skip_greeting(&mut guest).await;
    guest
        .send(Message::Binary(join_frame(0x0A, "room1")))
        .await
        .unwrap();

    match decode_frame(&read_binary(&mut guest).await).unwrap().as_slice() {
        [Packet::JoinAccept { cookie, index, .. }] => {
            assert_eq!(*cookie, 0x0A);
            assert_eq!(*index, 1);
        }
        other => panic!("expected JoinAccept, got {other:?}"),
    }
    assert_eq!(
        decode_frame(&read_binary(&mut guest).await).unwrap(),
        vec![Packet::Connect { id: 1 }]
    );
    assert_eq!(
        decode_frame(&read_binary(&mut host).await).unwrap(),
        vec![Packet::Connect { id: 1 }]
    );

    gateway.close();
}

#[tokio::test]
async fn buffered_frames_reach_the_room_before_the_bridge_frame() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    // Decodable, no lobby intent: buffered until the bridge is up, then
    // drained ahead of the create. The room ignores a pre-join turn.
    ws.send(Message::Binary(encode_packet(&Packet::Turn { turn: 5 })))
        .await
        .unwrap();
    ws.send(Message::Binary(create_frame(1, "room1")))
        .await
        .unwrap();

    let accept = decode_frame(&read_binary(&mut ws).await).unwrap();
    assert!(matches!(accept.as_slice(), [Packet::JoinAccept { .. }]));

    gateway.close();
}

#[tokio::test]
async fn client_info_sent_in_its_own_frame_still_reaches_the_room() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    ws.send(Message::Binary(encode_packet(&Packet::ClientInfo {
        version: 7,
    })))
    .await
    .unwrap();
    ws.send(Message::Binary(encode_packet(&Packet::CreateGame {
        cookie: 3,
        name: "room1".to_string(),
        password: String::new(),
        difficulty: 0,
    })))
    .await
    .unwrap();

    let accept = decode_frame(&read_binary(&mut ws).await).unwrap();
    assert!(
        matches!(accept.as_slice(), [Packet::JoinAccept { index: 0, .. }]),
        "buffered ClientInfo must precede the create in the room: {accept:?}"
    );

    gateway.close();
}

#[tokio::test]
async fn undecodable_frame_overflow_is_a_protocol_close() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    for _ in 0..33 {
        ws.send(Message::Binary(vec![0xFF, 0x01])).await.unwrap();
    }

    assert_eq!(read_close_code(&mut ws).await, 1002);

    gateway.close();
}

#[tokio::test]
async fn known_frame_overflow_is_a_capacity_close() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    let frame = encode_packet(&Packet::Turn { turn: 1 });
    for _ in 0..257 {
        ws.send(Message::Binary(frame.clone())).await.unwrap();
    }

    assert_eq!(read_close_code(&mut ws).await, 1009);

    gateway.close();
}

#[tokio::test]
async fn unknown_paths_fail_the_upgrade() {
    let (_runtime, gateway) = start_gateway().await;

    let url = format!("ws://{}/nope", gateway.local_addr());
    assert!(connect_async(&url).await.is_err());

    let url = format!("ws://{}/websocket", gateway.local_addr());
    assert!(connect_async(&url).await.is_ok());

    gateway.close();
}

#[tokio::test]
async fn text_frames_are_ignored() {
    let (_runtime, gateway) = start_gateway().await;
    let mut ws = connect(&gateway).await;
    skip_greeting(&mut ws).await;

    ws.send(Message::Text("hello?".to_string())).await.unwrap();
    ws.send(Message::Binary(encode_packet(&Packet::GameListRequest)))
        .await
        .unwrap();

    let list = read_binary(&mut ws).await;
    assert_eq!(list, encode_packet(&Packet::GameList { entries: vec![] }));

    gateway.close();
}

#[tokio::test]
async fn host_hangup_propagates_to_the_guest() {
    let (_runtime, gateway) = start_gateway().await;

    let mut host = connect(&gateway).await;
    skip_greeting(&mut host).await;
    host.send(Message::Binary(create_frame(1, "room1")))
        .await
        .unwrap();
    read_binary(&mut host).await;
    read_binary(&mut host).await;

    let mut guest = connect(&gateway).await;
    skip_greeting(&mut guest).await;
    guest
        .send(Message::Binary(join_frame(2, "room1")))
        .await
        .unwrap();
    read_binary(&mut guest).await; // JoinAccept
    read_binary(&mut guest).await; // Connect{1}

    host.close(None).await.unwrap();

    assert_eq!(
        decode_frame(&read_binary(&mut guest).await).unwrap(),
        vec![Packet::Disconnect { id: 0, reason: 3 }]
    );
    assert_eq!(
        decode_frame(&read_binary(&mut guest).await).unwrap(),
        vec![Packet::Disconnect { id: 1, reason: 3 }]
    );
    assert_eq!(read_close_code(&mut guest).await, 1000);

    gateway.close();
}
