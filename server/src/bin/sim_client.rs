//! Simulation client for the lobby relay: performs the handshake, lists
//! games, then creates or joins a room and prints everything the server
//! sends until the watch window ends.

use std::time::Duration;

use anyhow::{bail, Context};
use futures_util::{SinkExt, StreamExt};
use protocol::{decode_frame, encode_batch, encode_packet, Packet};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
struct SimConfig {
    url: String,
    name: String,
    password: String,
    join: bool,
    difficulty: u32,
    version: u32,
    cookie: u32,
    watch_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090/ws".to_string(),
            name: "room1".to_string(),
            password: String::new(),
            join: false,
            difficulty: 0,
            version: 1,
            cookie: 0xC0FFEE,
            watch_ms: 5_000,
        }
    }
}

fn parse_args() -> anyhow::Result<SimConfig> {
    let mut cfg = SimConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("missing value for {flag}"))
        };
        match arg.as_str() {
            "--url" => cfg.url = value("--url")?,
            "--name" => cfg.name = value("--name")?,
            "--password" => cfg.password = value("--password")?,
            "--join" => cfg.join = true,
            "--difficulty" => cfg.difficulty = value("--difficulty")?.parse()?,
            "--version" => cfg.version = value("--version")?.parse()?,
            "--cookie" => cfg.cookie = value("--cookie")?.parse()?,
            "--watch-ms" => cfg.watch_ms = value("--watch-ms")?.parse()?,
            other => bail!("unknown argument '{other}'"),
        }
    }

    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = parse_args()?;

    println!("[sim-client] connecting to {}", cfg.url);
    let (mut ws, _) = tokio_tungstenite::connect_async(&cfg.url)
        .await
        .context("failed to connect to the gateway")?;

    let greeting = read_binary(&mut ws).await?;
    match decode_frame(&greeting).ok().as_deref() {
        Some([Packet::ServerInfo { version }]) => {
            println!("[sim-client] server info: version {version}");
        }
        other => bail!("unexpected greeting: {other:?}"),
    }

    ws.send(Message::Binary(encode_packet(&Packet::ClientInfo {
        version: cfg.version,
    })))
    .await?;
    ws.send(Message::Binary(encode_packet(&Packet::GameListRequest)))
        .await?;

    let list = read_binary(&mut ws).await?;
    // GameList responses start with the code and a u16 entry count.
    if list.len() >= 3 && list[0] == protocol::code::GAME_LIST {
        let count = u16::from_le_bytes([list[1], list[2]]);
        println!("[sim-client] {count} active game(s)");
    } else {
        bail!("unexpected game list reply ({} bytes)", list.len());
    }

    let action = if cfg.join {
        println!("[sim-client] joining '{}'", cfg.name);
        Packet::JoinGame {
            cookie: cfg.cookie,
            name: cfg.name.clone(),
            password: cfg.password.clone(),
        }
    } else {
        println!("[sim-client] creating '{}'", cfg.name);
        Packet::CreateGame {
            cookie: cfg.cookie,
            name: cfg.name.clone(),
            password: cfg.password.clone(),
            difficulty: cfg.difficulty,
        }
    };
    let frame = encode_batch(&[
        Packet::ClientInfo {
            version: cfg.version,
        },
        action,
    ]);
    ws.send(Message::Binary(frame)).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(cfg.watch_ms);
    loop {
        let message = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                println!("[sim-client] watch window over, closing");
                ws.close(None).await.ok();
                break;
            }
            message = ws.next() => message,
        };

        match message {
            Some(Ok(Message::Binary(bytes))) => match decode_frame(&bytes) {
                Ok(packets) => {
                    for packet in packets {
                        println!("[sim-client] <- {packet:?}");
                    }
                }
                Err(err) => println!("[sim-client] <- undecodable frame: {err}"),
            },
            Some(Ok(Message::Close(frame))) => {
                println!("[sim-client] closed by server: {frame:?}");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => bail!("connection error: {err}"),
            None => break,
        }
    }

    println!("[sim-client] done");
    Ok(())
}

async fn read_binary(ws: &mut WsClient) -> anyhow::Result<Vec<u8>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(bytes))) => return Ok(bytes),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err).context("WS read failed"),
            None => bail!("connection closed"),
        }
    }
}
