//! Binary frame codec for lobby packets.
//!
//! Every field is little-endian. Strings on the wire are a `u8` length
//! followed by raw 8-bit characters; no UTF-8 validation is performed, so
//! bytes are mapped to `char` one-to-one (Latin-1) and back. Variable
//! payloads use a `u32` length prefix.

use crate::packets::{code, GameEntry, Packet};

/// Upper bound on a single frame, enforced at the room entry point.
pub const MAX_FRAME_BYTES: usize = 14 * 1024 * 1024;

/// Maximum `Batch` nesting depth accepted by the decoder.
pub const MAX_BATCH_DEPTH: usize = 8;

/// Errors produced while decoding a frame. Any error fails the whole frame.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame is empty")]
    EmptyFrame,

    #[error("unknown packet code {code:#04x} at offset {offset}")]
    UnknownCode { code: u8, offset: usize },

    #[error("frame truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },

    #[error("batch nesting exceeds the depth limit")]
    BatchTooDeep,
}

/// Bounds-checked cursor over one frame. Never reads past the input and
/// never allocates beyond what the decoded packets own.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len - remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_short_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    fn read_long_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Decodes one top-level packet from `bytes`, flattening batches into a
/// flat sequence. Bytes past the top-level packet are ignored.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<Packet>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyFrame);
    }

    let mut reader = FrameReader::new(bytes);
    let mut packets = Vec::new();
    decode_packet(&mut reader, 0, &mut packets)?;
    Ok(packets)
}

fn decode_packet(
    reader: &mut FrameReader<'_>,
    depth: usize,
    out: &mut Vec<Packet>,
) -> Result<(), CodecError> {
    let offset = reader.pos;
    let code_byte = reader.read_u8()?;

    match code_byte {
        code::BATCH => {
            if depth >= MAX_BATCH_DEPTH {
                return Err(CodecError::BatchTooDeep);
            }
            let count = reader.read_u16()?;
            for _ in 0..count {
                decode_packet(reader, depth + 1, out)?;
            }
        }
        code::MESSAGE => {
            let id = reader.read_u8()?;
            let payload = reader.read_long_bytes()?;
            out.push(Packet::Message { id, payload });
        }
        code::TURN => {
            let turn = reader.read_u32()?;
            out.push(Packet::Turn { turn });
        }
        code::DROP_PLAYER => {
            let id = reader.read_u8()?;
            let reason = reader.read_u32()?;
            out.push(Packet::DropPlayer { id, reason });
        }
        code::JOIN_ACCEPT => {
            let cookie = reader.read_u32()?;
            let index = reader.read_u8()?;
            let seed = reader.read_u32()?;
            let difficulty = reader.read_u32()?;
            out.push(Packet::JoinAccept {
                cookie,
                index,
                seed,
                difficulty,
            });
        }
        code::CONNECT => {
            let id = reader.read_u8()?;
            out.push(Packet::Connect { id });
        }
        code::DISCONNECT => {
            let id = reader.read_u8()?;
            let reason = reader.read_u32()?;
            out.push(Packet::Disconnect { id, reason });
        }
        code::JOIN_REJECT => {
            let cookie = reader.read_u32()?;
            let reason = reader.read_u8()?;
            out.push(Packet::JoinReject { cookie, reason });
        }
        code::GAME_LIST => {
            out.push(Packet::GameListRequest);
        }
        code::CREATE_GAME => {
            let cookie = reader.read_u32()?;
            let name = reader.read_short_string()?;
            let password = reader.read_short_string()?;
            let difficulty = reader.read_u32()?;
            out.push(Packet::CreateGame {
                cookie,
                name,
                password,
                difficulty,
            });
        }
        code::JOIN_GAME => {
            let cookie = reader.read_u32()?;
            let name = reader.read_short_string()?;
            let password = reader.read_short_string()?;
            out.push(Packet::JoinGame {
                cookie,
                name,
                password,
            });
        }
        code::LEAVE_GAME => {
            out.push(Packet::LeaveGame);
        }
        code::CLIENT_INFO => {
            let version = reader.read_u32()?;
            out.push(Packet::ClientInfo { version });
        }
        code::SERVER_INFO => {
            let version = reader.read_u32()?;
            out.push(Packet::ServerInfo { version });
        }
        other => {
            return Err(CodecError::UnknownCode {
                code: other,
                offset,
            });
        }
    }

    Ok(())
}

/// Encodes one packet into a standalone frame.
#[must_use]
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::new();
    write_packet(packet, &mut out);
    out
}

/// Encodes a flat sequence of packets as a single `Batch` frame.
#[must_use]
pub fn encode_batch(packets: &[Packet]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(code::BATCH);
    out.extend_from_slice(&(packets.len() as u16).to_le_bytes());
    for packet in packets {
        write_packet(packet, &mut out);
    }
    out
}

fn write_packet(packet: &Packet, out: &mut Vec<u8>) {
    out.push(packet.code());

    match packet {
        Packet::Batch(items) => {
            out.extend_from_slice(&(items.len() as u16).to_le_bytes());
            for item in items {
                write_packet(item, out);
            }
        }
        Packet::Message { id, payload } => {
            out.push(*id);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        }
        Packet::Turn { turn } => {
            out.extend_from_slice(&turn.to_le_bytes());
        }
        Packet::TurnBroadcast { id, turn } => {
            out.push(*id);
            out.extend_from_slice(&turn.to_le_bytes());
        }
        Packet::DropPlayer { id, reason } => {
            out.push(*id);
            out.extend_from_slice(&reason.to_le_bytes());
        }
        Packet::JoinAccept {
            cookie,
            index,
            seed,
            difficulty,
        } => {
            out.extend_from_slice(&cookie.to_le_bytes());
            out.push(*index);
            out.extend_from_slice(&seed.to_le_bytes());
            out.extend_from_slice(&difficulty.to_le_bytes());
        }
        Packet::Connect { id } => {
            out.push(*id);
        }
        Packet::Disconnect { id, reason } => {
            out.push(*id);
            out.extend_from_slice(&reason.to_le_bytes());
        }
        Packet::JoinReject { cookie, reason } => {
            out.extend_from_slice(&cookie.to_le_bytes());
            out.push(*reason);
        }
        Packet::GameListRequest => {}
        Packet::GameList { entries } => {
            out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for entry in entries {
                out.extend_from_slice(&entry.game_type.to_le_bytes());
                write_short_string(&entry.name, out);
            }
        }
        Packet::CreateGame {
            cookie,
            name,
            password,
            difficulty,
        } => {
            out.extend_from_slice(&cookie.to_le_bytes());
            write_short_string(name, out);
            write_short_string(password, out);
            out.extend_from_slice(&difficulty.to_le_bytes());
        }
        Packet::JoinGame {
            cookie,
            name,
            password,
        } => {
            out.extend_from_slice(&cookie.to_le_bytes());
            write_short_string(name, out);
            write_short_string(password, out);
        }
        Packet::LeaveGame => {}
        Packet::ClientInfo { version } | Packet::ServerInfo { version } => {
            out.extend_from_slice(&version.to_le_bytes());
        }
    }
}

fn write_short_string(value: &str, out: &mut Vec<u8>) {
    let bytes: Vec<u8> = value.chars().take(255).map(|c| c as u32 as u8).collect();
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_fails() {
        assert_eq!(decode_frame(&[]), Err(CodecError::EmptyFrame));
    }

    #[test]
    fn unknown_code_fails_the_frame() {
        assert_eq!(
            decode_frame(&[0x7F]),
            Err(CodecError::UnknownCode {
                code: 0x7F,
                offset: 0
            })
        );
    }

    #[test]
    fn short_read_fails_the_frame() {
        // ClientInfo needs four version bytes; give it two.
        assert_eq!(
            decode_frame(&[code::CLIENT_INFO, 0x01, 0x00]),
            Err(CodecError::Truncated {
                offset: 1,
                needed: 2
            })
        );
    }

    #[test]
    fn batch_deeper_than_the_cap_fails() {
        let mut packet = Packet::LeaveGame;
        for _ in 0..(MAX_BATCH_DEPTH + 1) {
            packet = Packet::Batch(vec![packet]);
        }
        assert_eq!(decode_frame(&encode_packet(&packet)), Err(CodecError::BatchTooDeep));
    }

    #[test]
    fn batch_at_the_cap_decodes() {
        let mut packet = Packet::LeaveGame;
        for _ in 0..MAX_BATCH_DEPTH {
            packet = Packet::Batch(vec![packet]);
        }
        assert_eq!(
            decode_frame(&encode_packet(&packet)).unwrap(),
            vec![Packet::LeaveGame]
        );
    }

    #[test]
    fn server_info_layout_is_stable() {
        let frame = encode_packet(&Packet::ServerInfo { version: 1 });
        assert_eq!(frame, vec![0x32, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn short_strings_round_trip_arbitrary_bytes() {
        let name: String = [0x00u8, 0x7F, 0x80, 0xFF].iter().map(|&b| b as char).collect();
        let frame = encode_packet(&Packet::JoinGame {
            cookie: 9,
            name: name.clone(),
            password: String::new(),
        });
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(
            decoded,
            vec![Packet::JoinGame {
                cookie: 9,
                name,
                password: String::new(),
            }]
        );
    }
}
