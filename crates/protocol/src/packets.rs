//! Packet envelope and message union.
//!
//! Every frame on the wire is one [`Packet`]: the sender id followed by a
//! tagged message body. The schema is shared with the game client, which is
//! why the payload structs here carry plain scalars rather than server-side
//! world objects.

use crate::{BinaryReader, BinaryWriter, ProtocolError};
use bytes::Bytes;

/// Message tags. One per [`Msg`] variant.
mod tag {
    pub const ID: u8 = 0x01;
    pub const CHAT: u8 = 0x02;
    pub const PLAYER: u8 = 0x03;
    pub const PLAYER_DIRECTION: u8 = 0x04;
    pub const SPORE: u8 = 0x05;
    pub const SPORE_BATCH: u8 = 0x06;
    pub const SPORE_CONSUMED: u8 = 0x07;
    pub const PLAYER_CONSUMED: u8 = 0x08;
    pub const DISCONNECT: u8 = 0x09;
    pub const GAME_BOUNDS: u8 = 0x0A;
    pub const LOGIN_REQUEST: u8 = 0x0B;
    pub const REGISTER_REQUEST: u8 = 0x0C;
    pub const DENY: u8 = 0x0D;
}

/// Snapshot of a player's public state at emission time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
    /// 24-bit RGB color.
    pub color: u32,
}

/// A spore as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SporeInfo {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Arena rectangle sent once on spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Login / register credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The message union carried by every packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// The id the server assigned to this connection.
    Id(u64),
    Chat(String),
    Player(PlayerInfo),
    /// Requested movement direction in radians.
    PlayerDirection(f64),
    Spore(SporeInfo),
    SporeBatch(Vec<SporeInfo>),
    /// Claim that the sender ate the given spore.
    SporeConsumed(u64),
    /// Claim that the sender ate the given player.
    PlayerConsumed(u64),
    Disconnect(String),
    GameBounds(GameBounds),
    LoginRequest(Credentials),
    RegisterRequest(Credentials),
    /// Auth rejection with a human-readable reason.
    Deny(String),
}

impl Msg {
    /// Short variant name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Msg::Id(_) => "Id",
            Msg::Chat(_) => "Chat",
            Msg::Player(_) => "Player",
            Msg::PlayerDirection(_) => "PlayerDirection",
            Msg::Spore(_) => "Spore",
            Msg::SporeBatch(_) => "SporeBatch",
            Msg::SporeConsumed(_) => "SporeConsumed",
            Msg::PlayerConsumed(_) => "PlayerConsumed",
            Msg::Disconnect(_) => "Disconnect",
            Msg::GameBounds(_) => "GameBounds",
            Msg::LoginRequest(_) => "LoginRequest",
            Msg::RegisterRequest(_) => "RegisterRequest",
            Msg::Deny(_) => "Deny",
        }
    }
}

/// One wire frame: sender id plus message.
///
/// A `sender_id` of zero means "the connection itself"; the server rewrites
/// it to the receiving client's id before dispatch, so clients may omit
/// their own id.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sender_id: u64,
    pub msg: Msg,
}

impl Packet {
    pub fn new(sender_id: u64, msg: Msg) -> Self {
        Self { sender_id, msg }
    }

    /// Serialize the packet into a frame body.
    ///
    /// The transport-level trailing `\n` is appended by the write pump, not
    /// here.
    pub fn encode(&self) -> Bytes {
        let mut w = BinaryWriter::new();
        w.put_u64(self.sender_id);
        match &self.msg {
            Msg::Id(id) => {
                w.put_u8(tag::ID);
                w.put_u64(*id);
            }
            Msg::Chat(text) => {
                w.put_u8(tag::CHAT);
                w.put_string(text);
            }
            Msg::Player(p) => {
                w.put_u8(tag::PLAYER);
                put_player(&mut w, p);
            }
            Msg::PlayerDirection(direction) => {
                w.put_u8(tag::PLAYER_DIRECTION);
                w.put_f64(*direction);
            }
            Msg::Spore(s) => {
                w.put_u8(tag::SPORE);
                put_spore(&mut w, s);
            }
            Msg::SporeBatch(spores) => {
                w.put_u8(tag::SPORE_BATCH);
                let len = spores.len().min(u16::MAX as usize);
                w.put_u16(len as u16);
                for s in &spores[..len] {
                    put_spore(&mut w, s);
                }
            }
            Msg::SporeConsumed(spore_id) => {
                w.put_u8(tag::SPORE_CONSUMED);
                w.put_u64(*spore_id);
            }
            Msg::PlayerConsumed(player_id) => {
                w.put_u8(tag::PLAYER_CONSUMED);
                w.put_u64(*player_id);
            }
            Msg::Disconnect(reason) => {
                w.put_u8(tag::DISCONNECT);
                w.put_string(reason);
            }
            Msg::GameBounds(b) => {
                w.put_u8(tag::GAME_BOUNDS);
                w.put_f64(b.min_x);
                w.put_f64(b.max_x);
                w.put_f64(b.min_y);
                w.put_f64(b.max_y);
            }
            Msg::LoginRequest(c) => {
                w.put_u8(tag::LOGIN_REQUEST);
                put_credentials(&mut w, c);
            }
            Msg::RegisterRequest(c) => {
                w.put_u8(tag::REGISTER_REQUEST);
                put_credentials(&mut w, c);
            }
            Msg::Deny(reason) => {
                w.put_u8(tag::DENY);
                w.put_string(reason);
            }
        }
        w.finish()
    }

    /// Parse a frame body. Trailing bytes after the message (such as the
    /// transport's `\n` convenience byte) are ignored.
    pub fn decode(data: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let mut r = BinaryReader::new(data);
        let sender_id = r.get_u64()?;
        let msg = match r.get_u8()? {
            tag::ID => Msg::Id(r.get_u64()?),
            tag::CHAT => Msg::Chat(r.get_string()?),
            tag::PLAYER => Msg::Player(get_player(&mut r)?),
            tag::PLAYER_DIRECTION => Msg::PlayerDirection(r.get_f64()?),
            tag::SPORE => Msg::Spore(get_spore(&mut r)?),
            tag::SPORE_BATCH => {
                let len = r.get_u16()? as usize;
                let mut spores = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    spores.push(get_spore(&mut r)?);
                }
                Msg::SporeBatch(spores)
            }
            tag::SPORE_CONSUMED => Msg::SporeConsumed(r.get_u64()?),
            tag::PLAYER_CONSUMED => Msg::PlayerConsumed(r.get_u64()?),
            tag::DISCONNECT => Msg::Disconnect(r.get_string()?),
            tag::GAME_BOUNDS => Msg::GameBounds(GameBounds {
                min_x: r.get_f64()?,
                max_x: r.get_f64()?,
                min_y: r.get_f64()?,
                max_y: r.get_f64()?,
            }),
            tag::LOGIN_REQUEST => Msg::LoginRequest(get_credentials(&mut r)?),
            tag::REGISTER_REQUEST => Msg::RegisterRequest(get_credentials(&mut r)?),
            tag::DENY => Msg::Deny(r.get_string()?),
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(Self { sender_id, msg })
    }
}

fn put_player(w: &mut BinaryWriter, p: &PlayerInfo) {
    w.put_u64(p.id);
    w.put_string(&p.name);
    w.put_f64(p.x);
    w.put_f64(p.y);
    w.put_f64(p.radius);
    w.put_f64(p.direction);
    w.put_f64(p.speed);
    w.put_u32(p.color);
}

fn get_player(r: &mut BinaryReader) -> Result<PlayerInfo, ProtocolError> {
    Ok(PlayerInfo {
        id: r.get_u64()?,
        name: r.get_string()?,
        x: r.get_f64()?,
        y: r.get_f64()?,
        radius: r.get_f64()?,
        direction: r.get_f64()?,
        speed: r.get_f64()?,
        color: r.get_u32()?,
    })
}

fn put_spore(w: &mut BinaryWriter, s: &SporeInfo) {
    w.put_u64(s.id);
    w.put_f64(s.x);
    w.put_f64(s.y);
    w.put_f64(s.radius);
}

fn get_spore(r: &mut BinaryReader) -> Result<SporeInfo, ProtocolError> {
    Ok(SporeInfo {
        id: r.get_u64()?,
        x: r.get_f64()?,
        y: r.get_f64()?,
        radius: r.get_f64()?,
    })
}

fn put_credentials(w: &mut BinaryWriter, c: &Credentials) {
    w.put_string(&c.username);
    w.put_string(&c.password);
}

fn get_credentials(r: &mut BinaryReader) -> Result<Credentials, ProtocolError> {
    Ok(Credentials {
        username: r.get_string()?,
        password: r.get_string()?,
    })
}
