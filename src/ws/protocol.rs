//! Binary wire protocol for client-server communication
//!
//! Every packet starts with an 8 byte big-endian header followed by the payload:
//!
//! ```text
//! | u16 total length | u16 packet type | u32 sequence | payload (length - 8) |
//! ```
//!
//! Multi-field payloads are packed in declaration order with no padding and
//! floats travel as big-endian IEEE-754.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Size of the fixed packet header
pub const HEADER_LEN: usize = 8;
/// Largest packet the u16 length field can describe
pub const MAX_PACKET_LEN: usize = u16::MAX as usize;
/// Largest payload that still fits in a packet
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

/// Known packet types and their numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Ping,
    Pong,
    Auth,
    AuthResponse,
    Move,
    /// Position broadcast for another player in the same zone
    PlayerState,
    /// Sent to a player whose zone just changed
    ZoneChanged,
    Attack,
    SkillAction,
    ItemUse,
    NpcInteract,
    /// Effect produced by a gameplay rule
    GameplayEvent,
    ChatMessage,
    ChatBroadcast,
}

impl PacketType {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ping => 0x0001,
            Self::Pong => 0x0002,
            Self::Auth => 0x0010,
            Self::AuthResponse => 0x0011,
            Self::Move => 0x0020,
            Self::PlayerState => 0x0021,
            Self::ZoneChanged => 0x0022,
            Self::Attack => 0x0030,
            Self::SkillAction => 0x0031,
            Self::ItemUse => 0x0032,
            Self::NpcInteract => 0x0033,
            Self::GameplayEvent => 0x0034,
            Self::ChatMessage => 0x0040,
            Self::ChatBroadcast => 0x0041,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let kind = match code {
            0x0001 => Self::Ping,
            0x0002 => Self::Pong,
            0x0010 => Self::Auth,
            0x0011 => Self::AuthResponse,
            0x0020 => Self::Move,
            0x0021 => Self::PlayerState,
            0x0022 => Self::ZoneChanged,
            0x0030 => Self::Attack,
            0x0031 => Self::SkillAction,
            0x0032 => Self::ItemUse,
            0x0033 => Self::NpcInteract,
            0x0034 => Self::GameplayEvent,
            0x0040 => Self::ChatMessage,
            0x0041 => Self::ChatBroadcast,
            _ => return None,
        };
        Some(kind)
    }
}

impl From<PacketType> for u16 {
    fn from(kind: PacketType) -> Self {
        kind.code()
    }
}

/// One decoded unit of the wire protocol
///
/// The raw type code is kept so packets with codes this server does not know
/// still decode and can be ignored by the router instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub type_code: u16,
    pub sequence: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_code(self.type_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer of {0} bytes is shorter than the 8 byte header")]
    TooShort(usize),

    #[error("declared length {0} is smaller than the header")]
    LengthBelowHeader(u16),

    #[error("declared length {declared} exceeds the {available} bytes received")]
    Truncated { declared: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes does not fit in a single packet")]
    PayloadTooLarge(usize),
}

/// Decode one packet from a received message
///
/// Bytes past the declared length are ignored.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::TooShort(buf.len()));
    }

    let mut header = &buf[..HEADER_LEN];
    let length = header.get_u16();
    let type_code = header.get_u16();
    let sequence = header.get_u32();

    if (length as usize) < HEADER_LEN {
        return Err(DecodeError::LengthBelowHeader(length));
    }
    if length as usize > buf.len() {
        return Err(DecodeError::Truncated {
            declared: length as usize,
            available: buf.len(),
        });
    }

    Ok(Packet {
        type_code,
        sequence,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..length as usize]),
    })
}

/// Encode a packet with a correctly computed length field
pub fn encode(
    type_code: impl Into<u16>,
    sequence: u32,
    payload: &[u8],
) -> Result<Bytes, EncodeError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16((HEADER_LEN + payload.len()) as u16);
    buf.put_u16(type_code.into());
    buf.put_u32(sequence);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

// ============================================================================
// Payload decoding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload needs {needed} bytes but only {remaining} remain")]
    Underflow { needed: usize, remaining: usize },

    #[error("text field is not valid UTF-8")]
    InvalidUtf8,
}

/// Bounds-checked cursor over a packet payload
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, needed: usize) -> Result<(), PayloadError> {
        if self.buf.len() < needed {
            return Err(PayloadError::Underflow {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, PayloadError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, PayloadError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32, PayloadError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64, PayloadError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn f32(&mut self) -> Result<f32, PayloadError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn uuid(&mut self) -> Result<Uuid, PayloadError> {
        let raw = self.bytes(16)?;
        let mut id = [0u8; 16];
        id.copy_from_slice(raw);
        Ok(Uuid::from_bytes(id))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a u16 length-prefixed UTF-8 string
    pub fn string(&mut self) -> Result<&'a str, PayloadError> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| PayloadError::InvalidUtf8)
    }
}

/// Write a u16 length-prefixed string, truncated on a char boundary if needed
pub(crate) fn put_string(buf: &mut BytesMut, text: &str) {
    let mut end = text.len().min(u16::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u16(end as u16);
    buf.put_slice(&text.as_bytes()[..end]);
}

/// 3D world position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

// ============================================================================
// Client -> server payloads
// ============================================================================

/// AUTH: u16 token length, token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub token: String,
}

impl AuthRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            token: reader.string()?.to_string(),
        })
    }

    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.token.len());
        put_string(&mut buf, &self.token);
        buf.freeze()
    }
}

/// MOVE: x, y, z, rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequest {
    pub position: Vec3,
    pub rotation: f32,
}

impl MoveRequest {
    pub const LEN: usize = 16;

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        let position = Vec3::new(reader.f32()?, reader.f32()?, reader.f32()?);
        let rotation = reader.f32()?;
        Ok(Self { position, rotation })
    }

    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_f32(self.position.x);
        buf.put_f32(self.position.y);
        buf.put_f32(self.position.z);
        buf.put_f32(self.rotation);
        buf.freeze()
    }
}

/// CHAT_MESSAGE: u8 channel, u16 length, UTF-8 text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: u8,
    pub text: String,
}

impl ChatMessage {
    /// Rejects a declared length that runs past the end of the payload
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        let channel = reader.u8()?;
        let text = reader.string()?.to_string();
        Ok(Self { channel, text })
    }

    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.text.len());
        buf.put_u8(self.channel);
        put_string(&mut buf, &self.text);
        buf.freeze()
    }
}

/// ATTACK: u32 target id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackRequest {
    pub target_id: u32,
}

impl AttackRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            target_id: reader.u32()?,
        })
    }
}

/// SKILL_ACTION: u16 skill id, u32 target id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillActionRequest {
    pub skill_id: u16,
    pub target_id: u32,
}

impl SkillActionRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            skill_id: reader.u16()?,
            target_id: reader.u32()?,
        })
    }
}

/// ITEM_USE: u16 inventory slot, u32 item id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemUseRequest {
    pub slot: u16,
    pub item_id: u32,
}

impl ItemUseRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            slot: reader.u16()?,
            item_id: reader.u32()?,
        })
    }
}

/// NPC_INTERACT: u32 npc id, u8 action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcInteractRequest {
    pub npc_id: u32,
    pub action: u8,
}

impl NpcInteractRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            npc_id: reader.u32()?,
            action: reader.u8()?,
        })
    }
}

// ============================================================================
// Server -> client payloads
// ============================================================================

/// AUTH_RESPONSE payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    Accepted { character_id: u64, zone_id: u32 },
    Rejected { reason: String },
}

impl AuthResponse {
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::Accepted {
                character_id,
                zone_id,
            } => {
                buf.put_u8(0);
                buf.put_u64(*character_id);
                buf.put_u32(*zone_id);
            }
            Self::Rejected { reason } => {
                buf.put_u8(1);
                put_string(&mut buf, reason);
            }
        }
        buf.freeze()
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        match reader.u8()? {
            0 => Ok(Self::Accepted {
                character_id: reader.u64()?,
                zone_id: reader.u32()?,
            }),
            _ => Ok(Self::Rejected {
                reason: reader.string()?.to_string(),
            }),
        }
    }
}

/// PLAYER_STATE: player id, x, y, z, rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerStateUpdate {
    pub player_id: Uuid,
    pub position: Vec3,
    pub rotation: f32,
}

impl PlayerStateUpdate {
    pub const LEN: usize = 32;

    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_slice(self.player_id.as_bytes());
        buf.put_f32(self.position.x);
        buf.put_f32(self.position.y);
        buf.put_f32(self.position.z);
        buf.put_f32(self.rotation);
        buf.freeze()
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        let player_id = reader.uuid()?;
        let position = Vec3::new(reader.f32()?, reader.f32()?, reader.f32()?);
        let rotation = reader.f32()?;
        Ok(Self {
            player_id,
            position,
            rotation,
        })
    }
}

/// ZONE_CHANGED: previous zone, new zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneChanged {
    pub from: u32,
    pub to: u32,
}

impl ZoneChanged {
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(self.from);
        buf.put_u32(self.to);
        buf.freeze()
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            from: reader.u32()?,
            to: reader.u32()?,
        })
    }
}

/// GAMEPLAY_EVENT: u16 kind, actor id, u32 subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameplayEvent {
    pub kind: u16,
    pub actor: Uuid,
    pub subject: u32,
}

impl GameplayEvent {
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(22);
        buf.put_u16(self.kind);
        buf.put_slice(self.actor.as_bytes());
        buf.put_u32(self.subject);
        buf.freeze()
    }
}
