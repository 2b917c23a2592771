//! Shapes CHAT_BROADCAST payloads

use bytes::{BufMut, Bytes, BytesMut};

use crate::game::{Character, PlayerId};
use crate::ws::protocol::{put_string, ChatMessage};

/// Longest message forwarded, in characters
pub const MAX_CHAT_CHARS: usize = 256;

pub trait ChatFormatter: Send + Sync {
    /// Broadcast payload for a chat line, or None to drop it
    fn format(&self, sender: PlayerId, character: &Character, message: &ChatMessage)
        -> Option<Bytes>;
}

/// `u8 channel | sender id | u16 name len | name | u16 text len | text`
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryChatFormatter;

impl ChatFormatter for BinaryChatFormatter {
    fn format(
        &self,
        sender: PlayerId,
        character: &Character,
        message: &ChatMessage,
    ) -> Option<Bytes> {
        let text = message.text.trim();
        if text.is_empty() {
            return None;
        }
        let text: String = text
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_CHAT_CHARS)
            .collect();

        let mut buf = BytesMut::with_capacity(21 + character.name.len() + text.len());
        buf.put_u8(message.channel);
        buf.put_slice(sender.as_bytes());
        put_string(&mut buf, &character.name);
        put_string(&mut buf, &text);
        Some(buf.freeze())
    }
}
