//! Player records and the connection handle used to reach them

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ws::protocol::Vec3;

use super::zone::ZoneId;

pub type PlayerId = Uuid;

/// Identifies one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Bytes),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound queue is full")]
    QueueFull,
}

/// Non-blocking handle to a client connection
///
/// Sends go through a bounded queue drained by the transport's writer task.
/// A full queue drops the frame instead of waiting.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::next(),
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(Outbound::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Mark closed and ask the writer to shut the socket
    ///
    /// The writer also checks the flag between frames, so a full queue does
    /// not keep the socket alive.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.try_send(Outbound::Close);
        }
    }

    /// Shared flag the writer task polls
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        self.open.clone()
    }
}

/// A loaded character bound to a player after authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: u64,
    pub account_id: Uuid,
    pub name: String,
    pub position: Vec3,
    pub rotation: f32,
}

/// Per-connection player state (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub connection: Connection,
    pub zone_id: ZoneId,
    pub character: Option<Character>,
    /// An AUTH is being verified and has not completed yet
    pub auth_pending: bool,
    pub last_activity: Instant,
}

impl Player {
    pub fn new(id: PlayerId, connection: Connection, zone_id: ZoneId) -> Self {
        Self {
            id,
            connection,
            zone_id,
            character: None,
            auth_pending: false,
            last_activity: Instant::now(),
        }
    }

    pub fn in_world(&self) -> bool {
        self.character.is_some()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
