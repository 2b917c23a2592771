//! Player registry - owns every connected player's record

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::Vec3;

use super::player::{Character, Connection, ConnectionId, Player, PlayerId, SendError};
use super::zone::ZoneId;

/// Idle time after which a player is disconnected
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Players indexed by id, with a reverse index from connection to id
///
/// Both maps are only touched together so they can never disagree.
pub struct PlayerRegistry {
    players: HashMap<PlayerId, Player>,
    by_connection: HashMap<ConnectionId, PlayerId>,
    starting_zone: ZoneId,
    inactivity_timeout: Duration,
}

impl PlayerRegistry {
    pub fn new(starting_zone: ZoneId, inactivity_timeout: Duration) -> Self {
        Self {
            players: HashMap::new(),
            by_connection: HashMap::new(),
            starting_zone,
            inactivity_timeout,
        }
    }

    pub fn starting_zone(&self) -> ZoneId {
        self.starting_zone
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Register a freshly accepted connection
    pub fn create_player(&mut self, connection: Connection) -> PlayerId {
        let id = Uuid::new_v4();
        let connection_id = connection.id();

        self.by_connection.insert(connection_id, id);
        self.players
            .insert(id, Player::new(id, connection, self.starting_zone));

        info!(
            player_id = %id,
            connection = %connection_id,
            zone_id = self.starting_zone,
            player_count = self.players.len(),
            "Player created"
        );
        id
    }

    /// Delete both index entries; no-op if already gone
    pub fn remove_player(&mut self, id: &PlayerId) -> Option<Player> {
        let player = self.players.remove(id)?;
        self.by_connection.remove(&player.connection.id());

        info!(
            player_id = %id,
            player_count = self.players.len(),
            "Player removed"
        );
        Some(player)
    }

    pub fn get_player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_player_by_connection(&self, connection: ConnectionId) -> Option<&Player> {
        self.by_connection
            .get(&connection)
            .and_then(|id| self.players.get(id))
    }

    pub fn set_character(&mut self, id: &PlayerId, character: Character) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                debug!(player_id = %id, character_id = character.id, "Character bound");
                player.character = Some(character);
                true
            }
            None => false,
        }
    }

    /// Mark an AUTH as in flight; false if unknown or one is already pending
    pub fn begin_auth(&mut self, id: &PlayerId) -> bool {
        match self.players.get_mut(id) {
            Some(player) if !player.auth_pending => {
                player.auth_pending = true;
                true
            }
            _ => false,
        }
    }

    pub fn finish_auth(&mut self, id: &PlayerId) {
        if let Some(player) = self.players.get_mut(id) {
            player.auth_pending = false;
        }
    }

    /// Returns false when the player is unknown or has no character yet
    pub fn update_position(&mut self, id: &PlayerId, position: Vec3, rotation: f32) -> bool {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        let Some(character) = player.character.as_mut() else {
            return false;
        };

        character.position = position;
        character.rotation = rotation;
        player.touch();
        true
    }

    pub fn change_zone(&mut self, id: &PlayerId, zone_id: ZoneId) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.zone_id = zone_id;
                true
            }
            None => false,
        }
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&mut self, id: &PlayerId) {
        if let Some(player) = self.players.get_mut(id) {
            player.touch();
        }
    }

    /// Timeout sweep, run once per tick
    ///
    /// Evicted players are returned so the caller can release their zone
    /// membership and persist their character.
    pub fn update(&mut self, _delta: Duration) -> Vec<Player> {
        self.sweep(Instant::now())
    }

    fn sweep(&mut self, now: Instant) -> Vec<Player> {
        let expired: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| now.saturating_duration_since(p.last_activity) >= self.inactivity_timeout)
            .map(|p| p.id)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            // Another path may have removed it already
            let Some(player) = self.players.get(&id) else {
                continue;
            };
            info!(
                player_id = %id,
                idle_ms = now.saturating_duration_since(player.last_activity).as_millis() as u64,
                "Player timed out"
            );
            player.connection.close();
            if let Some(player) = self.remove_player(&id) {
                evicted.push(player);
            }
        }
        evicted
    }

    pub fn send(&self, id: &PlayerId, frame: Bytes) -> Result<(), SendError> {
        let player = self.players.get(id).ok_or(SendError::Closed)?;
        player.connection.send(frame)
    }

    /// Best-effort delivery to every open connection recorded in `zone_id`
    ///
    /// Returns the number of players the frame was queued for.
    pub fn broadcast(&self, zone_id: ZoneId, frame: &Bytes, exclude: Option<PlayerId>) -> usize {
        let mut delivered = 0;
        for player in self.players.values() {
            if player.zone_id != zone_id || Some(player.id) == exclude {
                continue;
            }
            if !player.connection.is_open() {
                continue;
            }
            match player.connection.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(player_id = %player.id, error = %e, "Broadcast delivery failed");
                }
            }
        }
        delivered
    }

    /// Remove everyone, used on shutdown
    pub fn drain(&mut self) -> Vec<Player> {
        self.by_connection.clear();
        self.players.drain().map(|(_, p)| p).collect()
    }
}
