//! Zone index: maps positions to zones and zones to their members

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::ws::protocol::Vec3;

use super::player::PlayerId;

pub type ZoneId = u32;

/// Axis-aligned box, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }
}

/// Zone as described in the world definition file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub id: ZoneId,
    pub name: String,
    pub bounds: Bounds,
}

/// Built-in world layout used when no zone file is configured
pub fn default_layout() -> Vec<ZoneDefinition> {
    vec![
        ZoneDefinition {
            id: 1,
            name: "town".to_string(),
            bounds: Bounds {
                min: Vec3::new(-500.0, -100.0, -500.0),
                max: Vec3::new(500.0, 400.0, 500.0),
            },
        },
        ZoneDefinition {
            id: 2,
            name: "fields".to_string(),
            bounds: Bounds {
                min: Vec3::new(500.0, -100.0, -2000.0),
                max: Vec3::new(2500.0, 400.0, 2000.0),
            },
        },
        ZoneDefinition {
            id: 3,
            name: "forest".to_string(),
            bounds: Bounds {
                min: Vec3::new(-2500.0, -100.0, -2000.0),
                max: Vec3::new(-500.0, 400.0, 2000.0),
            },
        },
    ]
}

/// Read zone definitions from a JSON array
pub fn load_definitions(path: &Path) -> Result<Vec<ZoneDefinition>, ZoneError> {
    let raw = std::fs::read_to_string(path)?;
    let definitions = serde_json::from_str(&raw)?;
    Ok(definitions)
}

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),

    #[error("zone {0} is defined more than once")]
    DuplicateZone(ZoneId),

    #[error("zone {0} has min bounds greater than max bounds")]
    InvalidBounds(ZoneId),

    #[error("world defines no zones")]
    NoZones,

    #[error("failed to read zone file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse zone file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A partition of the world with its current members
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub bounds: Bounds,
    members: HashSet<PlayerId>,
}

impl Zone {
    fn new(definition: ZoneDefinition) -> Self {
        Self {
            id: definition.id,
            name: definition.name,
            bounds: definition.bounds,
            members: HashSet::new(),
        }
    }

    pub fn members(&self) -> &HashSet<PlayerId> {
        &self.members
    }

    pub fn population(&self) -> usize {
        self.members.len()
    }
}

/// Owns every zone's member set
///
/// `membership` mirrors the sets so a player can never be recorded in two
/// zones at once.
#[derive(Debug)]
pub struct ZoneIndex {
    zones: BTreeMap<ZoneId, Zone>,
    membership: HashMap<PlayerId, ZoneId>,
    simulated: Duration,
}

impl ZoneIndex {
    pub fn from_definitions(definitions: Vec<ZoneDefinition>) -> Result<Self, ZoneError> {
        if definitions.is_empty() {
            return Err(ZoneError::NoZones);
        }

        let mut zones = BTreeMap::new();
        for definition in definitions {
            if !definition.bounds.is_valid() {
                return Err(ZoneError::InvalidBounds(definition.id));
            }
            let id = definition.id;
            if zones.insert(id, Zone::new(definition)).is_some() {
                return Err(ZoneError::DuplicateZone(id));
            }
        }

        Ok(Self {
            zones,
            membership: HashMap::new(),
            simulated: Duration::ZERO,
        })
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn contains_zone(&self, id: ZoneId) -> bool {
        self.zones.contains_key(&id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Zone whose bounds contain `position`; lowest id wins on overlap
    pub fn get_zone_for_position(&self, position: Vec3) -> Option<&Zone> {
        self.zones.values().find(|z| z.bounds.contains(position))
    }

    /// Zone the player is currently recorded in
    pub fn zone_of(&self, player_id: &PlayerId) -> Option<ZoneId> {
        self.membership.get(player_id).copied()
    }

    pub fn add_player_to_zone(
        &mut self,
        player_id: PlayerId,
        zone_id: ZoneId,
    ) -> Result<(), ZoneError> {
        let zone = self
            .zones
            .get_mut(&zone_id)
            .ok_or(ZoneError::UnknownZone(zone_id))?;
        zone.members.insert(player_id);

        if let Some(previous) = self.membership.insert(player_id, zone_id) {
            if previous != zone_id {
                warn!(
                    player_id = %player_id,
                    previous,
                    zone_id,
                    "Player added to a zone without leaving the old one"
                );
                if let Some(old) = self.zones.get_mut(&previous) {
                    old.members.remove(&player_id);
                }
            }
        }
        Ok(())
    }

    /// Returns false if the player was not a member
    pub fn remove_player_from_zone(&mut self, player_id: &PlayerId, zone_id: ZoneId) -> bool {
        let removed = self
            .zones
            .get_mut(&zone_id)
            .map(|z| z.members.remove(player_id))
            .unwrap_or(false);

        if removed && self.membership.get(player_id) == Some(&zone_id) {
            self.membership.remove(player_id);
        }
        removed
    }

    /// Remove from `from` and add to `to` as one step
    ///
    /// Returns Ok(false) when the zones are equal. The target is checked
    /// before anything is touched, so an unknown target leaves membership
    /// unchanged.
    pub fn move_player(
        &mut self,
        player_id: PlayerId,
        from: ZoneId,
        to: ZoneId,
    ) -> Result<bool, ZoneError> {
        if from == to {
            return Ok(false);
        }
        if !self.zones.contains_key(&to) {
            return Err(ZoneError::UnknownZone(to));
        }

        self.remove_player_from_zone(&player_id, from);
        self.add_player_to_zone(player_id, to)?;
        Ok(true)
    }

    /// Per-tick hook for zone-local simulation
    pub fn update(&mut self, delta: Duration) {
        self.simulated += delta;
        trace!(
            delta_ms = delta.as_millis() as u64,
            simulated_ms = self.simulated.as_millis() as u64,
            "Zone update"
        );
    }

    pub fn simulated_time(&self) -> Duration {
        self.simulated
    }

    pub fn populations(&self) -> Vec<(ZoneId, usize)> {
        self.zones
            .values()
            .map(|z| (z.id, z.population()))
            .collect()
    }
}
