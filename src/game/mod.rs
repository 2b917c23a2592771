//! World simulation: players, zones, packet routing and the tick loop

pub mod player;
pub mod registry;
pub mod router;
pub mod tick;
pub mod world;
pub mod zone;

pub use player::{Character, Connection, Outbound, PlayerId};
pub use registry::PlayerRegistry;
pub use world::{Services, World, WorldHandle, WorldSnapshot, WorldState};
pub use zone::{ZoneId, ZoneIndex};
