//! Character persistence: load by account, save on change

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::Character;
use crate::ws::protocol::Vec3;

use super::supabase::{StoreError, SupabaseClient};

/// Storage backend for characters
pub trait CharacterStore: Send + Sync {
    /// Character owned by `account_id`, if any
    fn load_for_account(&self, account_id: Uuid)
        -> BoxFuture<'_, Result<Option<Character>, StoreError>>;

    /// Persist position and rotation
    fn save(&self, character: Character) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Process-local store, used for development and tests
#[derive(Clone, Default)]
pub struct InMemoryCharacterStore {
    characters: Arc<DashMap<Uuid, Character>>,
}

impl InMemoryCharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a character, replacing any previous one for the same account
    pub fn insert(&self, character: Character) {
        self.characters.insert(character.account_id, character);
    }

    pub fn get(&self, account_id: &Uuid) -> Option<Character> {
        self.characters.get(account_id).map(|c| c.value().clone())
    }
}

impl CharacterStore for InMemoryCharacterStore {
    fn load_for_account(
        &self,
        account_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Character>, StoreError>> {
        let found = self.get(&account_id);
        Box::pin(async move { Ok(found) })
    }

    fn save(&self, character: Character) -> BoxFuture<'_, Result<(), StoreError>> {
        self.insert(character);
        Box::pin(async { Ok(()) })
    }
}

/// Row in the `characters` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CharacterRow {
    id: i64,
    account_id: Uuid,
    name: String,
    pos_x: f32,
    pos_y: f32,
    pos_z: f32,
    rotation: f32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<CharacterRow> for Character {
    fn from(row: CharacterRow) -> Self {
        Self {
            id: row.id as u64,
            account_id: row.account_id,
            name: row.name,
            position: Vec3::new(row.pos_x, row.pos_y, row.pos_z),
            rotation: row.rotation,
        }
    }
}

/// Position update for a character row
#[derive(Debug, Clone, Serialize)]
struct CharacterUpdate {
    pos_x: f32,
    pos_y: f32,
    pos_z: f32,
    rotation: f32,
    updated_at: DateTime<Utc>,
}

/// Characters stored in Supabase
#[derive(Clone)]
pub struct SupabaseCharacterStore {
    client: SupabaseClient,
}

impl SupabaseCharacterStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl CharacterStore for SupabaseCharacterStore {
    fn load_for_account(
        &self,
        account_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Character>, StoreError>> {
        Box::pin(async move {
            let query = format!("account_id=eq.{}&limit=1", account_id);
            let row: Option<CharacterRow> = self.client.get_one("characters", &query).await?;
            Ok(row.map(Character::from))
        })
    }

    fn save(&self, character: Character) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let query = format!("id=eq.{}", character.id);
            let update = CharacterUpdate {
                pos_x: character.position.x,
                pos_y: character.position.y,
                pos_z: character.position.z,
                rotation: character.rotation,
                updated_at: Utc::now(),
            };
            self.client.update("characters", &query, &update).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(account_id: Uuid) -> Character {
        Character {
            id: 11,
            account_id,
            name: "Brann".to_string(),
            position: Vec3::new(1.0, 0.0, 1.0),
            rotation: 0.0,
        }
    }

    #[tokio::test]
    async fn in_memory_round_trips_by_account() {
        let store = InMemoryCharacterStore::new();
        let account = Uuid::new_v4();
        assert!(store.load_for_account(account).await.unwrap().is_none());

        let mut c = character(account);
        store.save(c.clone()).await.unwrap();
        c.position = Vec3::new(9.0, 9.0, 9.0);
        store.save(c.clone()).await.unwrap();

        let loaded = store.load_for_account(account).await.unwrap().unwrap();
        assert_eq!(loaded.position, Vec3::new(9.0, 9.0, 9.0));
    }

    #[test]
    fn rows_convert_to_characters() {
        let json = r#"{"id": 5, "account_id": "8e0f5a3c-4c55-4b8e-9a47-3a1c1a0d2b11",
            "name": "Cole", "pos_x": 1.5, "pos_y": 2.0, "pos_z": -3.0, "rotation": 0.25}"#;
        let row: CharacterRow = serde_json::from_str(json).unwrap();
        let c = Character::from(row);
        assert_eq!(c.id, 5);
        assert_eq!(c.position, Vec3::new(1.5, 2.0, -3.0));
        assert_eq!(c.rotation, 0.25);
    }
}
