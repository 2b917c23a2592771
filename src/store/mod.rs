//! Character persistence backends

pub mod characters;
pub mod supabase;

pub use characters::{CharacterStore, InMemoryCharacterStore, SupabaseCharacterStore};
pub use supabase::{StoreError, SupabaseClient};
