//! Collaborators the world calls into: authentication, gameplay rules, chat

pub mod auth;
pub mod chat;
pub mod gameplay;

pub use auth::{AuthError, Authenticator, JwtAuthenticator};
pub use chat::{BinaryChatFormatter, ChatFormatter};
pub use gameplay::{GameplayRules, PassiveRules, RuleContext, RuleOutcome};
