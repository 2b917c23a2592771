//! Gameplay rule engines: combat, skills, items and NPC interaction
//!
//! The world only decodes and validates requests; what an attack or an item
//! actually does is decided here.

use bytes::Bytes;
use tracing::debug;

use crate::game::{Character, PlayerId, ZoneId};
use crate::ws::protocol::{
    AttackRequest, GameplayEvent, ItemUseRequest, NpcInteractRequest, PacketType,
    SkillActionRequest,
};

pub const EVENT_ATTACK: u16 = 1;
pub const EVENT_SKILL: u16 = 2;
pub const EVENT_ITEM_USED: u16 = 3;
pub const EVENT_NPC_DIALOG: u16 = 4;

/// Who is acting, and where
pub struct RuleContext<'a> {
    pub player_id: PlayerId,
    pub character: &'a Character,
    pub zone_id: ZoneId,
}

/// Effect a rule asks the world to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Nothing,
    /// Send to the acting player only
    Reply(PacketType, Bytes),
    /// Send to everyone in the acting player's zone
    BroadcastZone(PacketType, Bytes),
}

pub trait GameplayRules: Send + Sync {
    fn on_attack(&self, ctx: &RuleContext<'_>, request: AttackRequest) -> RuleOutcome;

    fn on_skill_action(&self, ctx: &RuleContext<'_>, request: SkillActionRequest) -> RuleOutcome;

    fn on_item_use(&self, ctx: &RuleContext<'_>, request: ItemUseRequest) -> RuleOutcome;

    fn on_npc_interact(&self, ctx: &RuleContext<'_>, request: NpcInteractRequest)
        -> RuleOutcome;
}

/// Rules with no combat or inventory state
///
/// Attacks and skills are shown to the zone, item use and NPC interaction are
/// acknowledged to the actor. Nothing is resolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveRules;

fn event(kind: u16, ctx: &RuleContext<'_>, subject: u32) -> Bytes {
    GameplayEvent {
        kind,
        actor: ctx.player_id,
        subject,
    }
    .to_payload()
}

impl GameplayRules for PassiveRules {
    fn on_attack(&self, ctx: &RuleContext<'_>, request: AttackRequest) -> RuleOutcome {
        debug!(
            player_id = %ctx.player_id,
            character_id = ctx.character.id,
            zone_id = ctx.zone_id,
            target = request.target_id,
            "Attack"
        );
        RuleOutcome::BroadcastZone(
            PacketType::GameplayEvent,
            event(EVENT_ATTACK, ctx, request.target_id),
        )
    }

    fn on_skill_action(&self, ctx: &RuleContext<'_>, request: SkillActionRequest) -> RuleOutcome {
        debug!(
            player_id = %ctx.player_id,
            skill = request.skill_id,
            target = request.target_id,
            "Skill action"
        );
        RuleOutcome::BroadcastZone(
            PacketType::GameplayEvent,
            event(EVENT_SKILL, ctx, u32::from(request.skill_id)),
        )
    }

    fn on_item_use(&self, ctx: &RuleContext<'_>, request: ItemUseRequest) -> RuleOutcome {
        debug!(
            player_id = %ctx.player_id,
            slot = request.slot,
            item = request.item_id,
            "Item use"
        );
        RuleOutcome::Reply(
            PacketType::GameplayEvent,
            event(EVENT_ITEM_USED, ctx, request.item_id),
        )
    }

    fn on_npc_interact(
        &self,
        ctx: &RuleContext<'_>,
        request: NpcInteractRequest,
    ) -> RuleOutcome {
        debug!(
            player_id = %ctx.player_id,
            npc = request.npc_id,
            action = request.action,
            "NPC interaction"
        );
        RuleOutcome::Reply(
            PacketType::GameplayEvent,
            event(EVENT_NPC_DIALOG, ctx, request.npc_id),
        )
    }
}
