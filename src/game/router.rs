//! Packet router - decodes client packets and applies them to the world

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::services::{
    AuthError, Authenticator, ChatFormatter, GameplayRules, RuleContext, RuleOutcome,
};
use crate::ws::protocol::{
    self, AttackRequest, AuthRequest, AuthResponse, ChatMessage, ItemUseRequest, MoveRequest,
    NpcInteractRequest, PacketType, PayloadError, SkillActionRequest, Vec3, ZoneChanged,
};

use super::player::{Character, PlayerId};
use super::world::{WorldCommand, WorldState};
use super::zone::ZoneId;

/// Bytes of a rejected packet shown in logs
const PREVIEW_LEN: usize = 32;

/// Dispatches decoded packets by type
///
/// Runs on the world task with exclusive access to [`WorldState`]. AUTH is
/// the one asynchronous path: verification runs on its own task and the
/// result comes back as [`WorldCommand::AuthCompleted`].
pub struct PacketRouter {
    auth: Arc<dyn Authenticator>,
    rules: Arc<dyn GameplayRules>,
    chat: Arc<dyn ChatFormatter>,
    commands: mpsc::WeakSender<WorldCommand>,
}

impl PacketRouter {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        rules: Arc<dyn GameplayRules>,
        chat: Arc<dyn ChatFormatter>,
        commands: &mpsc::Sender<WorldCommand>,
    ) -> Self {
        Self {
            auth,
            rules,
            chat,
            commands: commands.downgrade(),
        }
    }

    /// Handle one raw message received from `player_id`
    ///
    /// Malformed and unknown packets are logged and dropped without touching
    /// any state.
    pub fn handle(&self, state: &mut WorldState, player_id: PlayerId, raw: &[u8]) {
        let packet = match protocol::decode(raw) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(
                    player_id = %player_id,
                    error = %e,
                    preview = %hex::encode(&raw[..raw.len().min(PREVIEW_LEN)]),
                    "Dropping malformed packet"
                );
                return;
            }
        };

        if state.registry.get_player(&player_id).is_none() {
            debug!(player_id = %player_id, "Packet from unknown player");
            return;
        }
        state.registry.touch(&player_id);

        let Some(kind) = packet.packet_type() else {
            debug!(
                player_id = %player_id,
                type_code = packet.type_code,
                "Ignoring unknown packet type"
            );
            return;
        };

        trace!(player_id = %player_id, packet = ?kind, sequence = packet.sequence, "Packet");
        let payload = &packet.payload[..];

        match kind {
            PacketType::Ping => self.reply(state, player_id, PacketType::Pong, &[]),
            PacketType::Auth => match parsed(player_id, kind, AuthRequest::parse(payload)) {
                Some(request) => self.on_auth(state, player_id, request),
                None => self.reject_auth(state, player_id, &AuthError::InvalidToken),
            },
            PacketType::Move => self.on_move(state, player_id, payload),
            PacketType::Attack => {
                if let Some(request) = parsed(player_id, kind, AttackRequest::parse(payload)) {
                    self.apply_rule(state, player_id, |rules, ctx| rules.on_attack(ctx, request));
                }
            }
            PacketType::SkillAction => {
                if let Some(request) = parsed(player_id, kind, SkillActionRequest::parse(payload)) {
                    self.apply_rule(state, player_id, |rules, ctx| {
                        rules.on_skill_action(ctx, request)
                    });
                }
            }
            PacketType::ItemUse => {
                if let Some(request) = parsed(player_id, kind, ItemUseRequest::parse(payload)) {
                    self.apply_rule(state, player_id, |rules, ctx| rules.on_item_use(ctx, request));
                }
            }
            PacketType::NpcInteract => {
                if let Some(request) = parsed(player_id, kind, NpcInteractRequest::parse(payload)) {
                    self.apply_rule(state, player_id, |rules, ctx| {
                        rules.on_npc_interact(ctx, request)
                    });
                }
            }
            PacketType::ChatMessage => {
                if let Some(message) = parsed(player_id, kind, ChatMessage::parse(payload)) {
                    self.on_chat(state, player_id, message);
                }
            }
            PacketType::Pong
            | PacketType::AuthResponse
            | PacketType::PlayerState
            | PacketType::ZoneChanged
            | PacketType::GameplayEvent
            | PacketType::ChatBroadcast => {
                debug!(player_id = %player_id, packet = ?kind, "Client sent a server-only packet");
            }
        }
    }

    /// Apply the outcome of an AUTH started by [`PacketRouter::handle`]
    pub fn complete_auth(
        &self,
        state: &mut WorldState,
        player_id: PlayerId,
        result: Result<Character, AuthError>,
    ) {
        let Some(player) = state.registry.get_player(&player_id) else {
            debug!(player_id = %player_id, "Authentication finished after disconnect");
            return;
        };
        let in_world = player.in_world();
        state.registry.finish_auth(&player_id);
        if in_world {
            self.reject_auth(state, player_id, &AuthError::AlreadyAuthenticated);
            return;
        }

        let character = match result {
            Ok(character) => character,
            Err(e) => {
                info!(player_id = %player_id, error = %e, "Authentication failed");
                self.reject_auth(state, player_id, &e);
                return;
            }
        };

        let character_id = character.id;
        let account_id = character.account_id;
        let position = character.position;
        state.registry.set_character(&player_id, character);
        relocate(state, player_id, position);

        let zone_id = state
            .registry
            .get_player(&player_id)
            .map(|p| p.zone_id)
            .unwrap_or_else(|| state.registry.starting_zone());

        info!(
            player_id = %player_id,
            account_id = %account_id,
            character_id,
            zone_id,
            "Player entered world"
        );
        let response = AuthResponse::Accepted {
            character_id,
            zone_id,
        };
        self.reply(state, player_id, PacketType::AuthResponse, &response.to_payload());
    }

    fn on_auth(&self, state: &mut WorldState, player_id: PlayerId, request: AuthRequest) {
        if state
            .registry
            .get_player(&player_id)
            .is_some_and(|p| p.in_world())
        {
            self.reject_auth(state, player_id, &AuthError::AlreadyAuthenticated);
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            warn!(player_id = %player_id, "World is shutting down, AUTH ignored");
            return;
        };
        if !state.registry.begin_auth(&player_id) {
            debug!(player_id = %player_id, "AUTH while another is being verified");
            self.reject_auth(state, player_id, &AuthError::InProgress);
            return;
        }

        let pending = self.auth.authenticate(request.token);
        tokio::spawn(async move {
            let result = pending.await;
            if commands
                .send(WorldCommand::AuthCompleted { player_id, result })
                .await
                .is_err()
            {
                debug!(player_id = %player_id, "World closed before authentication finished");
            }
        });
    }

    fn reject_auth(&self, state: &WorldState, player_id: PlayerId, error: &AuthError) {
        let response = AuthResponse::Rejected {
            reason: error.to_string(),
        };
        self.reply(state, player_id, PacketType::AuthResponse, &response.to_payload());
    }

    fn on_move(&self, state: &mut WorldState, player_id: PlayerId, payload: &[u8]) {
        if payload.len() < MoveRequest::LEN {
            debug!(player_id = %player_id, len = payload.len(), "Short MOVE dropped");
            return;
        }
        let Some(request) = parsed(player_id, PacketType::Move, MoveRequest::parse(payload)) else {
            return;
        };

        if !state
            .registry
            .update_position(&player_id, request.position, request.rotation)
        {
            debug!(player_id = %player_id, "MOVE before authentication");
            return;
        }

        if let Some((from, to)) = relocate(state, player_id, request.position) {
            let changed = ZoneChanged { from, to };
            self.reply(state, player_id, PacketType::ZoneChanged, &changed.to_payload());
        }
    }

    fn on_chat(&self, state: &WorldState, player_id: PlayerId, message: ChatMessage) {
        let Some(player) = state.registry.get_player(&player_id) else {
            return;
        };
        let Some(character) = player.character.as_ref() else {
            debug!(player_id = %player_id, "Chat before authentication");
            return;
        };
        let Some(payload) = self.chat.format(player_id, character, &message) else {
            debug!(player_id = %player_id, "Empty chat message dropped");
            return;
        };

        let zone_id = player.zone_id;
        if let Some(frame) = frame(PacketType::ChatBroadcast, &payload) {
            let delivered = state.registry.broadcast(zone_id, &frame, None);
            debug!(
                player_id = %player_id,
                zone_id,
                channel = message.channel,
                delivered,
                "Chat broadcast"
            );
        }
    }

    fn apply_rule<F>(&self, state: &WorldState, player_id: PlayerId, rule: F)
    where
        F: FnOnce(&dyn GameplayRules, &RuleContext<'_>) -> RuleOutcome,
    {
        let Some(player) = state.registry.get_player(&player_id) else {
            return;
        };
        let Some(character) = player.character.as_ref() else {
            debug!(player_id = %player_id, "Gameplay request before authentication");
            return;
        };

        let zone_id = player.zone_id;
        let ctx = RuleContext {
            player_id,
            character,
            zone_id,
        };

        match rule(self.rules.as_ref(), &ctx) {
            RuleOutcome::Nothing => {}
            RuleOutcome::Reply(kind, payload) => self.reply(state, player_id, kind, &payload),
            RuleOutcome::BroadcastZone(kind, payload) => {
                if let Some(frame) = frame(kind, &payload) {
                    state.registry.broadcast(zone_id, &frame, None);
                }
            }
        }
    }

    fn reply(&self, state: &WorldState, player_id: PlayerId, kind: PacketType, payload: &[u8]) {
        let Some(frame) = frame(kind, payload) else {
            return;
        };
        if let Err(e) = state.registry.send(&player_id, frame) {
            debug!(player_id = %player_id, packet = ?kind, error = %e, "Reply dropped");
        }
    }
}

/// Move the player to the zone containing `position`
///
/// Positions outside every zone keep the current zone. Returns the
/// `(from, to)` pair when a swap happened.
fn relocate(
    state: &mut WorldState,
    player_id: PlayerId,
    position: Vec3,
) -> Option<(ZoneId, ZoneId)> {
    let from = state.registry.get_player(&player_id)?.zone_id;
    let to = state.zones.get_zone_for_position(position)?.id;

    match state.zones.move_player(player_id, from, to) {
        Ok(true) => {
            state.registry.change_zone(&player_id, to);
            info!(player_id = %player_id, from, to, "Player changed zone");
            Some((from, to))
        }
        Ok(false) => None,
        Err(e) => {
            warn!(player_id = %player_id, from, to, error = %e, "Zone change failed");
            None
        }
    }
}

fn parsed<T>(
    player_id: PlayerId,
    kind: PacketType,
    result: Result<T, PayloadError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(player_id = %player_id, packet = ?kind, error = %e, "Bad payload");
            None
        }
    }
}

/// Server packets carry sequence 0; only state broadcasts number their frames
fn frame(kind: PacketType, payload: &[u8]) -> Option<Bytes> {
    match protocol::encode(kind, 0, payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(packet = ?kind, error = %e, "Failed to encode packet");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{Connection, Outbound};
    use crate::game::registry::{PlayerRegistry, DEFAULT_INACTIVITY_TIMEOUT};
    use crate::game::zone::{default_layout, ZoneIndex};
    use crate::services::auth::tests::{claims_for, sign};
    use crate::services::{BinaryChatFormatter, JwtAuthenticator, PassiveRules};
    use crate::store::InMemoryCharacterStore;
    use crate::ws::protocol::{Packet, PayloadReader};
    use std::time::Duration;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    struct Harness {
        state: WorldState,
        router: PacketRouter,
        store: InMemoryCharacterStore,
        commands: mpsc::Receiver<WorldCommand>,
        _tx: mpsc::Sender<WorldCommand>,
    }

    fn harness() -> Harness {
        let store = InMemoryCharacterStore::new();
        let (tx, commands) = mpsc::channel(16);
        let router = PacketRouter::new(
            Arc::new(JwtAuthenticator::new(SECRET, Arc::new(store.clone()))),
            Arc::new(PassiveRules),
            Arc::new(BinaryChatFormatter),
            &tx,
        );
        let state = WorldState::new(
            PlayerRegistry::new(1, DEFAULT_INACTIVITY_TIMEOUT),
            ZoneIndex::from_definitions(default_layout()).unwrap(),
        );
        Harness {
            state,
            router,
            store,
            commands,
            _tx: tx,
        }
    }

    fn character(name: &str, position: Vec3) -> Character {
        Character {
            id: 100,
            account_id: Uuid::new_v4(),
            name: name.to_string(),
            position,
            rotation: 0.0,
        }
    }

    fn join(h: &mut Harness) -> (PlayerId, mpsc::Receiver<Outbound>) {
        let (connection, rx) = Connection::new(32);
        let id = h.state.connect(connection).unwrap();
        (id, rx)
    }

    fn join_in_world(h: &mut Harness, name: &str) -> (PlayerId, mpsc::Receiver<Outbound>) {
        let (id, rx) = join(h);
        h.state
            .registry
            .set_character(&id, character(name, Vec3::default()));
        (id, rx)
    }

    fn next_packet(rx: &mut mpsc::Receiver<Outbound>) -> Option<Packet> {
        match rx.try_recv().ok()? {
            Outbound::Frame(bytes) => Some(protocol::decode(&bytes).unwrap()),
            Outbound::Close => None,
        }
    }

    fn send(h: &mut Harness, id: PlayerId, kind: PacketType, payload: &[u8]) {
        let raw = protocol::encode(kind, 7, payload).unwrap();
        h.router.handle(&mut h.state, id, &raw);
    }

    fn move_to(x: f32, y: f32, z: f32, rotation: f32) -> Bytes {
        MoveRequest {
            position: Vec3::new(x, y, z),
            rotation,
        }
        .to_payload()
    }

    #[test]
    fn ping_gets_pong_with_sequence_zero() {
        let mut h = harness();
        let (id, mut rx) = join(&mut h);

        send(&mut h, id, PacketType::Ping, &[]);

        let pong = next_packet(&mut rx).unwrap();
        assert_eq!(pong.packet_type(), Some(PacketType::Pong));
        assert_eq!(pong.sequence, 0);
        assert!(pong.payload.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn move_sets_exact_position_and_refreshes_activity() {
        let mut h = harness();
        let (id, _rx) = join_in_world(&mut h, "Ana");
        let before = h.state.registry.get_player(&id).unwrap().last_activity;

        tokio::time::advance(Duration::from_millis(500)).await;
        send(&mut h, id, PacketType::Move, &move_to(1.0, 2.0, 3.0, 0.5));

        let player = h.state.registry.get_player(&id).unwrap();
        let character = player.character.as_ref().unwrap();
        assert_eq!(character.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(character.rotation, 0.5);
        assert!(player.last_activity > before);
    }

    #[test]
    fn zone_crossing_move_swaps_membership() {
        let mut h = harness();
        let (id, mut rx) = join_in_world(&mut h, "Ana");
        assert_eq!(h.state.zones.zone_of(&id), Some(1));

        send(&mut h, id, PacketType::Move, &move_to(1000.0, 0.0, 0.0, 0.0));

        assert_eq!(h.state.zones.zone_of(&id), Some(2));
        assert!(!h.state.zones.zone(1).unwrap().members().contains(&id));
        assert!(h.state.zones.zone(2).unwrap().members().contains(&id));
        assert_eq!(h.state.registry.get_player(&id).unwrap().zone_id, 2);

        let notice = next_packet(&mut rx).unwrap();
        assert_eq!(notice.packet_type(), Some(PacketType::ZoneChanged));
        assert_eq!(
            ZoneChanged::parse(&notice.payload).unwrap(),
            ZoneChanged { from: 1, to: 2 }
        );
    }

    #[test]
    fn move_outside_every_zone_keeps_current_zone() {
        let mut h = harness();
        let (id, mut rx) = join_in_world(&mut h, "Ana");

        send(&mut h, id, PacketType::Move, &move_to(0.0, 9000.0, 0.0, 0.0));

        assert_eq!(h.state.zones.zone_of(&id), Some(1));
        assert!(next_packet(&mut rx).is_none());
    }

    #[test]
    fn move_without_character_is_ignored() {
        let mut h = harness();
        let (id, _rx) = join(&mut h);

        send(&mut h, id, PacketType::Move, &move_to(1000.0, 0.0, 0.0, 0.0));

        assert!(h.state.registry.get_player(&id).unwrap().character.is_none());
        assert_eq!(h.state.zones.zone_of(&id), Some(1));
    }

    #[test]
    fn short_move_is_dropped() {
        let mut h = harness();
        let (id, _rx) = join_in_world(&mut h, "Ana");

        send(&mut h, id, PacketType::Move, &[0x3f, 0x80, 0, 0, 0, 0, 0, 0]);

        let character = h.state.registry.get_player(&id).unwrap().character.clone();
        assert_eq!(character.unwrap().position, Vec3::default());
    }

    #[test]
    fn unknown_and_malformed_packets_change_nothing() {
        let mut h = harness();
        let (id, mut rx) = join_in_world(&mut h, "Ana");
        let populations = h.state.zones.populations();

        send(&mut h, id, PacketType::Move, &[]);
        let unknown = protocol::encode(0x0999u16, 1, &move_to(1000.0, 0.0, 0.0, 0.0)).unwrap();
        h.router.handle(&mut h.state, id, &unknown);
        h.router.handle(&mut h.state, id, &[0x00, 0x01, 0x02]);

        assert_eq!(h.state.registry.len(), 1);
        assert_eq!(h.state.zones.populations(), populations);
        assert_eq!(
            h.state.registry.get_player(&id).unwrap().character.as_ref().unwrap().position,
            Vec3::default()
        );
        assert!(next_packet(&mut rx).is_none());
    }

    #[test]
    fn chat_reaches_the_zone_including_sender() {
        let mut h = harness();
        let (sender, mut sender_rx) = join_in_world(&mut h, "Ana");
        let (_peer, mut peer_rx) = join_in_world(&mut h, "Bo");

        let message = ChatMessage {
            channel: 1,
            text: "hello".to_string(),
        };
        send(&mut h, sender, PacketType::ChatMessage, &message.to_payload());

        for rx in [&mut sender_rx, &mut peer_rx] {
            let packet = next_packet(rx).unwrap();
            assert_eq!(packet.packet_type(), Some(PacketType::ChatBroadcast));
            let mut reader = PayloadReader::new(&packet.payload);
            assert_eq!(reader.u8().unwrap(), 1);
            assert_eq!(reader.uuid().unwrap(), sender);
            assert_eq!(reader.string().unwrap(), "Ana");
            assert_eq!(reader.string().unwrap(), "hello");
        }
    }

    #[test]
    fn oversize_chat_length_is_rejected() {
        let mut h = harness();
        let (sender, mut rx) = join_in_world(&mut h, "Ana");

        send(&mut h, sender, PacketType::ChatMessage, &[0x01, 0x00, 0x40, b'h', b'i']);

        assert!(next_packet(&mut rx).is_none());
    }

    #[test]
    fn gameplay_requires_a_character() {
        let mut h = harness();
        let (id, mut rx) = join(&mut h);
        let (_peer, mut peer_rx) = join_in_world(&mut h, "Bo");

        send(&mut h, id, PacketType::Attack, &5u32.to_be_bytes());
        assert!(next_packet(&mut rx).is_none());
        assert!(next_packet(&mut peer_rx).is_none());
    }

    #[test]
    fn attack_is_broadcast_to_the_zone() {
        let mut h = harness();
        let (id, _rx) = join_in_world(&mut h, "Ana");
        let (_peer, mut peer_rx) = join_in_world(&mut h, "Bo");

        send(&mut h, id, PacketType::Attack, &5u32.to_be_bytes());

        let event = next_packet(&mut peer_rx).unwrap();
        assert_eq!(event.packet_type(), Some(PacketType::GameplayEvent));
    }

    #[tokio::test]
    async fn auth_binds_character_and_resolves_zone() {
        let mut h = harness();
        let account = Uuid::new_v4();
        h.store.insert(Character {
            id: 42,
            account_id: account,
            name: "Cy".to_string(),
            position: Vec3::new(-1000.0, 0.0, 0.0),
            rotation: 0.0,
        });
        let (id, mut rx) = join(&mut h);

        let token = sign(&claims_for(account), SECRET);
        send(&mut h, id, PacketType::Auth, &AuthRequest { token }.to_payload());

        let Some(WorldCommand::AuthCompleted { player_id, result }) = h.commands.recv().await
        else {
            panic!("expected auth completion");
        };
        assert_eq!(player_id, id);
        h.router.complete_auth(&mut h.state, player_id, result);

        let response = next_packet(&mut rx).unwrap();
        assert_eq!(
            AuthResponse::parse(&response.payload).unwrap(),
            AuthResponse::Accepted {
                character_id: 42,
                zone_id: 3
            }
        );
        assert_eq!(h.state.zones.zone_of(&id), Some(3));

        send(&mut h, id, PacketType::Auth, &AuthRequest { token: "x".into() }.to_payload());
        let again = next_packet(&mut rx).unwrap();
        assert_eq!(
            AuthResponse::parse(&again.payload).unwrap(),
            AuthResponse::Rejected {
                reason: AuthError::AlreadyAuthenticated.to_string()
            }
        );
    }

    #[tokio::test]
    async fn second_auth_in_flight_is_rejected_without_a_second_check() {
        let mut h = harness();
        let account = Uuid::new_v4();
        h.store.insert(Character {
            id: 1,
            account_id: account,
            name: "Cy".to_string(),
            position: Vec3::default(),
            rotation: 0.0,
        });
        let (id, mut rx) = join(&mut h);

        let request = AuthRequest {
            token: sign(&claims_for(account), SECRET),
        }
        .to_payload();
        send(&mut h, id, PacketType::Auth, &request);
        send(&mut h, id, PacketType::Auth, &request);

        let busy = next_packet(&mut rx).unwrap();
        assert_eq!(
            AuthResponse::parse(&busy.payload).unwrap(),
            AuthResponse::Rejected {
                reason: AuthError::InProgress.to_string()
            }
        );

        let Some(WorldCommand::AuthCompleted { player_id, result }) = h.commands.recv().await
        else {
            panic!("expected auth completion");
        };
        h.router.complete_auth(&mut h.state, player_id, result);
        assert_eq!(
            AuthResponse::parse(&next_packet(&mut rx).unwrap().payload).unwrap(),
            AuthResponse::Accepted {
                character_id: 1,
                zone_id: 1
            }
        );

        // Only one verification was started
        assert!(h.commands.try_recv().is_err());
        assert!(next_packet(&mut rx).is_none());
        assert!(!h.state.registry.get_player(&id).unwrap().auth_pending);
    }

    #[tokio::test]
    async fn auth_may_be_retried_after_a_rejection() {
        let mut h = harness();
        let (id, mut rx) = join(&mut h);
        let bad = AuthRequest {
            token: "not.a.jwt".into(),
        }
        .to_payload();

        for _ in 0..2 {
            send(&mut h, id, PacketType::Auth, &bad);
            let Some(WorldCommand::AuthCompleted { player_id, result }) =
                h.commands.recv().await
            else {
                panic!("expected auth completion");
            };
            h.router.complete_auth(&mut h.state, player_id, result);
            assert_eq!(
                AuthResponse::parse(&next_packet(&mut rx).unwrap().payload).unwrap(),
                AuthResponse::Rejected {
                    reason: AuthError::InvalidToken.to_string()
                }
            );
        }
    }

    #[test]
    fn unreadable_auth_payload_is_rejected() {
        let mut h = harness();
        let (id, mut rx) = join(&mut h);

        send(&mut h, id, PacketType::Auth, &[]);

        let response = next_packet(&mut rx).unwrap();
        assert_eq!(
            AuthResponse::parse(&response.payload).unwrap(),
            AuthResponse::Rejected {
                reason: AuthError::InvalidToken.to_string()
            }
        );
        assert!(!h.state.registry.get_player(&id).unwrap().auth_pending);
    }

    #[tokio::test]
    async fn bad_token_is_rejected_with_reason() {
        let mut h = harness();
        let (id, mut rx) = join(&mut h);

        send(
            &mut h,
            id,
            PacketType::Auth,
            &AuthRequest {
                token: "not.a.jwt".into(),
            }
            .to_payload(),
        );
        let Some(WorldCommand::AuthCompleted { player_id, result }) = h.commands.recv().await
        else {
            panic!("expected auth completion");
        };
        h.router.complete_auth(&mut h.state, player_id, result);

        let response = next_packet(&mut rx).unwrap();
        assert!(matches!(
            AuthResponse::parse(&response.payload).unwrap(),
            AuthResponse::Rejected { .. }
        ));
        assert!(!h.state.registry.get_player(&id).unwrap().in_world());
    }
}
