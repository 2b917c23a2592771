//! World owner task
//!
//! One task owns the player registry and the zone index. Connections, auth
//! results and control requests reach it as [`WorldCommand`]s over a bounded
//! channel, and simulation ticks are multiplexed into the same loop, so no
//! two mutations ever overlap and tick phases always run in order.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::services::{AuthError, Authenticator, ChatFormatter, GameplayRules};
use crate::store::CharacterStore;
use crate::ws::protocol::{self, PacketType, PlayerStateUpdate};

use super::player::{Character, Connection, Player, PlayerId};
use super::registry::PlayerRegistry;
use super::router::PacketRouter;
use super::tick::{LoopError, LoopStats, SimulationLoop, TickError};
use super::zone::{ZoneError, ZoneId, ZoneIndex};

/// Capacity of the world command channel
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Everything the world task mutates
pub struct WorldState {
    pub registry: PlayerRegistry,
    pub zones: ZoneIndex,
}

impl WorldState {
    pub fn new(registry: PlayerRegistry, zones: ZoneIndex) -> Self {
        Self { registry, zones }
    }

    /// Register a connection as a player in the starting zone
    pub fn connect(&mut self, connection: Connection) -> Result<PlayerId, ZoneError> {
        let zone_id = self.registry.starting_zone();
        if !self.zones.contains_zone(zone_id) {
            return Err(ZoneError::UnknownZone(zone_id));
        }
        let id = self.registry.create_player(connection);
        self.zones.add_player_to_zone(id, zone_id)?;
        Ok(id)
    }

    /// Remove from the zone index, then from the registry
    pub fn remove(&mut self, id: &PlayerId) -> Option<Player> {
        let zone_id = self.registry.get_player(id)?.zone_id;
        self.zones.remove_player_from_zone(id, zone_id);
        self.registry.remove_player(id)
    }
}

/// Requests handled by the world task, one at a time
pub enum WorldCommand {
    Connect {
        connection: Connection,
        reply: oneshot::Sender<Result<PlayerId, ZoneError>>,
    },
    Packet {
        player_id: PlayerId,
        bytes: Bytes,
    },
    Disconnect {
        player_id: PlayerId,
    },
    AuthCompleted {
        player_id: PlayerId,
        result: Result<Character, AuthError>,
    },
    StartSimulation {
        tick_rate_hz: u32,
        reply: oneshot::Sender<Result<bool, LoopError>>,
    },
    StopSimulation,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("world task is not running")]
    Closed,

    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Loop(#[from] LoopError),
}

/// Population of one zone, as reported by the health endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ZonePopulation {
    pub zone_id: ZoneId,
    pub name: String,
    pub players: usize,
}

/// Read-only view of the world, republished after ticks and membership changes
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldSnapshot {
    pub players: usize,
    pub in_world: usize,
    pub zones: Vec<ZonePopulation>,
    pub simulated_ms: u64,
}

/// Collaborators injected into the world
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn Authenticator>,
    pub rules: Arc<dyn GameplayRules>,
    pub chat: Arc<dyn ChatFormatter>,
    pub store: Arc<dyn CharacterStore>,
}

/// Cloneable handle for talking to the world task
#[derive(Clone)]
pub struct WorldHandle {
    tx: mpsc::Sender<WorldCommand>,
    stats: Arc<LoopStats>,
    snapshot: Arc<RwLock<WorldSnapshot>>,
}

impl WorldHandle {
    pub async fn connect(&self, connection: Connection) -> Result<PlayerId, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Connect { connection, reply }).await?;
        Ok(rx.await.map_err(|_| WorldError::Closed)??)
    }

    pub async fn packet(&self, player_id: PlayerId, bytes: Bytes) -> Result<(), WorldError> {
        self.send(WorldCommand::Packet { player_id, bytes }).await
    }

    pub async fn disconnect(&self, player_id: PlayerId) -> Result<(), WorldError> {
        self.send(WorldCommand::Disconnect { player_id }).await
    }

    /// Returns Ok(false) if the simulation was already running
    pub async fn start_simulation(&self, tick_rate_hz: u32) -> Result<bool, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::StartSimulation {
            tick_rate_hz,
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| WorldError::Closed)??)
    }

    pub async fn stop_simulation(&self) -> Result<(), WorldError> {
        self.send(WorldCommand::StopSimulation).await
    }

    pub async fn shutdown(&self) -> Result<(), WorldError> {
        self.send(WorldCommand::Shutdown).await
    }

    pub fn stats(&self) -> &Arc<LoopStats> {
        &self.stats
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.snapshot.read().clone()
    }

    async fn send(&self, command: WorldCommand) -> Result<(), WorldError> {
        self.tx.send(command).await.map_err(|_| WorldError::Closed)
    }
}

/// The authoritative world
pub struct World {
    state: WorldState,
    router: PacketRouter,
    store: Arc<dyn CharacterStore>,
    sim: SimulationLoop,
    commands: mpsc::Receiver<WorldCommand>,
    snapshot: Arc<RwLock<WorldSnapshot>>,
    /// Character saves still running
    saves: JoinSet<()>,
    #[cfg(test)]
    tick_hook: Option<Box<dyn FnMut(u64) -> Result<(), TickError> + Send>>,
}

impl World {
    pub fn new(state: WorldState, services: Services) -> (Self, WorldHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let sim = SimulationLoop::new();
        let snapshot = Arc::new(RwLock::new(WorldSnapshot::default()));

        let handle = WorldHandle {
            tx: tx.clone(),
            stats: sim.stats(),
            snapshot: snapshot.clone(),
        };

        let world = Self {
            router: PacketRouter::new(services.auth, services.rules, services.chat, &tx),
            state,
            store: services.store,
            sim,
            commands,
            snapshot,
            saves: JoinSet::new(),
            #[cfg(test)]
            tick_hook: None,
        };
        world.publish_snapshot();

        (world, handle)
    }

    /// Process commands and ticks until shutdown or every handle is dropped
    pub async fn run(mut self) {
        info!(zones = self.state.zones.zones().count(), "World started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorldCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                delta = self.sim.next_tick() => self.run_tick(delta),
                Some(result) = self.saves.join_next(), if !self.saves.is_empty() => {
                    log_save_join(result);
                }
            }
        }

        self.shutdown().await;
    }

    fn handle_command(&mut self, command: WorldCommand) {
        match command {
            WorldCommand::Connect { connection, reply } => {
                let result = self.state.connect(connection);
                if let Err(e) = &result {
                    error!(error = %e, "Failed to place new player");
                }
                let _ = reply.send(result);
                self.publish_snapshot();
            }
            WorldCommand::Packet { player_id, bytes } => {
                self.router.handle(&mut self.state, player_id, &bytes);
            }
            WorldCommand::Disconnect { player_id } => {
                if let Some(player) = self.state.remove(&player_id) {
                    player.connection.close();
                    self.persist(player);
                    self.publish_snapshot();
                }
            }
            WorldCommand::AuthCompleted { player_id, result } => {
                self.router.complete_auth(&mut self.state, player_id, result);
                self.publish_snapshot();
            }
            WorldCommand::StartSimulation {
                tick_rate_hz,
                reply,
            } => {
                let result = self.sim.start(tick_rate_hz);
                if let Err(e) = &result {
                    warn!(error = %e, "Simulation not started");
                }
                let _ = reply.send(result);
            }
            WorldCommand::StopSimulation => {
                self.sim.stop();
            }
            WorldCommand::Shutdown => {}
        }
    }

    /// Run one tick, containing any failure to this tick
    fn run_tick(&mut self, delta: Duration) {
        let tick = self.sim.tick_count();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(tick, delta)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(tick, error = %e, "Tick failed"),
            Err(payload) => error!(tick, panic = %panic_message(&*payload), "Tick panicked"),
        }
        self.publish_snapshot();
    }

    fn tick(&mut self, tick: u64, delta: Duration) -> Result<(), TickError> {
        #[cfg(test)]
        if let Some(hook) = self.tick_hook.as_mut() {
            hook(tick)?;
        }

        self.state.zones.update(delta);

        for player in self.state.registry.update(delta) {
            self.state
                .zones
                .remove_player_from_zone(&player.id, player.zone_id);
            self.persist(player);
        }

        self.broadcast_states(tick)
    }

    /// Send each in-world player's state to the other in-world players of its zone
    fn broadcast_states(&self, tick: u64) -> Result<(), TickError> {
        let sequence = tick as u32;
        let mut by_zone: HashMap<ZoneId, Vec<(PlayerId, Bytes)>> = HashMap::new();

        for player in self.state.registry.players() {
            let Some(character) = player.character.as_ref() else {
                continue;
            };
            let update = PlayerStateUpdate {
                player_id: player.id,
                position: character.position,
                rotation: character.rotation,
            };
            let frame = protocol::encode(PacketType::PlayerState, sequence, &update.to_payload())?;
            by_zone.entry(player.zone_id).or_default().push((player.id, frame));
        }

        let mut sent = 0usize;
        for recipient in self.state.registry.players() {
            if !recipient.in_world() || !recipient.connection.is_open() {
                continue;
            }
            let Some(frames) = by_zone.get(&recipient.zone_id) else {
                continue;
            };
            for (subject, frame) in frames {
                if *subject == recipient.id {
                    continue;
                }
                match recipient.connection.send(frame.clone()) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        trace!(player_id = %recipient.id, error = %e, "State update dropped");
                    }
                }
            }
        }

        trace!(tick, sent, "State broadcast");
        Ok(())
    }

    /// Save in the background; shutdown waits for every save still running
    fn persist(&mut self, player: Player) {
        let Some(character) = player.character else {
            return;
        };
        let store = self.store.clone();
        let player_id = player.id;
        self.saves.spawn(async move {
            save_character(store.as_ref(), player_id, character).await;
        });
    }

    fn publish_snapshot(&self) {
        let registry = &self.state.registry;
        let snapshot = WorldSnapshot {
            players: registry.len(),
            in_world: registry.players().filter(|p| p.in_world()).count(),
            zones: self
                .state
                .zones
                .zones()
                .map(|z| ZonePopulation {
                    zone_id: z.id,
                    name: z.name.clone(),
                    players: z.population(),
                })
                .collect(),
            simulated_ms: self.state.zones.simulated_time().as_millis() as u64,
        };
        *self.snapshot.write() = snapshot;
    }

    /// Stop ticking, close every connection and save every bound character
    async fn shutdown(&mut self) {
        self.sim.stop();

        let players = self.state.registry.drain();
        info!(players = players.len(), "World shutting down");

        for player in players {
            self.state
                .zones
                .remove_player_from_zone(&player.id, player.zone_id);
            player.connection.close();
            self.persist(player);
        }

        info!(pending = self.saves.len(), "Waiting for character saves");
        while let Some(result) = self.saves.join_next().await {
            log_save_join(result);
        }

        self.publish_snapshot();
        info!("World stopped");
    }
}

async fn save_character(store: &dyn CharacterStore, player_id: PlayerId, character: Character) {
    let character_id = character.id;
    match store.save(character).await {
        Ok(()) => debug!(player_id = %player_id, character_id, "Character saved"),
        Err(e) => warn!(
            player_id = %player_id,
            character_id,
            error = %e,
            "Failed to save character"
        ),
    }
}

fn log_save_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Character save task failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::Outbound;
    use crate::game::registry::DEFAULT_INACTIVITY_TIMEOUT;
    use crate::game::zone::default_layout;
    use crate::services::auth::tests::{claims_for, sign};
    use crate::services::{BinaryChatFormatter, JwtAuthenticator, PassiveRules};
    use crate::store::{InMemoryCharacterStore, StoreError};
    use crate::ws::protocol::{
        AuthRequest, AuthResponse, MoveRequest, Packet, Vec3, MAX_PAYLOAD_LEN,
    };
    use futures::future::BoxFuture;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    const SECRET: &str = "world-secret";

    /// Saves take five seconds
    #[derive(Clone, Default)]
    struct SlowStore {
        inner: InMemoryCharacterStore,
    }

    impl CharacterStore for SlowStore {
        fn load_for_account(
            &self,
            account_id: Uuid,
        ) -> BoxFuture<'_, Result<Option<Character>, StoreError>> {
            self.inner.load_for_account(account_id)
        }

        fn save(&self, character: Character) -> BoxFuture<'_, Result<(), StoreError>> {
            Box::pin(async move {
                sleep(Duration::from_secs(5)).await;
                self.inner.insert(character);
                Ok(())
            })
        }
    }

    fn spawn_world(store: InMemoryCharacterStore) -> (WorldHandle, JoinHandle<()>) {
        let (world, handle) = build_world(Arc::new(store));
        (handle, tokio::spawn(world.run()))
    }

    fn build_world(store: Arc<dyn CharacterStore>) -> (World, WorldHandle) {
        let services = Services {
            auth: Arc::new(JwtAuthenticator::new(SECRET, store.clone())),
            rules: Arc::new(PassiveRules),
            chat: Arc::new(BinaryChatFormatter),
            store,
        };
        let state = WorldState::new(
            PlayerRegistry::new(1, DEFAULT_INACTIVITY_TIMEOUT),
            ZoneIndex::from_definitions(default_layout()).unwrap(),
        );
        World::new(state, services)
    }

    fn seed(store: &InMemoryCharacterStore, id: u64, position: Vec3) -> Uuid {
        let account_id = Uuid::new_v4();
        store.insert(Character {
            id,
            account_id,
            name: format!("hero-{}", id),
            position,
            rotation: 0.0,
        });
        account_id
    }

    fn packets(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(Outbound::Frame(bytes)) = rx.try_recv() {
            out.push(protocol::decode(&bytes).unwrap());
        }
        out
    }

    async fn enter(
        handle: &WorldHandle,
        account: Uuid,
    ) -> (PlayerId, mpsc::Receiver<Outbound>) {
        let (connection, mut rx) = Connection::new(256);
        let id = handle.connect(connection).await.unwrap();
        let token = sign(&claims_for(account), SECRET);
        let auth = protocol::encode(PacketType::Auth, 1, &AuthRequest { token }.to_payload())
            .unwrap();
        handle.packet(id, auth).await.unwrap();

        // Let the auth task and its completion command run
        sleep(Duration::from_millis(1)).await;
        let response = packets(&mut rx)
            .into_iter()
            .find(|p| p.packet_type() == Some(PacketType::AuthResponse))
            .unwrap();
        assert!(matches!(
            AuthResponse::parse(&response.payload).unwrap(),
            AuthResponse::Accepted { .. }
        ));
        (id, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn players_in_the_same_zone_see_each_other() {
        let store = InMemoryCharacterStore::new();
        let a_account = seed(&store, 1, Vec3::new(0.0, 0.0, 0.0));
        let b_account = seed(&store, 2, Vec3::new(10.0, 0.0, 0.0));
        let c_account = seed(&store, 3, Vec3::new(1000.0, 0.0, 0.0));
        let (handle, _task) = spawn_world(store);

        let (a, mut a_rx) = enter(&handle, a_account).await;
        let (b, mut b_rx) = enter(&handle, b_account).await;
        let (_c, mut c_rx) = enter(&handle, c_account).await;

        assert_ok!(handle.start_simulation(20).await);
        sleep(Duration::from_millis(60)).await;

        let seen_by_a: Vec<_> = packets(&mut a_rx)
            .into_iter()
            .filter(|p| p.packet_type() == Some(PacketType::PlayerState))
            .map(|p| PlayerStateUpdate::parse(&p.payload).unwrap().player_id)
            .collect();
        assert_eq!(seen_by_a, vec![b]);

        let seen_by_b: Vec<_> = packets(&mut b_rx)
            .into_iter()
            .filter(|p| p.packet_type() == Some(PacketType::PlayerState))
            .map(|p| PlayerStateUpdate::parse(&p.payload).unwrap().player_id)
            .collect();
        assert_eq!(seen_by_b, vec![a]);

        assert!(packets(&mut c_rx)
            .iter()
            .all(|p| p.packet_type() != Some(PacketType::PlayerState)));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.players, 3);
        assert_eq!(snapshot.in_world, 3);
        assert_eq!(snapshot.zones[0].players, 2);
        assert_eq!(snapshot.zones[1].players, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_players_are_evicted_and_saved() {
        let store = InMemoryCharacterStore::new();
        let account = seed(&store, 7, Vec3::new(0.0, 0.0, 0.0));
        let (handle, _task) = spawn_world(store.clone());

        let (id, mut rx) = enter(&handle, account).await;
        let moved = MoveRequest {
            position: Vec3::new(4.0, 0.0, 4.0),
            rotation: 1.0,
        };
        let frame = protocol::encode(PacketType::Move, 2, &moved.to_payload()).unwrap();
        handle.packet(id, frame).await.unwrap();

        handle.start_simulation(20).await.unwrap();
        sleep(Duration::from_millis(29_000)).await;
        assert_eq!(handle.snapshot().players, 1);

        sleep(Duration::from_millis(1_100)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.players, 0);
        assert!(snapshot.zones.iter().all(|z| z.players == 0));

        let mut closed = false;
        while let Ok(message) = rx.try_recv() {
            closed |= message == Outbound::Close;
        }
        assert!(closed);
        assert_eq!(store.get(&account).unwrap().position, Vec3::new(4.0, 0.0, 4.0));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_from_zone() {
        let (handle, _task) = spawn_world(InMemoryCharacterStore::new());
        let (connection, _rx) = Connection::new(8);
        let id = handle.connect(connection).await.unwrap();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.snapshot().zones[0].players, 1);

        handle.disconnect(id).await.unwrap();
        sleep(Duration::from_millis(1)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.players, 0);
        assert_eq!(snapshot.zones[0].players, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_tick_rate_is_reported() {
        let (handle, _task) = spawn_world(InMemoryCharacterStore::new());
        assert!(matches!(
            handle.start_simulation(0).await,
            Err(WorldError::Loop(LoopError::InvalidTickRate(0)))
        ));
        assert!(!handle.stats().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_saves_and_closes() {
        let store = InMemoryCharacterStore::new();
        let account = seed(&store, 9, Vec3::new(1.0, 1.0, 1.0));
        let (handle, task) = spawn_world(store.clone());
        let (_id, mut rx) = enter(&handle, account).await;

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let mut closed = false;
        while let Ok(message) = rx.try_recv() {
            closed |= message == Outbound::Close;
        }
        assert!(closed);
        assert!(handle.snapshot().players == 0);
        assert!(matches!(
            handle.packet(Uuid::new_v4(), Bytes::new()).await,
            Err(WorldError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_saves_started_by_disconnect() {
        let store = SlowStore::default();
        let account = seed(&store.inner, 5, Vec3::new(2.0, 0.0, 0.0));
        let (world, handle) = build_world(Arc::new(store.clone()));
        let task = tokio::spawn(world.run());

        let (id, _rx) = enter(&handle, account).await;
        let moved = MoveRequest {
            position: Vec3::new(4.0, 0.0, 4.0),
            rotation: 0.0,
        };
        let frame = protocol::encode(PacketType::Move, 2, &moved.to_payload()).unwrap();
        handle.packet(id, frame).await.unwrap();
        handle.disconnect(id).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(
            store.inner.get(&account).unwrap().position,
            Vec3::new(4.0, 0.0, 4.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_do_not_stop_the_simulation() {
        let (mut world, handle) = build_world(Arc::new(InMemoryCharacterStore::new()));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = seen.clone();
        world.tick_hook = Some(Box::new(move |tick: u64| -> Result<(), TickError> {
            record.lock().push(tick);
            match tick {
                2 => panic!("tick {} exploded", tick),
                4 => {
                    let oversized = vec![0u8; MAX_PAYLOAD_LEN + 1];
                    Err(protocol::encode(PacketType::PlayerState, 0, &oversized)
                        .unwrap_err()
                        .into())
                }
                _ => Ok(()),
            }
        }));
        let _task = tokio::spawn(world.run());

        assert_ok!(handle.start_simulation(10).await);
        sleep(Duration::from_millis(1_050)).await;

        let ticks = handle.stats().tick_count();
        assert!(handle.stats().is_running());
        assert!(ticks >= 9, "only {} ticks", ticks);
        let seen = seen.lock().clone();
        assert_eq!(seen, (1..=ticks).collect::<Vec<u64>>());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");
    }
}
