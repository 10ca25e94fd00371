//! Game orchestrator.
//!
//! Wires the sync client to the world in both directions and owns frame
//! scheduling:
//! - inbound unit messages become world writes tagged [`ChangeOrigin::Server`]
//! - local destination changes and arrivals become outbound commands
//! - host frame callbacks are throttled to the configured fps
//!
//! Everything runs on one task; [`Game::run`] multiplexes host frames, socket
//! events, the retry deadline and user commands with `select!`.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Span};
use world_shared::{
    config::ClientConfig,
    math::{Coordinate, Ray},
    net::{
        ClientCommand, CreateUnit, GameStateSnapshot, GroundPos, RemoveUnit, SetUnitDestination,
        SetUnitPosition,
    },
    scene::{Scene, VisualFactory},
};

use crate::{
    frame::{FrameLimiter, Update},
    game_object::{GameObject, MovementController},
    game_world::{ChangeOrigin, GameWorld},
    input::{apply_pointer, PointerButton, PointerEvent},
    sync::{CommandSender, ConnectionState, SyncClient, SyncEvent},
    transport::Transport,
    world_data::{GameObjectWorldData, WorldDataChange, WorldField},
};

/// Height at which units stand on the ground plane.
pub const UNIT_HEIGHT: f32 = 0.1;

/// Model requested from the visual factory for every unit.
pub const UNIT_MODEL: &str = "unit";

/// A command typed by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    CreateUnit { x: f32, z: f32 },
    Pointer(PointerEvent),
    Status,
}

impl UserCommand {
    /// Parses one console line: `create x z`, `click x z`, `rclick x z`,
    /// `hover x z` or `status`.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        if verb == "status" {
            return Ok(UserCommand::Status);
        }

        let mut coord = |name: &str| -> anyhow::Result<f32> {
            parts
                .next()
                .with_context(|| format!("{verb}: missing {name}"))?
                .parse()
                .with_context(|| format!("{verb}: bad {name}"))
        };
        let (x, z) = match verb {
            "create" | "click" | "rclick" | "hover" => (coord("x")?, coord("z")?),
            other => bail!("unknown command: {other}"),
        };

        let ray = Ray::top_down(x, z);
        Ok(match verb {
            "create" => UserCommand::CreateUnit { x, z },
            "click" => UserCommand::Pointer(PointerEvent::Click {
                button: PointerButton::Primary,
                ray,
            }),
            "rclick" => UserCommand::Pointer(PointerEvent::Click {
                button: PointerButton::Secondary,
                ray,
            }),
            _ => UserCommand::Pointer(PointerEvent::Move(ray)),
        })
    }
}

/// World-side state handed to inbound message handlers.
pub struct Session {
    world: GameWorld,
    visuals: Box<dyn VisualFactory>,
    commands: CommandSender,
    speed: f32,
    label_interval: Duration,
    log: Span,
}

impl Session {
    pub fn world(&self) -> &GameWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut GameWorld {
        &mut self.world
    }

    /// Creates the unit or, if it already exists, moves it to the given
    /// state.
    pub fn upsert_unit(&mut self, id: &str, position: GroundPos, destination: Option<GroundPos>) {
        let destination = destination.unwrap_or(position);
        if self.world.game_object(id).is_some() {
            self.apply_position(id, position);
            self.apply_destination(id, destination);
            return;
        }

        let visual = match self.visuals.create(UNIT_MODEL, id) {
            Ok(visual) => visual,
            Err(e) => {
                warn!(parent: &self.log, id = %id, error = %format!("{e:#}"), "Could not create unit visual");
                return;
            }
        };

        let mut data = GameObjectWorldData::new(Coordinate::from_ground(position, UNIT_HEIGHT));
        data.set_destination(Coordinate::from_ground(destination, UNIT_HEIGHT));

        let commands = self.commands.clone();
        let log = self.log.clone();
        let movement = MovementController::new(self.speed).with_arrival_hook(Box::new(
            move |key: &str, data: &GameObjectWorldData| {
                let sent = commands.send(&ClientCommand::SetUnitPosition {
                    id: key.to_string(),
                    position: data.position().ground(),
                });
                if !sent && commands.is_connected() {
                    debug!(parent: &log, id = %key, "Arrival report not queued, socket writer gone");
                }
            },
        ));
        let obj = GameObject::moveable(id, visual, data, movement)
            .with_label_interval(self.label_interval);

        match self.world.add_game_object(obj) {
            Ok(()) => info!(parent: &self.log, id = %id, x = position.0, z = position.1, "Unit created"),
            Err(e) => warn!(parent: &self.log, error = %e, "Could not add unit"),
        }
    }

    /// Moves a unit on the ground plane, keeping its height.
    pub fn apply_position(&mut self, id: &str, position: GroundPos) {
        let Some(obj) = self.world.game_object(id) else {
            debug!(parent: &self.log, id = %id, "Position for unknown unit");
            return;
        };
        let y = obj.world_data().position().y;
        self.world.set_game_object_world_data(
            id,
            WorldDataChange::Position(Coordinate::from_ground(position, y)),
            ChangeOrigin::Server,
        );
    }

    /// Retargets a unit on the ground plane, keeping its destination height.
    pub fn apply_destination(&mut self, id: &str, destination: GroundPos) {
        let Some(obj) = self.world.game_object(id) else {
            debug!(parent: &self.log, id = %id, "Destination for unknown unit");
            return;
        };
        let y = obj.world_data().destination().y;
        self.world.set_game_object_world_data(
            id,
            WorldDataChange::Destination(Coordinate::from_ground(destination, y)),
            ChangeOrigin::Server,
        );
    }

    pub fn remove_unit(&mut self, id: &str) {
        if self.world.remove_game_object(id).is_some() {
            info!(parent: &self.log, id = %id, "Unit removed");
        }
    }
}

pub struct Game {
    session: Session,
    sync: SyncClient<Session>,
    limiter: FrameLimiter,
    update_targets: Vec<Box<dyn Update>>,
    host_refresh: Duration,
    log: Span,
}

impl Game {
    pub fn new(
        cfg: &ClientConfig,
        scene: Box<dyn Scene>,
        visuals: Box<dyn VisualFactory>,
        transport: Box<dyn Transport>,
        log: Span,
    ) -> Self {
        let mut sync = SyncClient::new(transport, cfg, log.clone());
        let commands = sync.command_sender();
        let mut world = GameWorld::new(scene, log.clone());

        let outbound = commands.clone();
        world.add_set_game_object_world_data_listener(
            WorldField::DESTINATION,
            Box::new(
                move |id: &str, data: &GameObjectWorldData, origin: ChangeOrigin| {
                    if origin == ChangeOrigin::Local {
                        outbound.send(&ClientCommand::SetUnitDestination {
                            id: id.to_string(),
                            destination: data.destination().ground(),
                        });
                    }
                },
            ),
        );

        sync.add_message_handler::<CreateUnit, _>(|s: &mut Session, m| {
            s.upsert_unit(&m.id, m.position, m.destination)
        });
        sync.add_message_handler::<SetUnitPosition, _>(|s: &mut Session, m| {
            s.apply_position(&m.id, m.position)
        });
        sync.add_message_handler::<SetUnitDestination, _>(|s: &mut Session, m| {
            s.apply_destination(&m.id, m.destination)
        });
        sync.add_message_handler::<RemoveUnit, _>(|s: &mut Session, m| s.remove_unit(&m.id));

        Self {
            session: Session {
                world,
                visuals,
                commands,
                speed: cfg.movement_speed,
                label_interval: Duration::from_millis(cfg.label_interval_ms),
                log: log.clone(),
            },
            sync,
            limiter: FrameLimiter::new(cfg.fps, 0.0),
            update_targets: Vec::new(),
            host_refresh: Duration::from_secs_f64(1.0 / f64::from(cfg.host_refresh_hz.max(1))),
            log,
        }
    }

    pub fn world(&self) -> &GameWorld {
        self.session.world()
    }

    pub fn world_mut(&mut self) -> &mut GameWorld {
        self.session.world_mut()
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn sync(&self) -> &SyncClient<Session> {
        &self.sync
    }

    /// Registers something else to tick after the world each frame.
    pub fn add_update_target(&mut self, target: Box<dyn Update>) {
        self.update_targets.push(target);
    }

    /// Asks the server to create a unit. Dropped while disconnected.
    pub fn create_unit(&self, x: f32, z: f32) -> bool {
        self.session
            .commands
            .send(&ClientCommand::CreateUnit { position: (x, z) })
    }

    /// Connects if needed, then seeds the world from the server's state,
    /// waiting for both. Returns whether the client is connected afterwards.
    ///
    /// [`run`](Self::run) does the same without waiting.
    pub async fn connect(&mut self) -> bool {
        if self.sync.is_connected() {
            return true;
        }
        if self.sync.connect_and_wait().await.is_err() {
            return false;
        }
        match self.sync.fetch_game_state().await {
            Ok(state) => self.seed(&state),
            Err(e) => warn!(parent: &self.log, error = %format!("{e:#}"), "Could not fetch game state"),
        }
        true
    }

    /// Upserts every unit in a server snapshot.
    fn seed(&mut self, state: &GameStateSnapshot) {
        info!(parent: &self.log, units = state.len(), "Game state fetched");
        for unit in state.values() {
            self.session
                .upsert_unit(&unit.id, unit.position, Some(unit.destination));
        }
    }

    /// Host frame callback. `now_ms` is milliseconds since the game started.
    /// Returns whether a frame ran.
    pub fn frame(&mut self, now_ms: f64) -> bool {
        let Some(delta) = self.limiter.poll(now_ms) else {
            return false;
        };
        self.session.world.update(now_ms, delta);
        for target in &mut self.update_targets {
            target.update(now_ms, delta);
        }
        true
    }

    /// Waits for the next socket frame, socket loss, retry deadline, or
    /// in-flight network result.
    pub async fn next_sync_event(&mut self) -> SyncEvent {
        self.sync.next_event().await
    }

    /// Applies one inbound socket frame.
    pub fn handle_message(&mut self, text: &str) {
        self.sync.dispatch(&mut self.session, text);
    }

    /// Reacts to one sync event without waiting on the network.
    pub fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Message(text) => self.handle_message(&text),
            SyncEvent::RetryDue => {
                self.sync.connect();
            }
            SyncEvent::Connected => self.sync.request_game_state(),
            SyncEvent::ConnectFailed => {}
            SyncEvent::GameState(state) => self.seed(&state),
            SyncEvent::ConnectionLost => self.sync.connection_lost(),
        }
    }

    pub fn handle_pointer(&mut self, event: &PointerEvent) {
        apply_pointer(&mut self.session.world, event);
    }

    /// Runs one user command and returns lines to show.
    pub fn exec(&mut self, cmd: UserCommand) -> Vec<String> {
        match cmd {
            UserCommand::CreateUnit { x, z } => {
                if self.create_unit(x, z) {
                    vec![format!("create ({x}, {z}) sent")]
                } else {
                    vec!["not connected, command dropped".to_string()]
                }
            }
            UserCommand::Pointer(event) => {
                self.handle_pointer(&event);
                Vec::new()
            }
            UserCommand::Status => self.status(),
        }
    }

    pub fn status(&self) -> Vec<String> {
        let mut lines = vec![
            format!("state: {:?}", self.sync.state()),
            format!("units: {}", self.world().len()),
        ];
        if self.sync.state() == ConnectionState::Disconnected && self.sync.attempt() > 0 {
            lines.push(format!("failed attempts: {}", self.sync.attempt()));
        }
        for obj in self.world().game_objects() {
            let data = obj.world_data();
            let (x, z) = data.position().ground();
            let (dx, dz) = data.destination().ground();
            let mut line = format!("  {} ({x:.1}, {z:.1}) -> ({dx:.1}, {dz:.1})", obj.key());
            if data.selected() {
                line.push_str(" [selected]");
            }
            lines.push(line);
        }
        lines
    }

    /// Drives the game until `commands` closes.
    ///
    /// Frames keep running while registration, the socket handshake or the
    /// state fetch are in flight.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<UserCommand>, mut output: impl FnMut(String)) {
        self.sync.connect();

        let started = Instant::now();
        let mut host = tokio::time::interval(self.host_refresh);
        host.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = host.tick() => {
                    self.frame(started.elapsed().as_secs_f64() * 1000.0);
                }
                event = self.sync.next_event() => self.handle_sync_event(event),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        for line in self.exec(cmd) {
                            output(line);
                        }
                    }
                    None => break,
                },
            }
        }
        info!(parent: &self.log, "Game loop stopped");
    }
}
