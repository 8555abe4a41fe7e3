//! Turn and round lifecycle for the player queue.
//!
//! Every round gets a number. Timers and shot failsafes capture the player and round they
//! were started for and do nothing once the round has moved on.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::{AppConfig, ShotSettings, SteppersConfig, TurnSettings, WheelsConfig},
    controller::{EventBus, MachineControl, Strobe},
    error::ServiceError,
    protocol::{Axis, MachineEvent, events::SENSOR_BALL_RETURN},
    scheduler::{CommandKind, CommandScheduler, QueueEvent, QueuedCommand},
    services::{
        command_parser::{CommandParser, Wheel},
        notifier::{ChatSink, MovementRecord, RecordSink},
    },
    state::{
        ActiveShooter, PlayerQueue, PlayerSession, SessionTracker, TurnEvent, TurnPhase,
        TurnStateMachine,
    },
};

/// Lifecycle notifications, mirrored onto the SSE stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnNotification {
    /// A player received the machine.
    RoundStarted {
        /// Player holding the round.
        player: String,
        /// Round number.
        round: u64,
    },
    /// A player's turn ended normally.
    TurnEnded {
        /// Player whose turn ended.
        player: String,
    },
    /// An idle player was removed from the queue.
    PlayerEvicted {
        /// Removed player.
        player: String,
    },
    /// A shot never resolved and was written off.
    BallEscaped {
        /// Player who shot.
        player: Option<String>,
    },
    /// Nobody is left in the queue.
    QueueEmpty,
}

/// Result of a `play` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Zero-based position in the queue.
    pub position: usize,
    /// The player was queued already.
    pub already_queued: bool,
}

/// Read-only view of the lifecycle for status endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TurnSnapshot {
    /// Current lifecycle phase.
    pub phase: TurnPhase,
    /// Current round number.
    pub round: u64,
    /// Player holding the turn.
    pub current_player: Option<String>,
    /// Queue in order.
    pub queue: Vec<String>,
    /// Shots taken this round.
    pub balls_shot: u32,
    /// A shot is waiting for the machine to resolve it.
    pub shot_in_flight: bool,
    /// The current player has sent something this round.
    pub has_played: bool,
}

struct TurnState {
    queue: PlayerQueue,
    lifecycle: TurnStateMachine,
    round: u64,
    shooter: ActiveShooter,
    has_played: bool,
    drop_in_queue: bool,
    round_started_at: Instant,
}

impl TurnState {
    fn is_current(&self, username: &str) -> bool {
        self.queue.current_player().as_deref() == Some(username)
    }

    fn round_active(&self) -> bool {
        matches!(self.lifecycle.phase(), TurnPhase::RoundActive { .. })
    }

    fn end_turn(&mut self) {
        if let Err(err) = self.lifecycle.apply(TurnEvent::TurnEnded) {
            debug!(error = %err, "turn already ended");
        }
    }

    fn remove_player(&mut self, username: &str) {
        self.queue.remove(username);
        if let Err(err) = self.lifecycle.apply(TurnEvent::PlayerRemoved) {
            debug!(error = %err, "player removed outside of a round");
        }
    }
}

/// Owns the player queue and drives rounds on one machine.
pub struct TurnController {
    machine: Arc<dyn MachineControl>,
    scheduler: Arc<CommandScheduler>,
    parser: CommandParser,
    sessions: SessionTracker,
    chat: Arc<dyn ChatSink>,
    records: Arc<dyn RecordSink>,
    settings: TurnSettings,
    shot: ShotSettings,
    steppers: SteppersConfig,
    wheels: WheelsConfig,
    strobe: Strobe,
    machine_name: String,
    state: Mutex<TurnState>,
    generation: watch::Sender<u64>,
    events: EventBus<TurnNotification>,
}

impl TurnController {
    /// Build the controller and subscribe it to shot and machine events.
    pub fn new(
        config: &AppConfig,
        machine: Arc<dyn MachineControl>,
        scheduler: Arc<CommandScheduler>,
        chat: Arc<dyn ChatSink>,
        records: Arc<dyn RecordSink>,
    ) -> Arc<Self> {
        let (generation, _receiver) = watch::channel(0);
        let controller = Arc::new(Self {
            machine,
            scheduler,
            parser: CommandParser::from_config(config),
            sessions: SessionTracker::new(),
            chat,
            records,
            settings: config.turn.clone(),
            shot: config.shot.clone(),
            steppers: config.steppers.clone(),
            wheels: config.wheels.clone(),
            strobe: config.strobe,
            machine_name: config.machine.name.clone(),
            state: Mutex::new(TurnState {
                queue: PlayerQueue::new(config.turn.max_queue_size),
                lifecycle: TurnStateMachine::new(),
                round: 0,
                shooter: ActiveShooter::default(),
                has_played: false,
                drop_in_queue: false,
                round_started_at: Instant::now(),
            }),
            generation,
            events: EventBus::new(),
        });

        let weak = Arc::downgrade(&controller);
        controller.scheduler.events().subscribe(move |event| {
            if let Some(controller) = weak.upgrade() {
                match event {
                    QueueEvent::ShotReleased {
                        username,
                        round,
                        token,
                    } => controller.on_shot_released(username, *round, *token),
                }
            }
        });

        let weak = Arc::downgrade(&controller);
        controller.machine.events().subscribe(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.on_machine_event(event);
            }
        });

        controller
    }

    /// Lifecycle notifications.
    pub fn events(&self) -> &EventBus<TurnNotification> {
        &self.events
    }

    /// Per-player session memory.
    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Chat command prefix.
    pub fn command_prefix(&self) -> &str {
        &self.settings.command_prefix
    }

    /// Current round number.
    pub fn current_round(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Player holding the turn.
    pub fn current_player(&self) -> Option<String> {
        self.lock().queue.current_player()
    }

    /// Current lifecycle view.
    pub fn snapshot(&self) -> TurnSnapshot {
        let state = self.lock();
        TurnSnapshot {
            phase: state.lifecycle.phase(),
            round: state.round,
            current_player: state.queue.current_player(),
            queue: state.queue.players(),
            balls_shot: state.shooter.balls_shot,
            shot_in_flight: state.shooter.shot.is_some(),
            has_played: state.has_played,
        }
    }

    /// Queue `username`; the first player in an empty queue starts a round.
    pub fn join(self: &Arc<Self>, username: &str) -> Result<JoinOutcome, ServiceError> {
        let (position, idle_player) = {
            let mut state = self.lock();
            if let Some(position) = state.queue.index_of(username) {
                drop(state);
                self.reply(&format!("{username}, you're already in the queue"));
                return Ok(JoinOutcome {
                    position,
                    already_queued: true,
                });
            }

            if state.queue.is_empty() {
                state.drop_in_queue = false;
                self.scheduler.set_ignore_commands(false);
            }

            let position = match state.queue.add(username) {
                Ok(position) => position,
                Err(err) => {
                    drop(state);
                    self.reply(&format!("{username}, the queue is full"));
                    return Err(err.into());
                }
            };

            let grace_passed = state.round_started_at.elapsed() >= self.settings.grace();
            let idle_player = match state.queue.current_player() {
                Some(idle) if position > 0 && !state.has_played && grace_passed => {
                    state.end_turn();
                    state.remove_player(&idle);
                    Some(idle)
                }
                _ => None,
            };
            let position = state.queue.index_of(username).unwrap_or(position);
            (position, idle_player)
        };

        info!(%username, position, "player joined");
        if let Some(idle) = idle_player {
            self.evicted(&idle);
            let next = self.lock().queue.next_player();
            self.start_round(next);
        } else if position == 0 {
            self.start_round(Some(username.to_string()));
        } else if position == 1 {
            self.reply(&format!("{username}, you're next in line"));
        } else {
            self.reply(&format!("{username}, you're #{position} in line"));
        }

        Ok(JoinOutcome {
            position,
            already_queued: false,
        })
    }

    /// Remove `username` from the queue; the current player hands the turn on.
    pub fn leave(self: &Arc<Self>, username: &str) -> bool {
        let (is_current, follower) = {
            let mut state = self.lock();
            let Some(index) = state.queue.index_of(username) else {
                return false;
            };
            if state.is_current(username) && state.round_active() {
                let players = state.queue.players();
                let follower = players
                    .get((index + 1) % players.len())
                    .filter(|next| next.as_str() != username)
                    .cloned();
                (true, follower)
            } else {
                state.queue.remove(username);
                (false, None)
            }
        };

        info!(%username, "player left");
        if is_current {
            if let Err(err) = self.gift_turn(username, follower.as_deref()) {
                warn!(error = %err, %username, "failed to hand over turn");
            }
        } else if self.lock().queue.is_empty() {
            self.start_round(None);
        }
        true
    }

    /// Hand the current turn to `next`, or give it up when `next` is `None`.
    pub fn gift_turn(self: &Arc<Self>, current: &str, next: Option<&str>) -> Result<(), ServiceError> {
        if next == Some(current) {
            return Err(ServiceError::InvalidInput(
                "cannot gift a turn to yourself".into(),
            ));
        }

        {
            let mut state = self.lock();
            if !state.is_current(current) {
                return Err(ServiceError::InvalidState(format!(
                    "{current} does not hold the turn"
                )));
            }
            match next {
                None => state.remove_player(current),
                Some(next) => {
                    state.end_turn();
                    state.queue.replace_player(current, next);
                    state.queue.select_player(next);
                }
            }
        }

        match next {
            None => {
                info!(%current, "turn given up");
                self.start_round(None);
            }
            Some(next) => {
                info!(%current, %next, "turn gifted");
                self.reply(&format!("{current} gifted their turn to {next}"));
                self.start_round(Some(next.to_string()));
            }
        }
        Ok(())
    }

    /// Flip the machine lights for the current player; returns the new state.
    pub async fn toggle_lights(&self, username: &str) -> Result<bool, ServiceError> {
        {
            let mut state = self.lock();
            if !state.is_current(username) {
                return Err(ServiceError::InvalidState(format!(
                    "{username} does not hold the turn"
                )));
            }
            state.has_played = true;
        }

        let on = !self.machine.is_lit();
        self.machine.light_switch(on).await?;
        info!(%username, on, "lights toggled");
        Ok(on)
    }

    /// Run the configured light show for the current player.
    pub async fn strobe_lights(&self, username: &str) -> Result<(), ServiceError> {
        if !self.lock().is_current(username) {
            return Err(ServiceError::InvalidState(format!(
                "{username} does not hold the turn"
            )));
        }

        self.machine.strobe(self.strobe).await?;
        debug!(%username, count = self.strobe.count, "strobe fired");
        Ok(())
    }

    /// Handle free text from a player; returns how many commands were queued.
    pub fn handle_message(self: &Arc<Self>, username: &str, text: &str) -> Result<usize, ServiceError> {
        let text = text.trim().to_lowercase();
        let round = {
            let mut state = self.lock();
            if !state.is_current(username) || !state.round_active() {
                return Ok(0);
            }
            state.has_played = true;
            state.round
        };

        if let Some(nickname) = text.strip_prefix("gift turn ") {
            let nickname = nickname.trim();
            if !nickname.is_empty() && nickname != username {
                self.gift_turn(username, Some(nickname))?;
            }
            return Ok(0);
        }

        if self.scheduler.is_ignoring_commands() {
            debug!(%username, "shot in flight; ignoring input");
            return Ok(0);
        }

        if CommandParser::is_single(&text) {
            self.handle_single(username, &text)
        } else {
            self.handle_chain(username, &text, round)
        }
    }

    fn handle_single(self: &Arc<Self>, username: &str, text: &str) -> Result<usize, ServiceError> {
        let command = match self.parser.parse(username, text) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(0),
            Err(err) => {
                self.reply(&err.to_string());
                return Err(err.into());
            }
        };

        if command.kind == CommandKind::Shoot {
            let mut state = self.lock();
            if state.drop_in_queue {
                return Ok(0);
            }
            state.drop_in_queue = true;
        }

        self.count_single_command(username);
        self.queue_command(command, text);
        self.scheduler.process_queue();
        Ok(1)
    }

    fn handle_chain(
        self: &Arc<Self>,
        username: &str,
        text: &str,
        round: u64,
    ) -> Result<usize, ServiceError> {
        let chain = match self.parser.split_chain(text) {
            Ok(chain) => chain,
            Err(err) => {
                debug!(error = %err, %username, "not a command chain");
                return Err(err.into());
            }
        };
        if chain.wheels.is_empty() && chain.commands.is_empty() {
            return Ok(0);
        }

        self.sessions
            .update(username, |session| session.knows_multiple = true);

        let mut queued = 0;
        for wheel in &chain.wheels {
            match self.parser.parse(username, wheel) {
                Ok(Some(command)) => {
                    self.queue_command(command, wheel);
                    queued += 1;
                }
                Ok(None) => {}
                Err(err) => self.reply(&err.to_string()),
            }
        }

        for token in &chain.commands {
            if self.current_round() != round {
                break;
            }
            match self.parser.parse(username, token) {
                Ok(Some(command)) => {
                    let shoot = command.kind == CommandKind::Shoot;
                    if shoot {
                        self.lock().drop_in_queue = true;
                    }
                    self.queue_command(command, token);
                    queued += 1;
                    if shoot {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => self.reply(&err.to_string()),
            }
        }

        self.scheduler.process_queue();
        Ok(queued)
    }

    /// Begin a new round for `player`, or idle the machine when nobody is left.
    pub fn start_round(self: &Arc<Self>, player: Option<String>) {
        let round = {
            let mut state = self.lock();
            state.round += 1;
            state.has_played = false;
            state.drop_in_queue = false;
            state.round_started_at = Instant::now();
            state.shooter = ActiveShooter::default();
            let round = state.round;

            match &player {
                Some(player) => {
                    if state.round_active() {
                        state.end_turn();
                    }
                    let started = TurnEvent::RoundStarted {
                        player: player.clone(),
                        round,
                    };
                    if let Err(err) = state.lifecycle.apply(started) {
                        warn!(error = %err, "round start rejected");
                    }
                }
                None => {
                    state.queue.clear();
                    if let Err(err) = state.lifecycle.apply(TurnEvent::QueueEmptied) {
                        warn!(error = %err, "failed to idle the lifecycle");
                    }
                }
            }
            round
        };

        self.generation.send_replace(round);
        self.scheduler.clear();
        self.scheduler.set_ignore_commands(false);

        let Some(player) = player else {
            info!(round, "queue empty; idling machine");
            self.events.dispatch(&TurnNotification::QueueEmpty);
            let machine = Arc::clone(&self.machine);
            tokio::spawn(async move {
                if let Err(err) = machine.stop().await {
                    warn!(error = %err, "failed to idle machine");
                }
            });
            return;
        };

        info!(%player, round, "round started");
        self.events.dispatch(&TurnNotification::RoundStarted {
            player: player.clone(),
            round,
        });
        self.reply(&format!("{player}, it's your turn!"));
        self.restore_session(&player);
        self.scheduler.process_queue();

        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.run_round_timers(player, round).await });
    }

    async fn run_round_timers(self: Arc<Self>, player: String, round: u64) {
        let grace = self.settings.grace();
        if !self.wait_in_round(round, grace).await {
            return;
        }

        let evicted = {
            let mut state = self.lock();
            if state.round != round || !state.is_current(&player) {
                return;
            }
            if !state.has_played && state.queue.len() > 1 {
                state.end_turn();
                state.remove_player(&player);
                Some(state.queue.next_player())
            } else {
                None
            }
        };
        if let Some(next) = evicted {
            self.evicted(&player);
            self.start_round(next);
            return;
        }

        let remaining = self.settings.duration().saturating_sub(grace);
        if !self.wait_in_round(round, remaining).await {
            return;
        }

        let (played, next) = {
            let mut state = self.lock();
            if state.round != round || !state.is_current(&player) {
                return;
            }
            if state.shooter.shot.is_some() {
                debug!(%player, round, "turn time up during a shot; waiting for resolution");
                return;
            }
            state.end_turn();
            let played = state.has_played;
            if !played {
                state.remove_player(&player);
            }
            (played, state.queue.next_player())
        };

        if played {
            info!(%player, round, "turn time up");
            self.events
                .dispatch(&TurnNotification::TurnEnded { player });
        } else {
            self.evicted(&player);
        }
        self.start_round(next);
    }

    /// Sleep for `duration` unless the round changes first; true when still in `round`.
    async fn wait_in_round(&self, round: u64, duration: Duration) -> bool {
        let mut generation = self.generation.subscribe();
        let elapsed = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = generation.wait_for(|current| *current != round) => false,
        };
        elapsed && self.current_round() == round
    }

    fn on_shot_released(self: &Arc<Self>, username: &str, round: u64, token: Uuid) {
        {
            let mut state = self.lock();
            if state.round != round || !state.is_current(username) {
                debug!(%username, round, current = state.round, "dropping shot from a finished round");
                return;
            }
            let shooter = &mut state.shooter;
            if shooter.username.as_deref() != Some(username) || shooter.round != round {
                *shooter = ActiveShooter {
                    username: Some(username.to_string()),
                    round,
                    ..ActiveShooter::default()
                };
            }
            shooter.balls_shot += 1;
            shooter.shot = Some(token);
            shooter.ball_return_triggered = false;
            shooter.flap_set_triggered = false;
        }

        debug!(%username, round, %token, "shot released");
        let left = self.parser.wheel_speed(Wheel::Left);
        let right = self.parser.wheel_speed(Wheel::Right);
        self.sessions.update(username, |session| {
            session.drops += 1;
            session.wheel_left = left;
            session.wheel_right = right;
        });

        if !self.machine.kind().is_claw() {
            let controller = Arc::clone(self);
            let username = username.to_string();
            tokio::spawn(async move { controller.capture_positions(&username).await });
        }

        let controller = Arc::clone(self);
        let escape_timeout = Duration::from_millis(self.shot.escape_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(escape_timeout).await;
            let player = {
                let state = controller.lock();
                if state.shooter.shot != Some(token) {
                    return;
                }
                state.shooter.username.clone()
            };
            warn!(?player, %token, "ball escaped; treating it as returned");
            controller
                .events
                .dispatch(&TurnNotification::BallEscaped { player });
            controller.resolve_shot(token);
        });
    }

    async fn capture_positions(&self, username: &str) {
        for axis in Axis::ALL {
            match self.machine.location(axis).await {
                Ok(position) => {
                    self.sessions.update(username, |session| match axis {
                        Axis::LeftRight => session.position_lr = position,
                        Axis::Pan => session.position_pan = position,
                    });
                }
                Err(err) => debug!(error = %err, ?axis, "could not read position"),
            }
        }
    }

    fn on_machine_event(self: &Arc<Self>, event: &MachineEvent) {
        let require_flap = self.shot.require_flap_set;
        let resolved = {
            let mut state = self.lock();
            let shooter = &mut state.shooter;
            let Some(token) = shooter.shot else {
                return;
            };
            match event {
                MachineEvent::ScoreSensor { sensor } if *sensor == SENSOR_BALL_RETURN => {
                    shooter.ball_return_triggered = true;
                }
                MachineEvent::BallReturned => shooter.ball_return_triggered = true,
                MachineEvent::FlapSet => shooter.flap_set_triggered = true,
                MachineEvent::ClawCentered => {
                    shooter.ball_return_triggered = true;
                    shooter.flap_set_triggered = true;
                }
                _ => return,
            }
            let done = shooter.ball_return_triggered && (!require_flap || shooter.flap_set_triggered);
            done.then_some(token)
        };

        if let Some(token) = resolved {
            self.resolve_shot(token);
        }
    }

    /// Settle the shot identified by `token` and either hand the turn on or keep playing.
    fn resolve_shot(self: &Arc<Self>, token: Uuid) {
        let advance = {
            let mut state = self.lock();
            if state.shooter.shot != Some(token) {
                return;
            }
            state.shooter.clear_shot();
            state.drop_in_queue = false;
            self.machine.clear_play();

            let exhausted = state.round_started_at.elapsed() >= self.settings.duration();
            let all_shot = state.shooter.balls_shot >= self.settings.balls_per_turn;
            if exhausted || all_shot {
                let player = state.queue.current_player();
                state.end_turn();
                Some((player, state.queue.next_player()))
            } else {
                None
            }
        };

        self.scheduler.set_ignore_commands(false);
        match advance {
            Some((player, next)) => {
                if let Some(player) = player {
                    info!(%player, "turn complete");
                    self.events
                        .dispatch(&TurnNotification::TurnEnded { player });
                }
                self.start_round(next);
            }
            None => {
                self.scheduler.process_queue();
            }
        }
    }

    fn restore_session(&self, player: &str) {
        let session = self.sessions.get_or_insert(player, self.default_session());
        if self.machine.kind().is_claw() {
            return;
        }

        let round = self.current_round();
        let restore = [
            format!("wl {}", session.wheel_left),
            format!("wr {}", session.wheel_right),
            format!("mt {}", session.position_lr),
            format!("pt {}", session.position_pan),
        ];
        for text in restore {
            match self.parser.parse(player, &text) {
                Ok(Some(command)) => self.scheduler.enqueue(command.in_round(round)),
                Ok(None) => {}
                Err(err) => debug!(error = %err, %player, command = %text, "skipped restoring setting"),
            }
        }
    }

    fn default_session(&self) -> PlayerSession {
        PlayerSession {
            wheel_left: self.wheels.left.default_speed,
            wheel_right: self.wheels.right.default_speed,
            position_lr: self.steppers.lr.default_position,
            position_pan: self.steppers.pan.default_position,
            drops: 0,
            knows_multiple: false,
            single_command_uses: 0,
        }
    }

    fn count_single_command(&self, username: &str) {
        let threshold = self.settings.single_command_hint_after;
        let mut hint = false;
        self.sessions.update(username, |session| {
            if session.knows_multiple {
                return;
            }
            session.single_command_uses += 1;
            if session.single_command_uses > threshold {
                session.single_command_uses = 0;
                hint = true;
            }
        });
        if hint {
            self.reply(&format!(
                "{username}, you can send up to {} commands in one message, like `l l tr s`",
                self.settings.max_commands_per_line
            ));
        }
    }

    fn queue_command(&self, command: QueuedCommand, text: &str) {
        let record = MovementRecord::new(&command.username, text, &self.machine_name);
        let round = self.lock().round;
        self.scheduler.enqueue(command.in_round(round));

        let persist = self.records.persist(record);
        tokio::spawn(async move {
            if let Err(err) = persist.await {
                warn!(error = %err, "failed to persist movement record");
            }
        });
    }

    fn evicted(&self, player: &str) {
        info!(%player, "idle player removed");
        self.events.dispatch(&TurnNotification::PlayerEvicted {
            player: player.to_string(),
        });
        self.reply(&format!("{player} was removed from the queue for not playing"));
    }

    fn reply(&self, message: &str) {
        self.chat.send_message(&self.settings.chat_channel, message);
    }

    fn lock(&self) -> MutexGuard<'_, TurnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
