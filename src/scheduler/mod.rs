//! FIFO of player commands drained one at a time against a single machine.
//!
//! Movements on an axis wait for the previous movement on that axis to finish. A shoot
//! command discards everything queued behind it and blocks further draining until the
//! turn controller lifts the block.

pub mod command;
pub mod movement;

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

pub use self::command::{CommandKind, QueuedCommand};
pub use self::movement::MovementMonitor;

use crate::{
    config::SteppersConfig,
    controller::{ControllerResult, EventBus, MachineControl},
    protocol::{Axis, MachineEvent, MoveDirection},
};

/// Notifications raised by the drainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A shoot command reached the machine.
    ShotReleased {
        /// Player who shot.
        username: String,
        /// Round the shoot command was queued in.
        round: u64,
        /// Token identifying this shot until the machine resolves it.
        token: Uuid,
    },
}

/// Single-drainer command queue bound to one machine.
pub struct CommandScheduler {
    machine: Arc<dyn MachineControl>,
    queue: Mutex<VecDeque<QueuedCommand>>,
    draining: AtomicBool,
    ignore_commands: AtomicBool,
    lr_monitor: Arc<MovementMonitor>,
    pan_monitor: Arc<MovementMonitor>,
    events: EventBus<QueueEvent>,
}

impl CommandScheduler {
    /// Build a scheduler and hook it to the machine's move-complete events.
    pub fn new(machine: Arc<dyn MachineControl>, steppers: &SteppersConfig) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            machine,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            ignore_commands: AtomicBool::new(false),
            lr_monitor: MovementMonitor::new(
                Axis::LeftRight,
                steppers.get(Axis::LeftRight).fallback_timeout(),
            ),
            pan_monitor: MovementMonitor::new(Axis::Pan, steppers.get(Axis::Pan).fallback_timeout()),
            events: EventBus::new(),
        });

        let weak: Weak<Self> = Arc::downgrade(&scheduler);
        scheduler.machine.events().subscribe(move |event| {
            if let (Some(scheduler), MachineEvent::MoveComplete { axis, .. }) =
                (weak.upgrade(), event)
            {
                scheduler.monitor(*axis).complete();
            }
        });

        scheduler
    }

    /// Drainer notifications.
    pub fn events(&self) -> &EventBus<QueueEvent> {
        &self.events
    }

    /// Append a command.
    pub fn enqueue(&self, command: QueuedCommand) {
        trace!(kind = ?command.kind, username = %command.username, "command queued");
        self.lock_queue().push_back(command);
    }

    /// Drop every queued command.
    pub fn clear(&self) {
        self.lock_queue().clear();
    }

    /// Number of commands waiting.
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the waiting commands, head first.
    pub fn snapshot(&self) -> Vec<QueuedCommand> {
        self.lock_queue().iter().cloned().collect()
    }

    /// Whether player commands are currently blocked.
    pub fn is_ignoring_commands(&self) -> bool {
        self.ignore_commands.load(Ordering::SeqCst)
    }

    /// Block or unblock player commands.
    pub fn set_ignore_commands(&self, ignore: bool) {
        self.ignore_commands.store(ignore, Ordering::SeqCst);
    }

    /// Start a drainer unless one is already running or commands are blocked.
    pub fn process_queue(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.is_ignoring_commands() {
            trace!("commands blocked; not draining");
            return None;
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move { scheduler.drain().await }))
    }

    async fn drain(&self) {
        loop {
            let next = self.lock_queue().pop_front();
            match next {
                Some(command) => self.execute(command).await,
                None => {
                    self.draining.store(false, Ordering::SeqCst);
                    // A command may have landed between the pop and the flag reset.
                    let resume = !self.lock_queue().is_empty()
                        && self
                            .draining
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok();
                    if !resume {
                        return;
                    }
                }
            }
        }
    }

    async fn execute(&self, command: QueuedCommand) {
        let QueuedCommand {
            kind,
            argument1,
            argument2,
            ref username,
            round,
            ..
        } = command;
        debug!(?kind, argument1, argument2, %username, "executing command");

        let machine = &self.machine;
        let result = match kind {
            CommandKind::MoveLeft => {
                self.gated(kind, machine.move_axis(MoveDirection::Left, argument1))
                    .await
            }
            CommandKind::MoveRight => {
                self.gated(kind, machine.move_axis(MoveDirection::Right, argument1))
                    .await
            }
            CommandKind::TurnLeft => {
                self.gated(kind, machine.move_axis(MoveDirection::TurnLeft, argument1))
                    .await
            }
            CommandKind::TurnRight => {
                self.gated(kind, machine.move_axis(MoveDirection::TurnRight, argument1))
                    .await
            }
            CommandKind::MoveTo => {
                self.gated(kind, machine.move_to(Axis::LeftRight, argument1))
                    .await
            }
            CommandKind::PanTo => self.gated(kind, machine.move_to(Axis::Pan, argument1)).await,
            CommandKind::MoveForward => machine.move_axis(MoveDirection::Forward, argument1).await,
            CommandKind::MoveBackward => {
                machine.move_axis(MoveDirection::Backward, argument1).await
            }
            CommandKind::WheelSpeed => {
                let wheel = u8::try_from(argument1).unwrap_or_default();
                machine.set_wheel_speed(wheel, argument2).await
            }
            CommandKind::Shoot => self.shoot(username, round).await,
            CommandKind::NoOp => Ok(()),
        };

        if let Err(err) = result {
            warn!(error = %err, ?kind, %username, "command failed");
        }
    }

    /// Wait for the command's axis to settle, arm its monitor, then run `send`.
    async fn gated<F>(&self, kind: CommandKind, send: F) -> ControllerResult<()>
    where
        F: Future<Output = ControllerResult<()>>,
    {
        let gate = kind
            .axis()
            .filter(|_| self.machine.kind().tracks_axis_completion());
        if let Some(axis) = gate {
            let monitor = self.monitor(axis);
            monitor.wait_completed().await;
            monitor.arm();
        }
        send.await
    }

    async fn shoot(&self, username: &str, round: u64) -> ControllerResult<()> {
        self.set_ignore_commands(true);
        let dropped = {
            let mut queue = self.lock_queue();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            debug!(dropped, "shot flushed queued commands");
        }

        let token = Uuid::new_v4();
        if let Err(err) = self.machine.shoot().await {
            self.set_ignore_commands(false);
            return Err(err);
        }

        self.events.dispatch(&QueueEvent::ShotReleased {
            username: username.to_string(),
            round,
            token,
        });
        Ok(())
    }

    fn monitor(&self, axis: Axis) -> &Arc<MovementMonitor> {
        match axis {
            Axis::LeftRight => &self.lr_monitor,
            Axis::Pan => &self.pan_monitor,
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueuedCommand>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{protocol::MachineKind, testing::RecordingMachine};

    fn setup(kind: MachineKind) -> (Arc<RecordingMachine>, Arc<CommandScheduler>) {
        let machine = RecordingMachine::new(kind);
        let scheduler = CommandScheduler::new(machine.clone(), &SteppersConfig::default());
        (machine, scheduler)
    }

    fn cmd(kind: CommandKind, argument1: i32) -> QueuedCommand {
        QueuedCommand::new(kind, argument1, 0, "ada")
    }

    #[tokio::test(start_paused = true)]
    async fn same_axis_moves_wait_for_completion_or_fallback() {
        let (machine, scheduler) = setup(MachineKind::Skeeball);
        let started = tokio::time::Instant::now();

        scheduler.enqueue(cmd(CommandKind::MoveLeft, 300));
        scheduler.enqueue(cmd(CommandKind::MoveRight, 300));
        scheduler.enqueue(cmd(CommandKind::MoveLeft, 100));
        scheduler.process_queue().unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(machine.commands(), vec!["l 300"]);

        machine.events().dispatch(&MachineEvent::MoveComplete {
            axis: Axis::LeftRight,
            position: 4200,
        });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(machine.commands(), vec!["l 300", "r 300"]);

        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(machine.commands(), vec!["l 300", "r 300", "l 100"]);
        let third = machine.sent_at("l 100").unwrap();
        assert!(third - started >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn independent_axes_do_not_block_each_other() {
        let (machine, scheduler) = setup(MachineKind::Skeeball);

        scheduler.enqueue(cmd(CommandKind::MoveLeft, 300));
        scheduler.enqueue(cmd(CommandKind::TurnLeft, 40));
        scheduler.enqueue(cmd(CommandKind::PanTo, 800));
        scheduler.process_queue().unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(machine.commands(), vec!["l 300", "tl 40"]);

        machine.events().dispatch(&MachineEvent::MoveComplete {
            axis: Axis::Pan,
            position: 40,
        });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(machine.commands(), vec!["l 300", "tl 40", "mt 2 800"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shoot_flushes_commands_behind_it() {
        let (machine, scheduler) = setup(MachineKind::Skeeball);
        let shots = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&shots);
        scheduler
            .events()
            .subscribe(move |event: &QueueEvent| sink.lock().unwrap().push(event.clone()));

        scheduler.enqueue(QueuedCommand::new(CommandKind::WheelSpeed, 1, 200, "ada"));
        scheduler.enqueue(QueuedCommand::new(CommandKind::WheelSpeed, 2, 180, "ada"));
        scheduler.enqueue(cmd(CommandKind::Shoot, 0).in_round(4));
        scheduler.enqueue(cmd(CommandKind::MoveLeft, 300));
        scheduler.enqueue(cmd(CommandKind::TurnRight, 40));
        scheduler.process_queue().unwrap().await.unwrap();

        assert_eq!(machine.commands(), vec!["ws 1 200", "ws 2 180", "shoot"]);
        assert!(scheduler.is_empty());
        assert!(scheduler.is_ignoring_commands());
        assert!(matches!(
            shots.lock().unwrap().as_slice(),
            [QueueEvent::ShotReleased { username, round: 4, .. }] if username == "ada"
        ));

        scheduler.enqueue(cmd(CommandKind::MoveLeft, 300));
        assert!(scheduler.process_queue().is_none());
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_shoot_unblocks_commands() {
        let (machine, scheduler) = setup(MachineKind::Skeeball);
        machine.fail_shoot.store(true, Ordering::SeqCst);

        scheduler.enqueue(cmd(CommandKind::Shoot, 0));
        scheduler.process_queue().unwrap().await.unwrap();

        assert!(!scheduler.is_ignoring_commands());
        scheduler.enqueue(cmd(CommandKind::MoveTo, 10));
        scheduler.process_queue().unwrap().await.unwrap();
        assert_eq!(machine.commands(), vec!["mt 1 10"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_while_draining_is_a_no_op() {
        let (machine, scheduler) = setup(MachineKind::Skeeball);

        scheduler.enqueue(cmd(CommandKind::MoveLeft, 1));
        scheduler.enqueue(cmd(CommandKind::MoveLeft, 2));
        let first = scheduler.process_queue().unwrap();
        assert!(scheduler.process_queue().is_none());

        first.await.unwrap();
        assert_eq!(machine.commands(), vec!["l 1", "l 2"]);
        assert!(scheduler.process_queue().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn claw_moves_are_not_gated() {
        let (machine, scheduler) = setup(MachineKind::Claw);

        scheduler.enqueue(cmd(CommandKind::MoveLeft, 200));
        scheduler.enqueue(cmd(CommandKind::MoveLeft, 200));
        scheduler.enqueue(cmd(CommandKind::MoveForward, 200));
        scheduler.process_queue().unwrap().await.unwrap();

        assert_eq!(machine.commands(), vec!["l 200", "l 200", "f 200"]);
        assert_eq!(
            machine.sent_at("l 200"),
            machine.sent_at("f 200"),
            "claw gantry moves should not wait on stepper monitors"
        );
    }
}
