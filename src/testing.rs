//! In-memory machine and sinks used by scheduler and lifecycle tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::time::{Instant, sleep};

use crate::{
    controller::{ControllerError, ControllerResult, EventBus, MachineControl, Strobe},
    error::ServiceError,
    protocol::{Axis, MachineEvent, MachineKind, MoveDirection},
    services::notifier::{ChatSink, MovementRecord, RecordSink},
};

/// Records every command in wire form, with the instant it was issued.
pub(crate) struct RecordingMachine {
    kind: MachineKind,
    events: EventBus<MachineEvent>,
    pub(crate) sent: Mutex<Vec<(Instant, String)>>,
    pub(crate) play_active: AtomicBool,
    pub(crate) fail_shoot: AtomicBool,
    pub(crate) shoot_delay: Mutex<Duration>,
    pub(crate) connect_failures: AtomicUsize,
    pub(crate) link_log: Mutex<Vec<(Instant, &'static str)>>,
    connected: AtomicBool,
    lit: AtomicBool,
    positions: Mutex<HashMap<Axis, i32>>,
}

impl RecordingMachine {
    pub(crate) fn new(kind: MachineKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            events: EventBus::new(),
            sent: Mutex::new(Vec::new()),
            play_active: AtomicBool::new(false),
            fail_shoot: AtomicBool::new(false),
            shoot_delay: Mutex::new(Duration::ZERO),
            connect_failures: AtomicUsize::new(0),
            link_log: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            lit: AtomicBool::new(false),
            positions: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub(crate) fn sent_at(&self, command: &str) -> Option<Instant> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(_, sent)| sent == command)
            .map(|(at, _)| *at)
    }

    /// Drop the link the way a closed socket does.
    pub(crate) fn lose_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.events.dispatch(&MachineEvent::Disconnected);
    }

    pub(crate) fn link_calls(&self, call: &str) -> Vec<Instant> {
        self.link_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, logged)| *logged == call)
            .map(|(at, _)| *at)
            .collect()
    }

    fn log_link(&self, call: &'static str) {
        self.link_log.lock().unwrap().push((Instant::now(), call));
    }

    pub(crate) fn set_position(&self, axis: Axis, position: i32) {
        self.positions.lock().unwrap().insert(axis, position);
    }

    fn record(&self, command: String) {
        self.sent.lock().unwrap().push((Instant::now(), command));
    }

    fn done(&self, command: String) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.record(command);
            Ok(())
        })
    }
}

impl MachineControl for RecordingMachine {
    fn kind(&self) -> MachineKind {
        self.kind
    }

    fn events(&self) -> &EventBus<MachineEvent> {
        &self.events
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_lit(&self) -> bool {
        self.lit.load(Ordering::SeqCst)
    }

    fn is_play_active(&self) -> bool {
        self.play_active.load(Ordering::SeqCst)
    }

    fn clear_play(&self) {
        self.play_active.store(false, Ordering::SeqCst);
    }

    fn latency_ms(&self) -> u64 {
        3
    }

    fn connect(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.log_link("connect");
            let failing = self
                .connect_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ControllerError::NotConnected);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn initialize(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.log_link("initialize");
            Ok(())
        })
    }

    fn move_axis(
        &self,
        direction: MoveDirection,
        amount: i32,
    ) -> BoxFuture<'_, ControllerResult<()>> {
        let verb = match direction {
            MoveDirection::Left => "l",
            MoveDirection::Right => "r",
            MoveDirection::Forward => "f",
            MoveDirection::Backward => "b",
            MoveDirection::Up => "u",
            MoveDirection::Down => "dn",
            MoveDirection::TurnLeft => "tl",
            MoveDirection::TurnRight => "tr",
        };
        self.done(format!("{verb} {amount}"))
    }

    fn move_to(&self, axis: Axis, position: i32) -> BoxFuture<'_, ControllerResult<()>> {
        self.done(format!("mt {} {position}", axis.id()))
    }

    fn set_wheel_speed(&self, wheel: u8, value: i32) -> BoxFuture<'_, ControllerResult<()>> {
        self.done(format!("ws {wheel} {value}"))
    }

    fn shoot(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            if self.fail_shoot.load(Ordering::SeqCst) {
                return Err(ControllerError::NotConnected);
            }
            let delay = *self.shoot_delay.lock().unwrap();
            if !delay.is_zero() {
                sleep(delay).await;
            }
            self.play_active.store(true, Ordering::SeqCst);
            self.record("shoot".into());
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ControllerResult<()>> {
        self.done("stop".into())
    }

    fn light_switch(&self, on: bool) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.lit.store(on, Ordering::SeqCst);
            self.record(format!("lights {}", u8::from(on)));
            Ok(())
        })
    }

    fn strobe(&self, strobe: Strobe) -> BoxFuture<'_, ControllerResult<()>> {
        self.done(format!("strobe {}", strobe.count))
    }

    fn location(&self, axis: Axis) -> BoxFuture<'_, ControllerResult<i32>> {
        let position = self.positions.lock().unwrap().get(&axis).copied();
        Box::pin(async move { position.ok_or(ControllerError::Disconnected) })
    }
}

/// Keeps every chat reply.
#[derive(Default)]
pub(crate) struct CollectingChat {
    pub(crate) messages: Mutex<Vec<String>>,
}

impl CollectingChat {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|message| message.contains(needle))
    }
}

impl ChatSink for CollectingChat {
    fn send_message(&self, _channel: &str, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Keeps every persisted record.
#[derive(Default)]
pub(crate) struct CollectingRecords {
    pub(crate) records: Arc<Mutex<Vec<MovementRecord>>>,
}

impl RecordSink for CollectingRecords {
    fn persist(&self, record: MovementRecord) -> BoxFuture<'static, Result<(), ServiceError>> {
        let records = Arc::clone(&self.records);
        Box::pin(async move {
            records.lock().unwrap().push(record);
            Ok(())
        })
    }
}
