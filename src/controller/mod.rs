//! Machine controllers: one trait for every kind, one owned link per controller.

pub mod claw;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod skeeball;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

pub use self::claw::ClawController;
pub use self::connection::{Link, LinkHandler, LinkSettings};
pub use self::dispatcher::{EventBus, ListenerId};
pub use self::error::{ControllerError, ControllerResult};
pub use self::heartbeat::HeartbeatSettings;
pub use self::skeeball::SkeeballController;

use crate::{
    config::AppConfig,
    protocol::{Axis, InboundLine, MachineEvent, MachineKind, MoveDirection},
};

/// Light show parameters for `strobe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Strobe {
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
    /// Number of flashes.
    pub count: u32,
    /// Delay between flashes in milliseconds.
    pub delay_ms: u32,
}

impl Default for Strobe {
    fn default() -> Self {
        Self {
            red: 255,
            green: 255,
            blue: 255,
            count: 4,
            delay_ms: 80,
        }
    }
}

impl Strobe {
    fn command(&self) -> String {
        format!(
            "strobe {} {} {} {} {} 0",
            self.red, self.blue, self.green, self.count, self.delay_ms
        )
    }
}

/// Capabilities shared by every machine kind.
///
/// Operations a kind cannot perform return [`ControllerError::Unsupported`].
pub trait MachineControl: Send + Sync {
    /// Hardware family.
    fn kind(&self) -> MachineKind;
    /// Registry notified of every machine and link event.
    fn events(&self) -> &EventBus<MachineEvent>;
    /// Whether a link is currently open.
    fn is_connected(&self) -> bool;
    /// Whether the machine lights are on.
    fn is_lit(&self) -> bool;
    /// Whether a shot or drop is still being played out by the hardware.
    fn is_play_active(&self) -> bool;
    /// Mark the current shot or drop as settled.
    fn clear_play(&self);
    /// Last measured keepalive round-trip.
    fn latency_ms(&self) -> u64;

    /// Open a fresh link, replacing any previous one.
    fn connect(&self) -> BoxFuture<'_, ControllerResult<()>>;
    /// Close the link.
    fn disconnect(&self);
    /// Push the configured hardware settings to the machine.
    fn initialize(&self) -> BoxFuture<'_, ControllerResult<()>>;

    /// Relative move; `amount` is steps on steppers and milliseconds on gantries.
    fn move_axis(
        &self,
        direction: MoveDirection,
        amount: i32,
    ) -> BoxFuture<'_, ControllerResult<()>>;
    /// Absolute move of a stepper axis.
    fn move_to(&self, axis: Axis, position: i32) -> BoxFuture<'_, ControllerResult<()>>;
    /// Set a launch wheel to a raw hardware speed.
    fn set_wheel_speed(&self, wheel: u8, value: i32) -> BoxFuture<'_, ControllerResult<()>>;
    /// Release a ball or drop the claw.
    fn shoot(&self) -> BoxFuture<'_, ControllerResult<()>>;
    /// Bring the moving parts to rest.
    fn stop(&self) -> BoxFuture<'_, ControllerResult<()>>;
    /// Switch the machine lights.
    fn light_switch(&self, on: bool) -> BoxFuture<'_, ControllerResult<()>>;
    /// Run a light show.
    fn strobe(&self, strobe: Strobe) -> BoxFuture<'_, ControllerResult<()>>;
    /// Ask a stepper for its absolute position.
    fn location(&self, axis: Axis) -> BoxFuture<'_, ControllerResult<i32>>;
}

/// Build the controller matching the configured machine kind.
pub fn from_config(config: &AppConfig) -> Arc<dyn MachineControl> {
    let name = config.machine.name.clone();
    let settings = config.link_settings();
    match config.machine.kind {
        MachineKind::Skeeball => SkeeballController::new(
            name,
            settings,
            config.steppers.clone(),
            vec![config.wheels.left.id, config.wheels.right.id],
            config.shot.clone(),
        ),
        kind => ClawController::new(name, kind, settings, config.claw.clone()),
    }
}

/// Link slot and event registry embedded in every controller.
pub(crate) struct MachineLink {
    name: String,
    kind: MachineKind,
    settings: LinkSettings,
    link: Mutex<Option<Arc<Link>>>,
    events: EventBus<MachineEvent>,
}

impl MachineLink {
    pub(crate) fn new(name: String, kind: MachineKind, settings: LinkSettings) -> Self {
        Self {
            name,
            kind,
            settings,
            link: Mutex::new(None),
            events: EventBus::new(),
        }
    }

    pub(crate) fn events(&self) -> &EventBus<MachineEvent> {
        &self.events
    }

    pub(crate) async fn connect(&self, handler: Weak<dyn LinkHandler>) -> ControllerResult<()> {
        let link = Link::open(&self.settings, handler).await?;
        let previous = self.slot().replace(link);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        info!(machine = %self.name, kind = ?self.kind, "machine connected");
        self.events.dispatch(&MachineEvent::Connected);
        Ok(())
    }

    pub(crate) fn disconnect(&self) {
        let link = self.slot().take();
        if let Some(link) = link {
            link.close();
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.slot().as_ref().is_some_and(|link| !link.is_closed())
    }

    pub(crate) fn latency_ms(&self) -> u64 {
        self.slot().as_ref().map_or(0, |link| link.latency_ms())
    }

    pub(crate) async fn send(&self, command: &str) -> ControllerResult<u32> {
        self.current()?.send(command).await
    }

    pub(crate) async fn request(&self, command: &str) -> ControllerResult<InboundLine> {
        self.current()?.request(command).await
    }

    pub(crate) fn unsupported<T>(&self, operation: &'static str) -> ControllerResult<T> {
        Err(ControllerError::unsupported(self.kind, operation))
    }

    fn current(&self) -> ControllerResult<Arc<Link>> {
        self.slot()
            .as_ref()
            .filter(|link| !link.is_closed())
            .cloned()
            .ok_or(ControllerError::NotConnected)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Link>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
