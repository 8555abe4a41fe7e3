//! Claw crane controller, covering the full firmware and the reduced one.
//!
//! Gantry moves are timed: the firmware runs the motor for the requested duration and the
//! controller waits that long before returning. The reduced firmware never reports the
//! claw returning to the center, so the controller raises that event itself after a delay.

use std::{
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    ControllerError, ControllerResult, EventBus, LinkHandler, LinkSettings, MachineControl,
    MachineLink, Strobe,
};
use crate::{
    config::ClawSettings,
    protocol::{
        Axis, FailsafeKind, FlipperDirection, InboundLine, MachineEvent, MachineKind,
        MoveDirection, events,
    },
};

/// Controller for a claw crane.
pub struct ClawController {
    this: Weak<ClawController>,
    kind: MachineKind,
    link: MachineLink,
    settings: ClawSettings,
    lit: AtomicBool,
    claw_in_play: AtomicBool,
    last_flipper: Mutex<FlipperDirection>,
}

impl ClawController {
    /// Build a disconnected controller. `kind` selects the firmware flavour.
    pub fn new(
        name: impl Into<String>,
        kind: MachineKind,
        settings: LinkSettings,
        claw: ClawSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            kind,
            link: MachineLink::new(name.into(), kind, settings),
            settings: claw,
            lit: AtomicBool::new(false),
            claw_in_play: AtomicBool::new(false),
            last_flipper: Mutex::new(FlipperDirection::Stopped),
        })
    }

    /// Drive the flipper.
    pub async fn flipper(&self, direction: FlipperDirection) -> ControllerResult<()> {
        *self
            .last_flipper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = direction;
        self.send(format!("flip {}", direction.code())).await
    }

    /// Set a firmware failsafe timer.
    pub async fn set_failsafe(&self, kind: FailsafeKind, timeout_ms: u32) -> ControllerResult<()> {
        self.send(format!("sfs {} {timeout_ms}", kind.code())).await
    }

    /// Read a firmware failsafe timer back.
    pub async fn failsafe(&self, kind: FailsafeKind) -> ControllerResult<u32> {
        let command = format!("gfs {}", kind.code());
        let reply = self.link.request(&command).await?;
        reply
            .fields()
            .last()
            .and_then(|value| value.parse::<u32>().ok())
            .ok_or(ControllerError::InvalidResponse {
                command,
                response: reply.payload.clone(),
            })
    }

    async fn send(&self, command: String) -> ControllerResult<()> {
        self.link.send(&command).await.map(|_| ())
    }

    fn last_flipper(&self) -> FlipperDirection {
        *self
            .last_flipper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply controller-side effects; returns `false` when dispatch is deferred.
    fn react(&self, event: &MachineEvent) -> bool {
        match event {
            MachineEvent::ClawCentered => {
                self.clear_play();
                true
            }
            MachineEvent::FlipperTimeout if self.last_flipper() == FlipperDirection::Forward => {
                let Some(this) = self.this.upgrade() else {
                    return true;
                };
                tokio::spawn(async move {
                    if let Err(err) = this.flipper(FlipperDirection::Home).await {
                        warn!(error = %err, "failed to send flipper home after failsafe");
                    }
                    this.link.events().dispatch(&MachineEvent::FlipperTimeout);
                });
                false
            }
            _ => true,
        }
    }

    fn schedule_centering(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let delay = Duration::from_millis(self.settings.centering_delay_ms);
        tokio::spawn(async move {
            sleep(delay).await;
            this.clear_play();
            this.link.events().dispatch(&MachineEvent::ClawCentered);
        });
    }
}

impl LinkHandler for ClawController {
    fn on_line(&self, line: InboundLine) {
        match events::decode(self.kind, &line) {
            Ok(Some(event)) => {
                if self.react(&event) {
                    self.link.events().dispatch(&event);
                }
            }
            Ok(None) => debug!(code = line.code, "ignoring unknown claw event"),
            Err(err) => warn!(error = %err, "dropping claw event"),
        }
    }

    fn on_link_event(&self, event: MachineEvent) {
        self.link.events().dispatch(&event);
    }
}

impl MachineControl for ClawController {
    fn kind(&self) -> MachineKind {
        self.kind
    }

    fn events(&self) -> &EventBus<MachineEvent> {
        self.link.events()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn is_lit(&self) -> bool {
        self.lit.load(Ordering::SeqCst)
    }

    fn is_play_active(&self) -> bool {
        self.claw_in_play.load(Ordering::SeqCst)
    }

    fn clear_play(&self) {
        self.claw_in_play.store(false, Ordering::SeqCst);
    }

    fn latency_ms(&self) -> u64 {
        self.link.latency_ms()
    }

    fn connect(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            let this = self.this.upgrade().ok_or(ControllerError::NotConnected)?;
            let handler: Arc<dyn LinkHandler> = this;
            self.link.connect(Arc::downgrade(&handler)).await
        })
    }

    fn disconnect(&self) {
        self.link.disconnect();
    }

    fn initialize(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            for failsafe in &self.settings.failsafes {
                self.set_failsafe(failsafe.kind, failsafe.timeout_ms).await?;
            }
            info!(
                count = self.settings.failsafes.len(),
                "claw failsafes applied"
            );
            Ok(())
        })
    }

    fn move_axis(
        &self,
        direction: MoveDirection,
        amount: i32,
    ) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            let verb = match direction {
                MoveDirection::Forward => "f",
                MoveDirection::Backward => "b",
                MoveDirection::Left => "l",
                MoveDirection::Right => "r",
                MoveDirection::Up => "u",
                MoveDirection::Down => "dn",
                MoveDirection::TurnLeft | MoveDirection::TurnRight => {
                    return self.link.unsupported("pan rotation");
                }
            };
            self.send(format!("{verb} {amount}")).await?;
            let millis = u64::try_from(amount).unwrap_or(0);
            if millis > 0 {
                sleep(Duration::from_millis(millis)).await;
            }
            Ok(())
        })
    }

    fn move_to(&self, _axis: Axis, _position: i32) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move { self.link.unsupported("absolute positioning") })
    }

    fn set_wheel_speed(&self, _wheel: u8, _value: i32) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move { self.link.unsupported("wheel speed") })
    }

    fn shoot(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.claw_in_play.store(true, Ordering::SeqCst);
            self.send("d 0".to_string()).await?;
            if self.kind == MachineKind::SimpleClaw {
                self.schedule_centering();
            }
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(self.send("s 0".to_string()))
    }

    fn light_switch(&self, on: bool) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            let state = if on { "on" } else { "off" };
            self.send(format!("light {state}")).await?;
            self.lit.store(on, Ordering::SeqCst);
            Ok(())
        })
    }

    fn strobe(&self, strobe: Strobe) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(self.send(strobe.command()))
    }

    fn location(&self, _axis: Axis) -> BoxFuture<'_, ControllerResult<i32>> {
        Box::pin(async move { self.link.unsupported("location query") })
    }
}
