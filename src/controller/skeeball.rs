//! Skeeball lane: two steppers (carriage and pan), two launch wheels, and a ball gate.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{
    ControllerError, ControllerResult, EventBus, LinkHandler, LinkSettings, MachineControl,
    MachineLink, Strobe,
};
use crate::{
    config::{ShotSettings, SteppersConfig},
    protocol::{
        Axis, InboundLine, MachineEvent, MachineKind, MoveDirection, events,
        events::SENSOR_BALL_RETURN,
    },
};

/// Controller for a skeeball lane.
pub struct SkeeballController {
    this: Weak<SkeeballController>,
    link: MachineLink,
    steppers: SteppersConfig,
    wheel_ids: Vec<u8>,
    shot: ShotSettings,
    lit: AtomicBool,
    ball_in_play: AtomicBool,
}

impl SkeeballController {
    /// Build a disconnected controller.
    pub fn new(
        name: impl Into<String>,
        settings: LinkSettings,
        steppers: SteppersConfig,
        wheel_ids: Vec<u8>,
        shot: ShotSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            link: MachineLink::new(name.into(), MachineKind::Skeeball, settings),
            steppers,
            wheel_ids,
            shot,
            lit: AtomicBool::new(false),
            ball_in_play: AtomicBool::new(false),
        })
    }

    /// Set the acceleration of a stepper.
    pub async fn set_acceleration(&self, axis: Axis, acceleration: i32) -> ControllerResult<()> {
        self.send(format!("sa {} {acceleration}", axis.id())).await
    }

    /// Set the top speed of a stepper.
    pub async fn set_speed(&self, axis: Axis, speed: i32) -> ControllerResult<()> {
        self.send(format!("ss {} {speed}", axis.id())).await
    }

    /// Set the soft limits of a stepper.
    pub async fn set_limits(&self, axis: Axis, high: i32, low: i32) -> ControllerResult<()> {
        self.send(format!("sl {} {high} {low}", axis.id())).await
    }

    /// Drive a stepper to its home switch.
    pub async fn auto_home(&self, axis: Axis) -> ControllerResult<()> {
        self.send(format!("ah {}", axis.id())).await
    }

    async fn send(&self, command: String) -> ControllerResult<()> {
        self.link.send(&command).await.map(|_| ())
    }

    async fn configure_axes(&self) -> ControllerResult<()> {
        for axis in Axis::ALL {
            let stepper = self.steppers.get(axis);
            self.set_acceleration(axis, stepper.acceleration).await?;
            self.set_speed(axis, stepper.speed).await?;
            self.set_limits(axis, stepper.limit_high, stepper.limit_low)
                .await?;
            self.auto_home(axis).await?;
        }
        info!("skeeball steppers configured and homing");
        Ok(())
    }

    /// Apply controller-side effects of an event before listeners see it.
    fn react(&self, event: &MachineEvent) {
        match event {
            MachineEvent::ScoreSensor { sensor } if *sensor == SENSOR_BALL_RETURN => {
                self.clear_play();
            }
            MachineEvent::BallReturned => self.clear_play(),
            MachineEvent::ControllerStartup => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(err) = this.configure_axes().await {
                        warn!(error = %err, "failed to re-initialise skeeball after restart");
                    }
                });
            }
            MachineEvent::HomingComplete { axis } => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                let axis = *axis;
                let position = self.steppers.get(axis).default_position;
                tokio::spawn(async move {
                    if let Err(err) = this.move_to(axis, position).await {
                        warn!(error = %err, ?axis, "failed to park axis after homing");
                    }
                });
            }
            _ => {}
        }
    }
}

impl LinkHandler for SkeeballController {
    fn on_line(&self, line: InboundLine) {
        match events::decode(MachineKind::Skeeball, &line) {
            Ok(Some(event)) => {
                self.react(&event);
                self.link.events().dispatch(&event);
            }
            Ok(None) => debug!(code = line.code, "ignoring unknown skeeball event"),
            Err(err) => warn!(error = %err, "dropping skeeball event"),
        }
    }

    fn on_link_event(&self, event: MachineEvent) {
        self.link.events().dispatch(&event);
    }
}

impl MachineControl for SkeeballController {
    fn kind(&self) -> MachineKind {
        MachineKind::Skeeball
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
        self.ball_in_play.load(Ordering::SeqCst)
    }

    fn clear_play(&self) {
        self.ball_in_play.store(false, Ordering::SeqCst);
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
        Box::pin(self.configure_axes())
    }

    fn move_axis(
        &self,
        direction: MoveDirection,
        amount: i32,
    ) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            let verb = match direction {
                MoveDirection::Left => "l",
                MoveDirection::Right => "r",
                MoveDirection::TurnLeft => "tl",
                MoveDirection::TurnRight => "tr",
                _ => return self.link.unsupported("gantry movement"),
            };
            self.send(format!("{verb} {amount}")).await
        })
    }

    fn move_to(&self, axis: Axis, position: i32) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(self.send(format!("mt {} {position}", axis.id())))
    }

    fn set_wheel_speed(&self, wheel: u8, value: i32) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(self.send(format!("ws {wheel} {value}")))
    }

    fn shoot(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.ball_in_play.store(true, Ordering::SeqCst);
            self.send(format!(
                "s {} {}",
                self.shot.release_duration_ms, self.shot.release_wait_ms
            ))
            .await
        })
    }

    fn stop(&self) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            for wheel in &self.wheel_ids {
                self.send(format!("ws {wheel} 0")).await?;
            }
            Ok(())
        })
    }

    fn light_switch(&self, on: bool) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(async move {
            self.send(format!("lights {}", u8::from(on))).await?;
            self.lit.store(on, Ordering::SeqCst);
            Ok(())
        })
    }

    fn strobe(&self, strobe: Strobe) -> BoxFuture<'_, ControllerResult<()>> {
        Box::pin(self.send(strobe.command()))
    }

    fn location(&self, axis: Axis) -> BoxFuture<'_, ControllerResult<i32>> {
        Box::pin(async move {
            let command = format!("gl {}", axis.id());
            let reply = self.link.request(&command).await?;
            reply
                .fields()
                .nth(1)
                .and_then(|value| value.parse::<i32>().ok())
                .ok_or(ControllerError::InvalidResponse {
                    command,
                    response: reply.payload.clone(),
                })
        })
    }
}
