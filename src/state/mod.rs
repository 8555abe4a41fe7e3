pub mod player_queue;
pub mod session;
mod sse;
pub mod turn;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    controller::MachineControl,
    scheduler::CommandScheduler,
    services::{
        notifier::{SseChatSink, TracingRecordSink},
        round_service::TurnController,
    },
};

pub use self::player_queue::{PlayerQueue, QueueError};
pub use self::session::{PlayerSession, SessionTracker};
pub use self::sse::SseHub;
pub use self::turn::{ActiveShooter, InvalidTransition, TurnEvent, TurnPhase, TurnStateMachine};

pub type SharedState = Arc<AppState>;

/// Capacity of the SSE broadcast channel.
const SSE_CAPACITY: usize = 64;

/// Central application state: the machine, its command queue and the turn lifecycle.
pub struct AppState {
    config: AppConfig,
    machine: Arc<dyn MachineControl>,
    scheduler: Arc<CommandScheduler>,
    turns: Arc<TurnController>,
    sse: SseHub,
}

impl AppState {
    /// Wire the scheduler and turn controller around `machine`.
    ///
    /// Chat replies go out on the SSE stream; movement records go to the log.
    pub fn new(config: AppConfig, machine: Arc<dyn MachineControl>) -> SharedState {
        let sse = SseHub::new(SSE_CAPACITY);
        let scheduler = CommandScheduler::new(Arc::clone(&machine), &config.steppers);
        let turns = TurnController::new(
            &config,
            Arc::clone(&machine),
            Arc::clone(&scheduler),
            Arc::new(SseChatSink::new(sse.clone())),
            Arc::new(TracingRecordSink),
        );

        Arc::new(Self {
            config,
            machine,
            scheduler,
            turns,
            sse,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The machine controller.
    pub fn machine(&self) -> &Arc<dyn MachineControl> {
        &self.machine
    }

    /// Command queue bound to the machine.
    pub fn scheduler(&self) -> &Arc<CommandScheduler> {
        &self.scheduler
    }

    /// Turn lifecycle.
    pub fn turns(&self) -> &Arc<TurnController> {
        &self.turns
    }

    /// Broadcast hub used for the SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }
}
