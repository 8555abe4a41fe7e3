use std::{sync::Arc, time::Duration};

use tokio::{sync::Notify, time::sleep};
use tracing::{info, warn};

use crate::{
    controller::{ControllerResult, MachineControl},
    protocol::MachineEvent,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Keep the machine link up: connect, apply settings, and reconnect with
/// exponential backoff whenever the link reports a disconnect or ping timeout.
pub async fn run(machine: Arc<dyn MachineControl>) {
    let link_lost = Arc::new(Notify::new());
    {
        let link_lost = Arc::clone(&link_lost);
        machine.events().subscribe(move |event: &MachineEvent| {
            if matches!(event, MachineEvent::Disconnected | MachineEvent::PingTimeout) {
                link_lost.notify_one();
            }
        });
    }

    let mut delay = INITIAL_DELAY;
    loop {
        match establish(machine.as_ref()).await {
            Ok(()) => {
                info!(kind = ?machine.kind(), "machine link established");
                delay = INITIAL_DELAY;
                // Permits left over from an earlier teardown are stale while the link is up.
                while machine.is_connected() {
                    link_lost.notified().await;
                }
                warn!("machine link lost; reconnecting");
                machine.disconnect();
            }
            Err(err) => {
                warn!(error = %err, ?delay, "machine connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn establish(machine: &dyn MachineControl) -> ControllerResult<()> {
    machine.connect().await?;
    if let Err(err) = machine.initialize().await {
        machine.disconnect();
        return Err(err);
    }
    Ok(())
}
