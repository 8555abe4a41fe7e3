//! Keepalive loop run alongside every open link.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::oneshot,
    time::{sleep, timeout},
};
use tracing::{debug, warn};

use super::connection::{Link, PendingPing};
use crate::protocol::MachineEvent;

/// Keepalive timings.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    /// How long a ping may stay unanswered before the link is declared dead.
    pub ping_timeout: Duration,
    /// Pause between an answered ping and the next one.
    pub cooldown: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(5_000),
            cooldown: Duration::from_millis(10_000),
        }
    }
}

/// Ping until a ping goes unanswered or the link closes.
///
/// A missed pong records the timeout as latency, force-closes the link, and fires
/// `PingTimeout` then `Disconnected`. If the link was already closed by the time the
/// ping expired, nothing further is fired. The loop never restarts on its own.
pub(crate) async fn run(link: Arc<Link>, settings: HeartbeatSettings) {
    loop {
        if link.is_closed() {
            return;
        }

        let sequence = link.next_sequence();
        let (responder, answered) = oneshot::channel();
        link.register_ping(
            sequence,
            PendingPing {
                started_at: Instant::now(),
                responder,
            },
        );

        let command = format!("ping {}", link.elapsed_ms());
        if let Err(err) = link.write_frame(sequence, &command).await {
            debug!(error = %err, "heartbeat stopped; link unavailable");
            link.clear_pings();
            return;
        }

        match timeout(settings.ping_timeout, answered).await {
            Ok(Ok(latency)) => {
                debug!(latency_ms = latency.as_millis() as u64, "pong received");
                sleep(settings.cooldown).await;
            }
            Ok(Err(_)) | Err(_) => {
                link.clear_pings();
                link.record_latency(settings.ping_timeout);
                if link.shutdown() {
                    warn!(
                        timeout_ms = settings.ping_timeout.as_millis() as u64,
                        "ping unanswered; dropping machine link"
                    );
                    link.emit(MachineEvent::PingTimeout);
                    link.emit(MachineEvent::Disconnected);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::controller::connection::{
        LinkHandler,
        tests::{Recorder, fake_machine, settings},
    };

    #[tokio::test]
    async fn answered_pings_repeat_after_cooldown() {
        let (port, mut seen, reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 200, 50), Arc::downgrade(&handler))
            .await
            .unwrap();

        for _ in 0..3 {
            let line = seen.recv().await.unwrap();
            let mut parts = line.split(' ');
            let sequence = parts.next().unwrap();
            assert_eq!(parts.next(), Some("ping"));
            reply.send(format!("101:{sequence}\n")).unwrap();
        }
        sleep(Duration::from_millis(20)).await;

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(
            events
                .iter()
                .all(|event| matches!(event, MachineEvent::PingSuccess { .. }))
        );
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn missing_pong_fires_one_timeout_then_disconnect() {
        let (port, _seen, _reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 100, 50), Arc::downgrade(&handler))
            .await
            .unwrap();

        sleep(Duration::from_millis(400)).await;

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![MachineEvent::PingTimeout, MachineEvent::Disconnected]
        );
        assert!(link.is_closed());
        assert_eq!(link.latency_ms(), 100);
    }

    #[tokio::test]
    async fn remote_close_skips_ping_timeout() {
        let (port, seen, reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 200, 50), Arc::downgrade(&handler))
            .await
            .unwrap();

        drop(reply);
        drop(seen);
        sleep(Duration::from_millis(400)).await;

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![MachineEvent::Disconnected]
        );
        assert!(link.is_closed());
    }
}
