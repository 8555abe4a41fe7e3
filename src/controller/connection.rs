//! One TCP session with a machine: framing, request correlation, and the keepalive registry.
//!
//! A [`Link`] is never reused. Once it closes, the owning controller opens a fresh one.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{self, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    error::{ControllerError, ControllerResult},
    heartbeat::{self, HeartbeatSettings},
};
use crate::protocol::{
    DecodeError, InboundLine, LineAccumulator, MachineEvent, SequenceCounter, encode_command,
    events::PONG_CODE,
};

/// Where and how to reach a machine.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Bound for connecting and for synchronous replies.
    pub comms_timeout: Duration,
    /// Keepalive timings.
    pub heartbeat: HeartbeatSettings,
}

impl LinkSettings {
    fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Receiver of everything a link reads that is not a reply or a pong.
pub trait LinkHandler: Send + Sync {
    /// An unsolicited or uncorrelated line.
    fn on_line(&self, line: InboundLine);
    /// Link-level notification (`PingSuccess`, `PingTimeout`, `Disconnected`).
    fn on_link_event(&self, event: MachineEvent);
}

/// Keepalive sent and not yet answered.
pub(crate) struct PendingPing {
    pub(crate) started_at: Instant,
    pub(crate) responder: oneshot::Sender<Duration>,
}

struct AwaitedReply {
    sequence: u32,
    responder: oneshot::Sender<InboundLine>,
}

/// Open machine session.
pub struct Link {
    writer: sync::Mutex<Option<OwnedWriteHalf>>,
    sequence: SequenceCounter,
    closed: AtomicBool,
    request_gate: sync::Mutex<()>,
    awaited: Mutex<Option<AwaitedReply>>,
    pings: Mutex<HashMap<u32, PendingPing>>,
    latency_ms: AtomicU64,
    opened_at: Instant,
    comms_timeout: Duration,
    handler: Weak<dyn LinkHandler>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    /// Connect, then start the read loop and the heartbeat.
    pub async fn open(
        settings: &LinkSettings,
        handler: Weak<dyn LinkHandler>,
    ) -> ControllerResult<Arc<Self>> {
        let address = settings.target();
        let stream = timeout(settings.comms_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ControllerError::ConnectTimeout {
                address: address.clone(),
            })?
            .map_err(|source| ControllerError::Connect {
                address: address.clone(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "failed to disable Nagle on machine link");
        }

        let (reader, writer) = stream.into_split();
        let link = Arc::new(Self {
            writer: sync::Mutex::new(Some(writer)),
            sequence: SequenceCounter::new(),
            closed: AtomicBool::new(false),
            request_gate: sync::Mutex::new(()),
            awaited: Mutex::new(None),
            pings: Mutex::new(HashMap::new()),
            latency_ms: AtomicU64::new(0),
            opened_at: Instant::now(),
            comms_timeout: settings.comms_timeout,
            handler,
            tasks: Mutex::new(Vec::new()),
        });

        let reader_task = tokio::spawn(read_loop(Arc::clone(&link), reader));
        let heartbeat_task = tokio::spawn(heartbeat::run(Arc::clone(&link), settings.heartbeat));
        lock(&link.tasks).extend([reader_task, heartbeat_task]);

        info!(%address, "machine link open");
        Ok(link)
    }

    /// Whether the link has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Last measured keepalive round-trip.
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    /// Send a command without waiting for an answer, returning its sequence.
    pub async fn send(self: &Arc<Self>, command: &str) -> ControllerResult<u32> {
        let sequence = self.sequence.next();
        self.write_frame(sequence, command).await?;
        Ok(sequence)
    }

    /// Send a command and wait for the line that carries its sequence.
    ///
    /// Only one request is in flight per link; concurrent callers queue on a gate.
    pub async fn request(self: &Arc<Self>, command: &str) -> ControllerResult<InboundLine> {
        let _gate = self.request_gate.lock().await;

        let sequence = self.sequence.next();
        let (responder, reply) = oneshot::channel();
        *lock(&self.awaited) = Some(AwaitedReply {
            sequence,
            responder,
        });

        if let Err(err) = self.write_frame(sequence, command).await {
            self.forget_awaited(sequence);
            return Err(err);
        }

        let outcome = timeout(self.comms_timeout, reply).await;
        self.forget_awaited(sequence);
        match outcome {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(_)) => Err(ControllerError::Disconnected),
            Err(_) => Err(ControllerError::Timeout {
                sequence,
                command: command.to_string(),
            }),
        }
    }

    /// Tear the link down, firing `Disconnected` if this call closed it.
    pub fn close(self: &Arc<Self>) {
        if self.shutdown() {
            self.emit(MachineEvent::Disconnected);
        }
    }

    /// Mark closed and release every resource. Returns `false` if already closed.
    pub(crate) fn shutdown(self: &Arc<Self>) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        lock(&self.awaited).take();
        self.clear_pings();

        let link = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(mut writer) = link.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
        });

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        true
    }

    pub(crate) fn emit(&self, event: MachineEvent) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_link_event(event);
        }
    }

    pub(crate) fn next_sequence(&self) -> u32 {
        self.sequence.next()
    }

    pub(crate) fn elapsed_ms(&self) -> u128 {
        self.opened_at.elapsed().as_millis()
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    pub(crate) fn register_ping(&self, sequence: u32, ping: PendingPing) {
        lock(&self.pings).insert(sequence, ping);
    }

    pub(crate) fn clear_pings(&self) {
        lock(&self.pings).clear();
    }

    pub(crate) async fn write_frame(
        self: &Arc<Self>,
        sequence: u32,
        command: &str,
    ) -> ControllerResult<()> {
        if self.is_closed() {
            return Err(ControllerError::NotConnected);
        }

        let frame = encode_command(sequence, command);
        let result = {
            let mut writer = self.writer.lock().await;
            let Some(stream) = writer.as_mut() else {
                return Err(ControllerError::NotConnected);
            };
            stream.write_all(frame.as_bytes()).await
        };

        match result {
            Ok(()) => {
                debug!(sequence, command, "sent machine command");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, command, "machine link write failed");
                self.close();
                Err(ControllerError::Io(err))
            }
        }
    }

    fn forget_awaited(&self, sequence: u32) {
        let mut awaited = lock(&self.awaited);
        if awaited.as_ref().is_some_and(|slot| slot.sequence == sequence) {
            awaited.take();
        }
    }

    fn handle_raw_line(&self, raw: &str) {
        let line = match InboundLine::parse(raw) {
            Ok(line) => line,
            Err(DecodeError::Empty) => return,
            Err(err) => {
                warn!(error = %err, line = raw.trim(), "dropping malformed machine line");
                return;
            }
        };
        debug!(
            code = line.code,
            sequence = line.sequence,
            payload = %line.payload,
            "machine line received"
        );

        if line.code == PONG_CODE {
            self.resolve_pong(line.sequence);
            return;
        }

        if line.sequence != 0 {
            let matched = {
                let mut awaited = lock(&self.awaited);
                if awaited
                    .as_ref()
                    .is_some_and(|slot| slot.sequence == line.sequence)
                {
                    awaited.take()
                } else {
                    None
                }
            };
            if let Some(slot) = matched {
                let _ = slot.responder.send(line);
                return;
            }
        }

        if let Some(handler) = self.handler.upgrade() {
            handler.on_line(line);
        }
    }

    fn resolve_pong(&self, sequence: u32) {
        let Some(ping) = lock(&self.pings).remove(&sequence) else {
            debug!(sequence, "pong without a matching ping");
            return;
        };

        let latency = ping.started_at.elapsed();
        self.record_latency(latency);
        let _ = ping.responder.send(latency);
        self.emit(MachineEvent::PingSuccess {
            latency_ms: self.latency_ms(),
        });
    }
}

async fn read_loop(link: Arc<Link>, mut reader: OwnedReadHalf) {
    let mut accumulator = LineAccumulator::new();
    let mut chunk = [0_u8; 512];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                info!("machine closed the link");
                break;
            }
            Ok(read) => {
                for raw in accumulator.push(&chunk[..read]) {
                    link.handle_raw_line(&raw);
                }
            }
            Err(err) => {
                warn!(error = %err, "machine link read failed");
                break;
            }
        }
    }

    link.close();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::TcpListener,
        sync::mpsc,
    };

    /// Records everything a link hands to its owner.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) lines: Mutex<Vec<InboundLine>>,
        pub(crate) events: Mutex<Vec<MachineEvent>>,
    }

    impl LinkHandler for Recorder {
        fn on_line(&self, line: InboundLine) {
            self.lines.lock().unwrap().push(line);
        }

        fn on_link_event(&self, event: MachineEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    pub(crate) fn settings(port: u16, ping_timeout_ms: u64, cooldown_ms: u64) -> LinkSettings {
        LinkSettings {
            address: "127.0.0.1".into(),
            port,
            comms_timeout: Duration::from_millis(300),
            heartbeat: HeartbeatSettings {
                ping_timeout: Duration::from_millis(ping_timeout_ms),
                cooldown: Duration::from_millis(cooldown_ms),
            },
        }
    }

    /// Fake machine: forwards every received line and writes whatever the test pushes.
    pub(crate) async fn fake_machine() -> (
        u16,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => { let _ = seen_tx.send(line); }
                        _ => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(reply) => { let _ = write.write_all(reply.as_bytes()).await; }
                        None => break,
                    },
                }
            }
        });

        (port, seen_rx, reply_tx)
    }

    fn sequence_of(line: &str) -> u32 {
        line.split(' ').next().unwrap().parse().unwrap()
    }

    async fn next_non_ping(seen: &mut mpsc::UnboundedReceiver<String>) -> String {
        loop {
            let line = seen.recv().await.unwrap();
            if !line.contains(" ping ") {
                return line;
            }
        }
    }

    #[tokio::test]
    async fn request_resolves_only_on_matching_sequence() {
        let (port, mut seen, reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 5_000, 10_000), Arc::downgrade(&handler))
            .await
            .unwrap();

        let requester = Arc::clone(&link);
        let pending = tokio::spawn(async move { requester.request("gl 1").await });

        let sent = next_non_ping(&mut seen).await;
        assert!(sent.ends_with("gl 1"));
        let sequence = sequence_of(&sent);

        reply
            .send(format!("900:{} stray\n", sequence + 100))
            .unwrap();
        reply.send(format!("900:{sequence} 1 420\n")).unwrap();

        let line = pending.await.unwrap().unwrap();
        assert_eq!(line.sequence, sequence);
        assert_eq!(line.payload, "1 420");

        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].payload, "stray");
    }

    #[tokio::test]
    async fn request_times_out_without_reply() {
        let (port, _seen, _reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 5_000, 10_000), Arc::downgrade(&handler))
            .await
            .unwrap();

        let err = link.request("gfs 0").await.unwrap_err();
        assert!(matches!(err, ControllerError::Timeout { .. }));
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_the_reader() {
        let (port, _seen, reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let _link = Link::open(&settings(port, 5_000, 10_000), Arc::downgrade(&handler))
            .await
            .unwrap();

        reply.send("garbage here\n:\n\n40".into()).unwrap();
        reply.send("8\n".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let lines = recorder.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].code, 408);
    }

    #[tokio::test]
    async fn malformed_lines_leave_an_outstanding_request_waiting() {
        let (port, mut seen, reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 5_000, 10_000), Arc::downgrade(&handler))
            .await
            .unwrap();

        let requester = Arc::clone(&link);
        let pending = tokio::spawn(async move { requester.request("gl 1").await });
        let sequence = sequence_of(&next_non_ping(&mut seen).await);

        reply.send("900:x junk\nabc:5 hi\n".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        reply.send(format!("900:{sequence} 1 75\n")).unwrap();
        let line = pending.await.unwrap().unwrap();
        assert_eq!(line.sequence, sequence);
        assert_eq!(line.payload, "1 75");
        assert!(recorder.lines.lock().unwrap().is_empty());
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn close_fires_disconnected_once() {
        let (port, _seen, _reply) = fake_machine().await;
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn LinkHandler> = recorder.clone();
        let link = Link::open(&settings(port, 5_000, 10_000), Arc::downgrade(&handler))
            .await
            .unwrap();

        link.close();
        link.close();

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![MachineEvent::Disconnected]
        );
        assert!(matches!(
            link.send("s 0").await,
            Err(ControllerError::NotConnected)
        ));
    }
}
