// Joystick relay: every connected peer can send frames, every other peer gets a copy.
// Frames are newline-delimited JSON over TCP. When motion is enabled each frame is
// also translated into a drive command and queued for the dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::{PEER_OUTBOX, PEER_SEND_TIMEOUT};
use crate::messages::JoystickFrame;
use crate::motor::KinematicsTranslator;
use crate::queue::CommandQueue;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Event kinds handlers can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEvent {
    Connect,
    Disconnect,
    Frame,
}

/// Payload handed to registered handlers
#[derive(Debug, Clone, Copy)]
pub enum RelayEventData<'a> {
    Connect(PeerId),
    Disconnect(PeerId),
    Frame(PeerId, &'a JoystickFrame),
}

impl RelayEventData<'_> {
    pub fn kind(&self) -> RelayEvent {
        match self {
            RelayEventData::Connect(_) => RelayEvent::Connect,
            RelayEventData::Disconnect(_) => RelayEvent::Disconnect,
            RelayEventData::Frame(..) => RelayEvent::Frame,
        }
    }
}

type Handler = Box<dyn Fn(&RelayEventData<'_>) + Send + Sync>;
type Outbox = mpsc::Sender<Arc<str>>;

/// Ingress and fan-out hub for joystick frames
pub struct JoystickRelay {
    peers: Mutex<HashMap<PeerId, Outbox>>,
    next_id: AtomicU64,
    handlers: RwLock<HashMap<RelayEvent, Vec<Handler>>>,
    motion: Arc<AtomicBool>,
    translator: KinematicsTranslator,
    queue: CommandQueue,
    send_timeout: Duration,
}

impl JoystickRelay {
    pub fn new(translator: KinematicsTranslator, queue: CommandQueue, motion: Arc<AtomicBool>) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            motion,
            translator,
            queue,
            send_timeout: PEER_SEND_TIMEOUT,
        }
    }

    /// Register a handler for one event kind
    pub fn on<F>(&self, event: RelayEvent, handler: F)
    where
        F: Fn(&RelayEventData<'_>) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers.entry(event).or_default().push(Box::new(handler));
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.peers().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Add a peer to the subscriber set. The receiver yields lines to write to it.
    pub fn join(&self) -> (PeerId, mpsc::Receiver<Arc<str>>) {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(PEER_OUTBOX);
        self.peers().insert(id, tx);
        self.emit(&RelayEventData::Connect(id));
        (id, rx)
    }

    /// Remove a peer. Safe to call more than once.
    pub fn leave(&self, id: PeerId) {
        if self.peers().remove(&id).is_some() {
            self.emit(&RelayEventData::Disconnect(id));
        }
    }

    /// Handle one raw inbound line from `from`
    pub fn on_message(&self, from: PeerId, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }

        let frame: JoystickFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring unparsable frame from {}: {}", from, e);
                return;
            }
        };

        if self.motion.load(Ordering::SeqCst) {
            let queue = &self.queue;
            if let Some(cmd) = self.translator.translate_into(&frame, |cmd| {
                queue.push_command(cmd);
            }) {
                debug!("{} -> {:?}", from, cmd);
            }
        }

        self.emit(&RelayEventData::Frame(from, &frame));
        self.broadcast(from, raw);
    }

    /// Send `raw` to every peer except `from`.
    ///
    /// Never waits: a peer with a full or closed outbox is dropped from the set.
    /// Returns the number of peers the line was queued for.
    pub fn broadcast(&self, from: PeerId, raw: &str) -> usize {
        let line: Arc<str> = Arc::from(format!("{}\n", raw));
        let mut dropped = Vec::new();
        let mut delivered = 0;

        {
            let peers = self.peers();
            for (&id, outbox) in peers.iter().filter(|(id, _)| **id != from) {
                match outbox.try_send(Arc::clone(&line)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("{} is not keeping up, dropping it", id);
                        dropped.push(id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(id),
                }
            }
        }

        for id in dropped {
            self.leave(id);
        }
        delivered
    }

    /// Accept connections forever
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Joystick relay listening on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move { relay.handle_connection(stream, addr).await });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Service one peer until it disconnects
    pub async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let (reader, mut writer) = stream.into_split();
        let (id, mut outbox) = self.join();
        info!("{} connected from {}", id, addr);

        let send_timeout = self.send_timeout;
        let writer_task = tokio::spawn(async move {
            while let Some(line) = outbox.recv().await {
                match tokio::time::timeout(send_timeout, writer.write_all(line.as_bytes())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("{} write failed: {}", id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("{} write timed out", id);
                        break;
                    }
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.on_message(id, &line),
                Ok(None) => break,
                Err(e) => {
                    debug!("{} read failed: {}", id, e);
                    break;
                }
            }
        }

        self.leave(id);
        writer_task.abort();
        info!("{} disconnected", id);
    }

    fn emit(&self, event: &RelayEventData<'_>) {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        if let Some(list) = handlers.get(&event.kind()) {
            for handler in list {
                handler(event);
            }
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, Outbox>> {
        self.peers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Bind the relay listener
pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr).await.map_err(|source| RelayError::Bind {
        addr: addr.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnPolarity;
    use crate::messages::{Direction, DriveCommand};
    use crate::queue::{CommandReceiver, QueueItem};
    use crate::state::StateManager;
    use std::sync::atomic::AtomicUsize;

    const FORWARD_FRAME: &str = r#"{"axes":[{"index":1,"value":-0.8},{"index":2,"value":0.0}],"buttons":[]}"#;

    fn relay(enabled: bool) -> (Arc<JoystickRelay>, CommandReceiver) {
        let (queue, rx) = CommandQueue::new();
        let translator = KinematicsTranslator::new(Arc::new(StateManager::new()), TurnPolarity::LeftForward);
        let motion = Arc::new(AtomicBool::new(enabled));
        (Arc::new(JoystickRelay::new(translator, queue, motion)), rx)
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (relay, _rx) = relay(false);
        let (a, mut a_rx) = relay.join();
        let (_b, mut b_rx) = relay.join();
        let (_c, mut c_rx) = relay.join();

        relay.on_message(a, FORWARD_FRAME);

        assert_eq!(&*b_rx.recv().await.unwrap(), format!("{}\n", FORWARD_FRAME));
        assert_eq!(&*c_rx.recv().await.unwrap(), format!("{}\n", FORWARD_FRAME));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_peer_removed_others_still_served() {
        let (relay, _rx) = relay(false);
        let (a, _a_rx) = relay.join();
        let (b, b_rx) = relay.join();
        let (c, mut c_rx) = relay.join();
        drop(b_rx); // b's connection died

        assert_eq!(relay.broadcast(a, FORWARD_FRAME), 1);
        assert_eq!(relay.peer_ids(), vec![a, c]);
        assert!(c_rx.recv().await.is_some());
        assert!(!relay.peer_ids().contains(&b));
    }

    #[tokio::test]
    async fn test_slow_peer_dropped_without_blocking() {
        let (relay, _rx) = relay(false);
        let (a, _a_rx) = relay.join();
        let (slow, _slow_rx) = relay.join();
        let (_fast, mut fast_rx) = relay.join();

        for _ in 0..PEER_OUTBOX {
            relay.broadcast(a, "{}");
            fast_rx.recv().await.unwrap();
        }
        assert!(relay.peer_ids().contains(&slow));

        relay.broadcast(a, "{}");
        assert!(!relay.peer_ids().contains(&slow));
        assert_eq!(fast_rx.recv().await.as_deref(), Some("{}\n"));
    }

    #[test]
    fn test_frames_translated_only_when_enabled() {
        let (relay, mut rx) = relay(false);
        let (a, _a_rx) = relay.join();
        relay.on_message(a, FORWARD_FRAME);
        assert_eq!(rx.try_pop(), None);

        relay.motion.store(true, Ordering::SeqCst);
        relay.on_message(a, FORWARD_FRAME);
        relay.on_message(a, FORWARD_FRAME);
        assert_eq!(
            rx.try_pop(),
            Some(QueueItem::Drive(DriveCommand::new(16, Direction::Forward, Direction::Forward)))
        );
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_sloppy_controller_frame_still_drives() {
        let (relay, mut rx) = relay(true);
        let (a, _a_rx) = relay.join();
        relay.on_message(
            a,
            r#"{"axes":[{"index":1.0,"value":-0.8},{"index":2,"value":0.0}],"buttons":[{"index":0,"value":null}]}"#,
        );
        assert_eq!(
            rx.try_pop(),
            Some(QueueItem::Drive(DriveCommand::new(16, Direction::Forward, Direction::Forward)))
        );
    }

    #[test]
    fn test_concurrent_peers_queue_matches_motor_state() {
        const REVERSE_FRAME: &str = r#"{"axes":[{"index":1,"value":0.8},{"index":2,"value":0.0}]}"#;

        let (queue, mut rx) = CommandQueue::new();
        let state = Arc::new(StateManager::new());
        let translator = KinematicsTranslator::new(Arc::clone(&state), TurnPolarity::LeftForward);
        let relay = Arc::new(JoystickRelay::new(translator, queue, Arc::new(AtomicBool::new(true))));

        let workers: Vec<_> = [FORWARD_FRAME, REVERSE_FRAME]
            .into_iter()
            .enumerate()
            .map(|(t, first)| {
                let relay = Arc::clone(&relay);
                let second = if t == 0 { REVERSE_FRAME } else { FORWARD_FRAME };
                std::thread::spawn(move || {
                    let (peer, _outbox) = relay.join();
                    for i in 0..500 {
                        relay.on_message(peer, if i % 2 == 0 { first } else { second });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut last = None;
        while let Some(item) = rx.try_pop() {
            if let QueueItem::Drive(cmd) = item {
                last = Some(cmd);
            }
        }
        assert_eq!(last, Some(state.current()));
    }

    #[test]
    fn test_garbage_line_is_ignored() {
        let (relay, mut rx) = relay(true);
        let (a, _a_rx) = relay.join();
        let (_b, mut b_rx) = relay.join();
        relay.on_message(a, "not json");
        relay.on_message(a, "   ");
        assert_eq!(rx.try_pop(), None);
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn test_handlers_fire_per_event_kind() {
        let (relay, _rx) = relay(false);
        let connects = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connects);
        relay.on(RelayEvent::Connect, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&frames);
        relay.on(RelayEvent::Frame, move |event| {
            if let RelayEventData::Frame(_, frame) = event {
                assert_eq!(frame.axis(1), -0.8);
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&disconnects);
        relay.on(RelayEvent::Disconnect, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (a, _a_rx) = relay.join();
        relay.on_message(a, FORWARD_FRAME);
        relay.leave(a);
        relay.leave(a);

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(frames.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tcp_peers_mirror_frames() {
        let (relay, mut rx) = relay(true);
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(Arc::clone(&relay).serve(listener));

        let mut driver = TcpStream::connect(addr).await.unwrap();
        let viewer = TcpStream::connect(addr).await.unwrap();
        while relay.peer_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        driver.write_all(format!("{}\n", FORWARD_FRAME).as_bytes()).await.unwrap();

        let mut viewer_lines = BufReader::new(viewer).lines();
        let mirrored = tokio::time::timeout(Duration::from_secs(2), viewer_lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mirrored.as_deref(), Some(FORWARD_FRAME));
        assert_eq!(
            rx.try_pop(),
            Some(QueueItem::Drive(DriveCommand::new(16, Direction::Forward, Direction::Forward)))
        );

        drop(driver);
        while relay.peer_count() > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.abort();
    }
}
