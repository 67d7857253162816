// Rover runtime: wires the relay, translator, queue and dispatcher together
// and owns the motion enable flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RoverConfig;
use crate::messages::{DriveCommand, LinkHealth};
use crate::motor::{DispatcherHandle, KinematicsTranslator, PortOpener, SerialDispatcher, SerialOpener};
use crate::queue::{CommandQueue, QueueItem};
use crate::relay::{self, JoystickRelay};
use crate::state::StateManager;
use crate::telemetry;

/// Shared context for one running rover
pub struct Rover {
    config: RoverConfig,
    state: Arc<StateManager>,
    motion: Arc<AtomicBool>,
    queue: CommandQueue,
    relay: Arc<JoystickRelay>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    health: watch::Receiver<LinkHealth>,
    applied: watch::Receiver<DriveCommand>,
    // Serializes enable/disable so the flag and the queue agree
    admin: Mutex<()>,
}

impl Rover {
    /// Build the context and start the dispatcher thread. Motion starts disabled.
    pub fn start(config: RoverConfig, opener: Box<dyn PortOpener>) -> std::io::Result<Self> {
        let state = Arc::new(StateManager::new());
        let motion = Arc::new(AtomicBool::new(false));
        let (queue, rx) = CommandQueue::new();

        let dispatcher = SerialDispatcher::new(&config.channels, opener);
        let health = dispatcher.subscribe_health();
        let applied = dispatcher.subscribe_applied();
        let handle = dispatcher.spawn(rx)?;

        let translator = KinematicsTranslator::new(Arc::clone(&state), config.turn_polarity);
        let relay = Arc::new(JoystickRelay::new(
            translator,
            queue.clone(),
            Arc::clone(&motion),
        ));

        Ok(Self {
            config,
            state,
            motion,
            queue,
            relay,
            dispatcher: Mutex::new(Some(handle)),
            health,
            applied,
            admin: Mutex::new(()),
        })
    }

    /// Open the motor links and start translating frames.
    ///
    /// Returns false if motion was already enabled.
    pub fn enable_motion(&self) -> bool {
        let _admin = self.admin();
        if self.motion.load(Ordering::SeqCst) {
            return false;
        }
        // Links open before the first command can be queued
        self.state.reset();
        self.queue.push(QueueItem::Enable);
        self.motion.store(true, Ordering::SeqCst);
        info!("Motion enabled");
        true
    }

    /// Stop translating frames, send STOP and close the motor links.
    ///
    /// Returns false if motion was already disabled.
    pub fn disable_motion(&self) -> bool {
        let _admin = self.admin();
        if !self.motion.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.queue.push(QueueItem::Disable);
        self.state.reset();
        info!("Motion disabled");
        true
    }

    pub fn motion_enabled(&self) -> bool {
        self.motion.load(Ordering::SeqCst)
    }

    pub fn relay(&self) -> Arc<JoystickRelay> {
        Arc::clone(&self.relay)
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn subscribe_health(&self) -> watch::Receiver<LinkHealth> {
        self.health.clone()
    }

    pub fn subscribe_applied(&self) -> watch::Receiver<DriveCommand> {
        self.applied.clone()
    }

    /// Stop the dispatcher, waiting at most the configured grace period.
    ///
    /// Returns true if the dispatcher exited cleanly. Later calls are no-ops.
    pub async fn shutdown(&self) -> bool {
        self.motion.store(false, Ordering::SeqCst);
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        match handle {
            Some(handle) => handle.shutdown(&self.queue, self.config.shutdown_grace).await,
            None => true,
        }
    }

    fn admin(&self) -> MutexGuard<'_, ()> {
        self.admin.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Run the rover until Ctrl-C
pub async fn run(config: RoverConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(
        "Starting rover: left={}, right={}, {} baud, turn polarity {:?}",
        config.channels.left, config.channels.right, config.baud, config.turn_polarity
    );

    let opener = SerialOpener::new(config.baud, config.serial_timeout);
    let listener = relay::bind(&config.listen).await?;
    let rover = Arc::new(Rover::start(config.clone(), Box::new(opener))?);

    if config.enable_motion {
        rover.enable_motion();
    }

    let server = tokio::spawn(rover.relay().serve(listener));

    let telemetry = if config.telemetry {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default()).await?;
        let rover = Arc::clone(&rover);
        Some(tokio::spawn(async move {
            if let Err(e) = telemetry::run(session, rover).await {
                warn!("Telemetry stopped: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");

    server.abort();
    if let Some(task) = telemetry {
        task.abort();
    }
    rover.shutdown().await;
    Ok(())
}
