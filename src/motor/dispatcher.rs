// Serial dispatcher for the rover base
//
// Owns both motor links on a dedicated thread, drains the command queue and
// turns each drive command into one wire line per side.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::link::{PortOpener, SerialLink, Side};
use crate::config::ChannelMap;
use crate::messages::{DriveCommand, LinkHealth, LinkState};
use crate::queue::{CommandQueue, CommandReceiver, QueueItem};

/// Single writer for both motor controller links
pub struct SerialDispatcher {
    left: SerialLink,
    right: SerialLink,
    opener: Box<dyn PortOpener>,
    health: watch::Sender<LinkHealth>,
    applied: watch::Sender<DriveCommand>,
}

impl SerialDispatcher {
    pub fn new(channels: &ChannelMap, opener: Box<dyn PortOpener>) -> Self {
        let (health, _) = watch::channel(LinkHealth::default());
        let (applied, _) = watch::channel(DriveCommand::stop());
        Self {
            left: SerialLink::new(Side::Left, channels.left.clone()),
            right: SerialLink::new(Side::Right, channels.right.clone()),
            opener,
            health,
            applied,
        }
    }

    /// Link state changes
    pub fn subscribe_health(&self) -> watch::Receiver<LinkHealth> {
        self.health.subscribe()
    }

    /// Commands written to at least one link
    pub fn subscribe_applied(&self) -> watch::Receiver<DriveCommand> {
        self.applied.subscribe()
    }

    pub fn link_health(&self) -> LinkHealth {
        LinkHealth {
            left: self.left.state(),
            right: self.right.state(),
        }
    }

    /// Process one queue item. Returns false once the dispatcher should stop.
    pub fn handle(&mut self, item: QueueItem) -> bool {
        let keep_running = match item {
            QueueItem::Drive(cmd) => {
                self.dispatch(cmd);
                true
            }
            QueueItem::Enable => {
                self.open_links();
                true
            }
            QueueItem::Disable => {
                self.stop_and_close();
                true
            }
            QueueItem::Shutdown => {
                info!("Dispatcher shutting down");
                self.stop_and_close();
                false
            }
        };
        self.publish_health();
        keep_running
    }

    /// Drain the queue until shutdown
    pub fn run(mut self, mut rx: CommandReceiver) {
        info!(
            "Dispatcher started: left={}, right={}",
            self.left.path(),
            self.right.path()
        );
        while self.handle(rx.pop()) {}
    }

    /// Run on a dedicated thread
    pub fn spawn(self, rx: CommandReceiver) -> std::io::Result<DispatcherHandle> {
        let (done_tx, done_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("serial-dispatcher".into())
            .spawn(move || {
                self.run(rx);
                let _ = done_tx.send(());
            })?;

        Ok(DispatcherHandle {
            thread,
            done: done_rx,
        })
    }

    /// Write a command to both sides, then read back one ack per side
    fn dispatch(&mut self, cmd: DriveCommand) {
        self.reinit_failed();

        if !self.left.is_open() && !self.right.is_open() {
            debug!("No link open, skipping {:?}", cmd);
            return;
        }

        debug!(
            "Dispatching speed={}, left={}, right={}",
            cmd.speed, cmd.left, cmd.right
        );

        let mut delivered = false;
        for (link, line) in [
            (&mut self.left, cmd.left_line()),
            (&mut self.right, cmd.right_line()),
        ] {
            if !link.is_open() {
                debug!("{} link {:?}, skipping", link.side(), link.state());
                continue;
            }
            if link.send(&line).is_ok() {
                delivered = true;
            }
        }

        // Both sides are already moving; acks are informational and a read
        // error has already failed its link
        for link in [&mut self.left, &mut self.right] {
            if link.is_open() {
                let _ = link.read_ack();
            }
        }

        if delivered {
            self.applied.send_replace(cmd);
        }
    }

    /// Try to reopen every FAILED link
    fn reinit_failed(&mut self) {
        for link in [&mut self.left, &mut self.right] {
            if link.state() == LinkState::Failed {
                info!("Reinitializing {} link", link.side());
                let _ = link.open(self.opener.as_ref());
            }
        }
    }

    fn open_links(&mut self) {
        for link in [&mut self.left, &mut self.right] {
            if !link.is_open() {
                let _ = link.open(self.opener.as_ref());
            }
        }
    }

    /// STOP on every open link, then close both
    fn stop_and_close(&mut self) {
        let stop = DriveCommand::stop();
        for (link, line) in [
            (&mut self.left, stop.left_line()),
            (&mut self.right, stop.right_line()),
        ] {
            if link.is_open() {
                if let Err(e) = link.send(&line) {
                    warn!("Failed to stop {} motor: {}", link.side(), e);
                }
            }
            link.close();
        }
        self.applied.send_replace(stop);
    }

    fn publish_health(&self) {
        let now = self.link_health();
        self.health.send_if_modified(|health| {
            if *health == now {
                return false;
            }
            *health = now;
            true
        });
    }
}

impl Drop for SerialDispatcher {
    fn drop(&mut self) {
        // Never leave the motors running when the owner goes away
        if self.left.is_open() || self.right.is_open() {
            self.stop_and_close();
        }
    }
}

/// Handle to a running dispatcher thread
pub struct DispatcherHandle {
    thread: JoinHandle<()>,
    done: oneshot::Receiver<()>,
}

impl DispatcherHandle {
    /// Push the shutdown sentinel and wait up to `grace` for the thread to finish.
    ///
    /// Returns false if the thread did not exit in time; it is left detached.
    pub async fn shutdown(self, queue: &CommandQueue, grace: Duration) -> bool {
        queue.push(QueueItem::Shutdown);

        match tokio::time::timeout(grace, self.done).await {
            Ok(_) => {
                let thread = self.thread;
                if !matches!(tokio::task::spawn_blocking(move || thread.join()).await, Ok(Ok(()))) {
                    error!("Dispatcher thread panicked");
                }
                info!("Dispatcher stopped");
                true
            }
            Err(_) => {
                error!("Dispatcher did not stop within {:?}, detaching", grace);
                false
            }
        }
    }
}
