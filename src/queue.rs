// Unbounded FIFO between the connection tasks and the serial dispatcher

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::messages::DriveCommand;

/// Work item for the dispatcher thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    Drive(DriveCommand),
    /// Open both links
    Enable,
    /// Send STOP and close both links
    Disable,
    /// Stop the dispatcher
    Shutdown,
}

/// Producer side of the command queue. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: UnboundedSender<QueueItem>,
}

/// Consumer side, owned by the dispatcher thread
#[derive(Debug)]
pub struct CommandReceiver {
    rx: UnboundedReceiver<QueueItem>,
}

impl CommandQueue {
    pub fn new() -> (Self, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, CommandReceiver { rx })
    }

    /// Enqueue an item. Returns false if the dispatcher has gone away.
    pub fn push(&self, item: QueueItem) -> bool {
        if self.tx.send(item).is_err() {
            warn!("Dispatcher gone, dropping {:?}", item);
            return false;
        }
        true
    }

    pub fn push_command(&self, cmd: DriveCommand) -> bool {
        self.push(QueueItem::Drive(cmd))
    }
}

impl CommandReceiver {
    /// Block until the next item. A closed queue reads as `Shutdown`.
    ///
    /// Must not be called from inside an async context.
    pub fn pop(&mut self) -> QueueItem {
        self.rx.blocking_recv().unwrap_or(QueueItem::Shutdown)
    }

    /// Non-blocking variant
    pub fn try_pop(&mut self) -> Option<QueueItem> {
        self.rx.try_recv().ok()
    }
}
