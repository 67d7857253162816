// Serial links to the two motor controller boards
//
// Each board takes one ASCII line per command: DIR:<FORWARD|BACKWARD|STOP>,SPEED:<n>\n
// and may answer with a single acknowledgement line.

use serialport::{self, SerialPort};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{BAUD_RATE, SERIAL_TIMEOUT};
use crate::messages::LinkState;

/// Longest acknowledgement line we will buffer
const MAX_ACK_LEN: usize = 128;

/// Error types for motor link communication
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Cannot open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Link {0} is not open")]
    NotOpen(Side),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Logical drive side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Byte-level connection to one controller
pub trait LinkPort: Send {
    /// Write a full line and flush it
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read one acknowledgement line if the controller sent one.
    /// Waits at most the port timeout; `Ok(None)` when nothing arrived.
    fn read_ack(&mut self) -> io::Result<Option<String>>;
}

/// Opens connections by port path
pub trait PortOpener: Send {
    fn open(&self, path: &str) -> Result<Box<dyn LinkPort>>;
}

/// `PortOpener` backed by real serial devices
#[derive(Debug, Clone)]
pub struct SerialOpener {
    baud: u32,
    timeout: Duration,
}

impl SerialOpener {
    pub fn new(baud: u32, timeout: Duration) -> Self {
        Self { baud, timeout }
    }
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self::new(BAUD_RATE, SERIAL_TIMEOUT)
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, path: &str) -> Result<Box<dyn LinkPort>> {
        let port = serialport::new(path, self.baud)
            .timeout(self.timeout)
            .open()
            .map_err(|source| LinkError::Open {
                port: path.to_string(),
                source,
            })?;
        Ok(Box::new(SerialLinkPort { port }))
    }
}

struct SerialLinkPort {
    port: Box<dyn SerialPort>,
}

impl LinkPort for SerialLinkPort {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.flush()
    }

    fn read_ack(&mut self) -> io::Result<Option<String>> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(None);
        }
        read_line(&mut self.port)
    }
}

/// Read bytes up to a newline. A timeout ends the line early.
fn read_line<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while line.len() < MAX_ACK_LEN {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let text = String::from_utf8_lossy(&line).trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

/// One motor controller connection and its lifecycle state
pub struct SerialLink {
    side: Side,
    path: String,
    state: LinkState,
    port: Option<Box<dyn LinkPort>>,
}

impl SerialLink {
    pub fn new(side: Side, path: impl Into<String>) -> Self {
        Self {
            side,
            path: path.into(),
            state: LinkState::Uninitialized,
            port: None,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Open (or reopen) the port. On failure the link is left FAILED.
    pub fn open(&mut self, opener: &dyn PortOpener) -> Result<()> {
        self.port = None;
        match opener.open(&self.path) {
            Ok(port) => {
                self.port = Some(port);
                self.state = LinkState::Open;
                info!("{} link open on {}", self.side, self.path);
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Failed;
                warn!("{} link failed to open: {}", self.side, e);
                Err(e)
            }
        }
    }

    /// Write one command line. Any I/O error demotes the link to FAILED.
    pub fn send(&mut self, line: &str) -> Result<()> {
        let side = self.side;
        let port = self.port.as_mut().ok_or(LinkError::NotOpen(side))?;
        debug!("{} <- {}", side, line.trim_end());

        if let Err(e) = port.write_line(line) {
            self.fail(&e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Best-effort acknowledgement read after a write
    pub fn read_ack(&mut self) -> Result<Option<String>> {
        let side = self.side;
        let port = self.port.as_mut().ok_or(LinkError::NotOpen(side))?;

        match port.read_ack() {
            Ok(ack) => {
                if let Some(ref ack) = ack {
                    debug!("{} -> {}", side, ack);
                }
                Ok(ack)
            }
            Err(e) => {
                self.fail(&e);
                Err(e.into())
            }
        }
    }

    /// Drop the connection and return to UNINITIALIZED
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("{} link closed", self.side);
        }
        self.state = LinkState::Uninitialized;
    }

    fn fail(&mut self, error: &io::Error) {
        warn!("{} link I/O error on {}: {}", self.side, self.path, error);
        self.port = None;
        self.state = LinkState::Failed;
    }
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("side", &self.side)
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}
