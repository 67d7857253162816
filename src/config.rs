// Drive limits, serial settings, topics and the runtime configuration
use std::time::Duration;

use clap::{Parser, ValueEnum};

// Drive limits
pub const MAX_SPEED: u8 = 20;

// Stick deflection below this is treated as zero speed
pub const DEAD_ZONE: f32 = 0.1;

// Stick deflection past this engages a drive branch
pub const ENGAGE_THRESHOLD: f32 = 0.5;

// Joystick axes
pub const AXIS_FORWARD: i64 = 1; // negative = forward
pub const AXIS_TURN: i64 = 2; // negative = left

// Motor controller serial configuration
pub const LEFT_PORT: &str = "/dev/MOT1";
pub const RIGHT_PORT: &str = "/dev/MOT2";
pub const BAUD_RATE: u32 = 9600;
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

// Relay
pub const LISTEN_ADDR: &str = "0.0.0.0:9009";
pub const PEER_OUTBOX: usize = 64; // frames buffered per peer before it is dropped
pub const PEER_SEND_TIMEOUT: Duration = Duration::from_millis(500);

// Grace period for the dispatcher thread to exit on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// Zenoh topics
pub const TOPIC_DRIVE: &str = "rover/state/drive"; // applied drive commands
pub const TOPIC_LINKS: &str = "rover/state/links"; // serial link health
pub const TOPIC_MOTION: &str = "rover/cmd/motion"; // "enable" | "disable"

/// Which side runs forward when the rover turns or spins left.
///
/// Turning right always uses the opposite pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TurnPolarity {
    /// Left turn = (left FORWARD, right BACKWARD)
    #[default]
    LeftForward,
    /// Left turn = (left BACKWARD, right FORWARD)
    RightForward,
}

/// Association between logical drive sides and physical serial ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    pub left: String,
    pub right: String,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            left: LEFT_PORT.to_string(),
            right: RIGHT_PORT.to_string(),
        }
    }
}

/// Command line arguments for the rover runtime
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address the joystick relay listens on
    #[arg(short, long, default_value = LISTEN_ADDR)]
    pub listen: String,

    /// Serial port of the left side motor controller
    #[arg(long, default_value = LEFT_PORT)]
    pub left_port: String,

    /// Serial port of the right side motor controller
    #[arg(long, default_value = RIGHT_PORT)]
    pub right_port: String,

    #[arg(long, default_value_t = BAUD_RATE)]
    pub baud: u32,

    /// Serial read/write timeout in milliseconds
    #[arg(long, default_value_t = SERIAL_TIMEOUT.as_millis() as u64)]
    pub serial_timeout_ms: u64,

    /// Which side drives forward on a left turn
    #[arg(long, value_enum, default_value_t = TurnPolarity::LeftForward)]
    pub turn_polarity: TurnPolarity,

    /// Open the serial links and accept drive frames at startup
    #[arg(long)]
    pub enable_motion: bool,

    /// Publish drive state and accept motion commands over zenoh
    #[arg(long)]
    pub telemetry: bool,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub listen: String,
    pub channels: ChannelMap,
    pub baud: u32,
    pub serial_timeout: Duration,
    pub shutdown_grace: Duration,
    pub turn_polarity: TurnPolarity,
    pub enable_motion: bool,
    pub telemetry: bool,
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            listen: LISTEN_ADDR.to_string(),
            channels: ChannelMap::default(),
            baud: BAUD_RATE,
            serial_timeout: SERIAL_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
            turn_polarity: TurnPolarity::default(),
            enable_motion: false,
            telemetry: false,
        }
    }
}

impl From<Args> for RoverConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            channels: ChannelMap {
                left: args.left_port,
                right: args.right_port,
            },
            baud: args.baud,
            serial_timeout: Duration::from_millis(args.serial_timeout_ms),
            shutdown_grace: SHUTDOWN_GRACE,
            turn_polarity: args.turn_polarity,
            enable_motion: args.enable_motion,
            telemetry: args.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["rover"]);
        let config = RoverConfig::from(args);
        assert_eq!(config.channels, ChannelMap::default());
        assert_eq!(config.baud, 9600);
        assert_eq!(config.serial_timeout, Duration::from_secs(1));
        assert_eq!(config.turn_polarity, TurnPolarity::LeftForward);
        assert!(!config.enable_motion);
    }

    #[test]
    fn test_args_swap_channels() {
        let args = Args::parse_from([
            "rover",
            "--left-port",
            "/dev/MOT2",
            "--right-port",
            "/dev/MOT1",
            "--turn-polarity",
            "right-forward",
        ]);
        let config = RoverConfig::from(args);
        assert_eq!(config.channels.left, "/dev/MOT2");
        assert_eq!(config.channels.right, "/dev/MOT1");
        assert_eq!(config.turn_polarity, TurnPolarity::RightForward);
    }
}
