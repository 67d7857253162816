// Differential-drive rover runtime: gamepad frames in over TCP, motor commands out over serial

pub mod config;
pub mod messages;
pub mod motor;
pub mod queue;
pub mod relay;
pub mod runtime;
pub mod state;
pub mod telemetry;
