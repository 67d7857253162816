// Motor control module for the differential-drive rover base
//
// Provides:
// - Joystick to drive command kinematics
// - Serial links to the two motor controller boards
// - The dispatcher thread that owns both links

mod dispatcher;
pub mod kinematics;
pub mod link;

pub use dispatcher::{DispatcherHandle, SerialDispatcher};
pub use kinematics::{drive_for_axes, KinematicsTranslator};
pub use link::{LinkError, PortOpener, SerialLink, SerialOpener, Side};
