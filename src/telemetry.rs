// Zenoh bridge: publishes applied drive commands and link health,
// and takes motion enable/disable commands from the admin side.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{TOPIC_DRIVE, TOPIC_LINKS, TOPIC_MOTION};
use crate::runtime::Rover;

/// Administrative motion command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    Enable,
    Disable,
}

/// Parse a motion command payload: `enable`/`start` or `disable`/`stop`, optionally JSON-quoted
pub fn parse_motion_command(payload: &[u8]) -> Option<MotionCommand> {
    let text = std::str::from_utf8(payload).ok()?.trim().trim_matches('"');
    match text.to_ascii_lowercase().as_str() {
        "enable" | "start" => Some(MotionCommand::Enable),
        "disable" | "stop" => Some(MotionCommand::Disable),
        _ => None,
    }
}

pub async fn run(
    session: zenoh::Session,
    rover: Arc<Rover>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Setting up publishers and subscribers...");
    let pub_drive = session.declare_publisher(TOPIC_DRIVE).await?;
    let pub_links = session.declare_publisher(TOPIC_LINKS).await?;
    let motion_sub = session.declare_subscriber(TOPIC_MOTION).await?;

    let mut health = rover.subscribe_health();
    let mut applied = rover.subscribe_applied();

    info!("Subscribed to: {}", TOPIC_MOTION);
    info!("Publishing to: {}, {}", TOPIC_DRIVE, TOPIC_LINKS);

    // Publish the starting link state so late joiners see something
    let links_json = serde_json::to_string(&*health.borrow_and_update())?;
    pub_links.put(links_json).await?;

    loop {
        tokio::select! {
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let links_json = serde_json::to_string(&*health.borrow_and_update())?;
                pub_links.put(links_json).await?;
            }
            changed = applied.changed() => {
                if changed.is_err() {
                    break;
                }
                let drive_json = serde_json::to_string(&*applied.borrow_and_update())?;
                pub_drive.put(drive_json).await?;
            }
            sample = motion_sub.recv_async() => {
                let Ok(sample) = sample else { break };
                let payload = sample.payload().to_bytes();
                match parse_motion_command(&payload) {
                    Some(MotionCommand::Enable) => {
                        rover.enable_motion();
                    }
                    Some(MotionCommand::Disable) => {
                        rover.disable_motion();
                    }
                    None => warn!("Unknown motion command: {:?}", String::from_utf8_lossy(&payload)),
                }
            }
        }
    }

    info!("Dispatcher gone, telemetry exiting");
    Ok(())
}
