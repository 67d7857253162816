// Link check: open both motor controller ports and send a single STOP
//
// This only ever commands STOP, so it is safe with the wheels on the ground.
//
// Usage: cargo run --example link_check -- [left_port] [right_port]
// Example: cargo run --example link_check -- /dev/MOT1 /dev/MOT2

use rover_joystick_runtime::config::{BAUD_RATE, LEFT_PORT, RIGHT_PORT, SERIAL_TIMEOUT};
use rover_joystick_runtime::messages::DriveCommand;
use rover_joystick_runtime::motor::{SerialLink, SerialOpener, Side};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let left = args.next().unwrap_or_else(|| LEFT_PORT.to_string());
    let right = args.next().unwrap_or_else(|| RIGHT_PORT.to_string());

    println!("Rover link check ({} baud)", BAUD_RATE);
    println!("  left:  {}", left);
    println!("  right: {}", right);
    println!();

    let opener = SerialOpener::new(BAUD_RATE, SERIAL_TIMEOUT);
    let stop = DriveCommand::stop();
    let mut all_ok = true;

    for (side, path) in [(Side::Left, left), (Side::Right, right)] {
        let mut link = SerialLink::new(side, path);

        if let Err(e) = link.open(&opener) {
            println!("  ✗ {} ({}): {}", side, link.path(), e);
            all_ok = false;
            continue;
        }
        println!("  ✓ {} ({}) open", side, link.path());

        let line = match side {
            Side::Left => stop.left_line(),
            Side::Right => stop.right_line(),
        };
        match link.send(&line) {
            Ok(()) => println!("    sent {}", line.trim_end()),
            Err(e) => {
                println!("    ✗ write failed: {}", e);
                all_ok = false;
                continue;
            }
        }

        match link.read_ack() {
            Ok(Some(ack)) => println!("    ack: {}", ack),
            Ok(None) => println!("    no ack (controller may not echo)"),
            Err(e) => println!("    ✗ read failed: {}", e),
        }
        link.close();
    }

    println!();
    if all_ok {
        println!("Both links OK.");
    } else {
        println!("Troubleshooting:");
        println!("  - Check the port paths (or the udev MOT1/MOT2 symlinks)");
        println!("  - Verify the USB cables are connected");
        println!("  - Make sure no other process holds the ports");
    }
    Ok(())
}
