// Keyboard teleop: W/S drive, A/D turn, R/F stick deflection, Q quit
// Sends joystick frames to the rover relay as if a gamepad were attached.
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

use rover_joystick_runtime::config::{AXIS_FORWARD, AXIS_TURN};
use rover_joystick_runtime::messages::JoystickFrame;

const DEFLECTIONS: [f32; 3] = [0.6, 0.8, 1.0]; // forward axis magnitude
const INPUT_TIMEOUT_MS: u64 = 150; // Center the stick after this much time with no input

#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
struct Args {
    /// Rover relay to connect to
    #[arg(short, long, default_value = "127.0.0.1:9009")]
    relay: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Connecting to {}...", args.relay);
    let mut stream = TcpStream::connect(&args.relay).await?;

    info!("Controls: W/S=drive, A/D=turn, R/F=deflection, Q=quit");
    print_deflection(0);

    enable_raw_mode()?;
    let result = run_teleop(&mut stream).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(stream: &mut TcpStream) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut level: usize = 0;

    // Persistent stick state
    let mut forward = 0.0f32;
    let mut turn = 0.0f32;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Negative forward axis drives forward, like a gamepad stick pushed up
                    KeyCode::Char('w') if pressed => {
                        forward = -DEFLECTIONS[level];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        forward = DEFLECTIONS[level];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        turn = -1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        turn = 1.0;
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        level = (level + 1).min(DEFLECTIONS.len() - 1);
                        print_deflection(level);
                    }
                    KeyCode::Char('f') if pressed => {
                        level = level.saturating_sub(1);
                        print_deflection(level);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            forward = 0.0;
            turn = 0.0;
        }

        // Always send at ~50Hz; the rover drops repeats
        let frame = JoystickFrame::from_axes(&[(AXIS_FORWARD, forward), (AXIS_TURN, turn)]);
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;
    }

    Ok(())
}

fn print_deflection(level: usize) {
    let label = ["LOW", "MED", "FULL"][level];
    info!("Deflection: {}", label);
}
