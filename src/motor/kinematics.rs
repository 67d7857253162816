// Differential drive kinematics for the two-sided rover base
// Converts a joystick frame (forward axis, turn axis) into a speed and one direction per side.

use std::sync::Arc;

use crate::config::{AXIS_FORWARD, AXIS_TURN, DEAD_ZONE, ENGAGE_THRESHOLD, MAX_SPEED, TurnPolarity};
use crate::messages::{Direction, DriveCommand, JoystickFrame};
use crate::state::StateManager;

use crate::messages::Direction::{Backward, Forward, Stop};

/// Speed from the forward axis, zero inside the dead zone
pub fn axis_speed(forward: f32) -> u8 {
    let magnitude = forward.abs().min(1.0);
    if magnitude <= DEAD_ZONE {
        return 0;
    }
    (magnitude * MAX_SPEED as f32).floor() as u8
}

/// Stateless part of the translation: the command a frame asks for
///
/// # Arguments
/// * `forward` - Forward axis (negative = forward)
/// * `turn` - Turn axis (negative = left)
/// * `polarity` - Which side runs forward on a left turn
pub fn drive_for_axes(forward: f32, turn: f32, polarity: TurnPolarity) -> DriveCommand {
    let (turn_left, turn_right) = turn_pairs(polarity);
    let speed = axis_speed(forward);

    let turning_left = turn < -ENGAGE_THRESHOLD;
    let turning_right = turn > ENGAGE_THRESHOLD;

    if forward < -ENGAGE_THRESHOLD {
        if turning_left {
            DriveCommand::new(speed / 2, turn_left.0, turn_left.1)
        } else if turning_right {
            DriveCommand::new(speed / 2, turn_right.0, turn_right.1)
        } else {
            DriveCommand::new(speed, Forward, Forward)
        }
    } else if forward > ENGAGE_THRESHOLD {
        // Reversing mirrors the forward branch side by side
        if turning_left {
            DriveCommand::new(speed / 2, turn_left.0.reversed(), turn_left.1.reversed())
        } else if turning_right {
            DriveCommand::new(speed / 2, turn_right.0.reversed(), turn_right.1.reversed())
        } else {
            DriveCommand::new(speed, Backward, Backward)
        }
    } else if turning_left {
        DriveCommand::new(MAX_SPEED, turn_left.0, turn_left.1)
    } else if turning_right {
        DriveCommand::new(MAX_SPEED, turn_right.0, turn_right.1)
    } else {
        DriveCommand::new(0, Stop, Stop)
    }
}

/// (left turn, right turn) side pairs for a polarity
fn turn_pairs(polarity: TurnPolarity) -> ((Direction, Direction), (Direction, Direction)) {
    match polarity {
        TurnPolarity::LeftForward => ((Forward, Backward), (Backward, Forward)),
        TurnPolarity::RightForward => ((Backward, Forward), (Forward, Backward)),
    }
}

/// Joystick to drive command translator with change suppression
#[derive(Debug, Clone)]
pub struct KinematicsTranslator {
    state: Arc<StateManager>,
    polarity: TurnPolarity,
}

impl KinematicsTranslator {
    pub fn new(state: Arc<StateManager>, polarity: TurnPolarity) -> Self {
        Self { state, polarity }
    }

    /// Translate a frame. Returns a command only when it differs from the last one applied.
    pub fn translate(&self, frame: &JoystickFrame) -> Option<DriveCommand> {
        self.translate_into(frame, |_| {})
    }

    /// Translate a frame and hand a changed command to `emit` while the state is still locked
    pub fn translate_into<F>(&self, frame: &JoystickFrame, emit: F) -> Option<DriveCommand>
    where
        F: FnOnce(DriveCommand),
    {
        let forward = frame.axis(AXIS_FORWARD);
        let turn = frame.axis(AXIS_TURN);
        let cmd = drive_for_axes(forward, turn, self.polarity);

        self.state.update_and_then(cmd, emit).then_some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> KinematicsTranslator {
        KinematicsTranslator::new(Arc::new(StateManager::new()), TurnPolarity::LeftForward)
    }

    #[test]
    fn test_straight_forward() {
        let frame = JoystickFrame::from_axes(&[(1, -0.8), (2, 0.0)]);
        assert_eq!(
            translator().translate(&frame),
            Some(DriveCommand::new(16, Forward, Forward))
        );
    }

    #[test]
    fn test_forward_left_is_half_speed() {
        let frame = JoystickFrame::from_axes(&[(1, -0.8), (2, -0.6)]);
        assert_eq!(
            translator().translate(&frame),
            Some(DriveCommand::new(8, Forward, Backward))
        );
    }

    #[test]
    fn test_forward_left_grid() {
        // floor(|axis1| * 20) / 2 with integer division
        for forward in [-1.0f32, -0.95, -0.83, -0.77, -0.61, -0.51] {
            for turn in [-0.99f32, -0.8, -0.51] {
                let cmd = drive_for_axes(forward, turn, TurnPolarity::LeftForward);
                let expected = ((forward.abs() * 20.0).floor() as u8) / 2;
                assert_eq!(cmd, DriveCommand::new(expected, Forward, Backward), "{forward} {turn}");
            }
        }
    }

    #[test]
    fn test_spin_right_in_place() {
        let frame = JoystickFrame::from_axes(&[(1, 0.0), (2, 0.7)]);
        assert_eq!(
            translator().translate(&frame),
            Some(DriveCommand::new(MAX_SPEED, Backward, Forward))
        );
    }

    #[test]
    fn test_spin_left_opposes_spin_right() {
        let left = drive_for_axes(0.2, -0.9, TurnPolarity::LeftForward);
        let right = drive_for_axes(0.2, 0.9, TurnPolarity::LeftForward);
        assert_eq!(left, DriveCommand::new(MAX_SPEED, Forward, Backward));
        assert_eq!(left.left, right.left.reversed());
        assert_eq!(left.right, right.right.reversed());
    }

    #[test]
    fn test_right_forward_polarity() {
        let spin = drive_for_axes(0.0, -0.9, TurnPolarity::RightForward);
        assert_eq!(spin, DriveCommand::new(MAX_SPEED, Backward, Forward));
        let diagonal = drive_for_axes(-1.0, 0.9, TurnPolarity::RightForward);
        assert_eq!(diagonal, DriveCommand::new(10, Forward, Backward));
    }

    #[test]
    fn test_reverse_mirrors_forward() {
        assert_eq!(
            drive_for_axes(0.9, 0.0, TurnPolarity::LeftForward),
            DriveCommand::new(18, Backward, Backward)
        );
        assert_eq!(
            drive_for_axes(0.9, -0.9, TurnPolarity::LeftForward),
            DriveCommand::new(9, Backward, Forward)
        );
        assert_eq!(
            drive_for_axes(0.9, 0.9, TurnPolarity::LeftForward),
            DriveCommand::new(9, Forward, Backward)
        );
    }

    #[test]
    fn test_dead_zone() {
        for forward in [-0.1f32, -0.05, 0.0, 0.05, 0.1] {
            assert_eq!(axis_speed(forward), 0);
        }
        assert_eq!(axis_speed(-0.15), 3);
        assert_eq!(axis_speed(1.0), MAX_SPEED);
        assert_eq!(axis_speed(-3.0), MAX_SPEED);
    }

    #[test]
    fn test_between_thresholds_stops() {
        assert_eq!(drive_for_axes(-0.4, 0.3, TurnPolarity::LeftForward), DriveCommand::stop());
        assert_eq!(drive_for_axes(0.5, -0.5, TurnPolarity::LeftForward), DriveCommand::stop());
    }

    #[test]
    fn test_identical_frames_emit_once() {
        let translator = translator();
        let frame = JoystickFrame::from_axes(&[(1, -0.8), (2, 0.0)]);
        assert!(translator.translate(&frame).is_some());
        assert!(translator.translate(&frame).is_none());
    }

    #[test]
    fn test_missing_turn_axis_is_centered() {
        let translator = translator();
        // From the initial STOP state nothing changes, so nothing is emitted
        let frame = JoystickFrame::from_axes(&[(1, 0.0)]);
        assert_eq!(translator.translate(&frame), None);

        translator.translate(&JoystickFrame::from_axes(&[(1, -0.8)]));
        assert_eq!(translator.translate(&frame), Some(DriveCommand::stop()));
    }

    #[test]
    fn test_missing_turn_axis_matches_zero_turn() {
        let with = drive_for_axes(-0.7, 0.0, TurnPolarity::LeftForward);
        let frame = JoystickFrame::from_axes(&[(1, -0.7)]);
        let without = drive_for_axes(frame.axis(1), frame.axis(2), TurnPolarity::LeftForward);
        assert_eq!(with, without);
    }
}
