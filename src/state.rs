// Last applied drive state, shared between connections

use std::sync::{Mutex, MutexGuard};

use crate::messages::{Direction, DriveCommand};

/// Tracks the last drive command handed to the motors.
///
/// `update` is the only writer; compare and store happen under one lock so
/// concurrent connections cannot both emit the same transition.
#[derive(Debug, Default)]
pub struct StateManager {
    current: Mutex<DriveCommand>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the candidate if it differs from the current state.
    ///
    /// Returns true when anything changed.
    pub fn update(&self, speed: u8, left: Direction, right: Direction) -> bool {
        self.update_and_then(DriveCommand::new(speed, left, right), |_| {})
    }

    /// Like `update`, but runs `on_change` with the new state before the lock is released.
    ///
    /// Enqueueing from `on_change` keeps queue order identical to state order.
    pub fn update_and_then<F>(&self, candidate: DriveCommand, on_change: F) -> bool
    where
        F: FnOnce(DriveCommand),
    {
        let mut current = self.lock();
        if *current == candidate {
            return false;
        }
        *current = candidate;
        on_change(candidate);
        true
    }

    pub fn current(&self) -> DriveCommand {
        *self.lock()
    }

    /// Forget the last state so the next command is always emitted
    pub fn reset(&self) {
        *self.lock() = DriveCommand::stop();
    }

    fn lock(&self) -> MutexGuard<'_, DriveCommand> {
        // The guarded value is plain data; a panicked writer cannot leave it torn
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_state_is_stop() {
        let state = StateManager::new();
        assert_eq!(state.current(), DriveCommand::stop());
        assert!(!state.update(0, Direction::Stop, Direction::Stop));
    }

    #[test]
    fn test_update_reports_change_once() {
        let state = StateManager::new();
        assert!(state.update(16, Direction::Forward, Direction::Forward));
        assert!(!state.update(16, Direction::Forward, Direction::Forward));
        assert!(state.update(15, Direction::Forward, Direction::Forward));
        assert!(state.update(15, Direction::Forward, Direction::Backward));
        assert_eq!(
            state.current(),
            DriveCommand::new(15, Direction::Forward, Direction::Backward)
        );
    }

    #[test]
    fn test_reset() {
        let state = StateManager::new();
        state.update(20, Direction::Backward, Direction::Forward);
        state.reset();
        assert_eq!(state.current(), DriveCommand::stop());
        assert!(state.update(20, Direction::Backward, Direction::Forward));
    }

    #[test]
    fn test_last_emitted_matches_state_under_contention() {
        let state = Arc::new(StateManager::new());
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let commands = [
            DriveCommand::new(16, Direction::Forward, Direction::Forward),
            DriveCommand::new(16, Direction::Backward, Direction::Backward),
        ];

        let handles: Vec<_> = (0..2)
            .map(|t| {
                let state = Arc::clone(&state);
                let emitted = Arc::clone(&emitted);
                thread::spawn(move || {
                    for i in 0..200 {
                        let cmd = commands[(i + t) % 2];
                        state.update_and_then(cmd, |cmd| {
                            // Widen the window between the decision and the emit
                            thread::sleep(std::time::Duration::from_micros(50));
                            emitted.lock().unwrap().push(cmd);
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.last().copied(), Some(state.current()));
        assert!(emitted.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_concurrent_updates_emit_single_transition() {
        let state = Arc::new(StateManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.update(20, Direction::Forward, Direction::Forward))
            })
            .collect();

        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&changed| changed)
            .count();
        assert_eq!(changed, 1);
    }
}
