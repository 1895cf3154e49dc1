//! Idle deadline shared by the accept loop

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Deadline that moves forward on every accepted connection.
///
/// Resets and fire observation take the same lock, so once `expired` has
/// returned no reset succeeds, and a reset that wins the lock always defers
/// the fire.
#[derive(Debug)]
pub struct IdleTimer {
    duration: Duration,
    state: Mutex<TimerState>,
}

#[derive(Debug)]
struct TimerState {
    deadline: Instant,
    fired: bool,
}

impl IdleTimer {
    /// Arm the timer; it fires `duration` from now unless reset
    pub fn start(duration: Duration) -> Self {
        Self {
            duration,
            state: Mutex::new(TimerState {
                deadline: Instant::now() + duration,
                fired: false,
            }),
        }
    }

    /// Current deadline
    pub async fn deadline(&self) -> Instant {
        self.state.lock().await.deadline
    }

    /// Move the deadline to now + duration.
    ///
    /// Returns false when the timer has already fired.
    pub async fn reset(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.fired {
            return false;
        }
        state.deadline = Instant::now() + self.duration;
        true
    }

    /// Resolve once the deadline passes without being moved
    pub async fn expired(&self) {
        loop {
            let deadline = {
                let mut state = self.state.lock().await;
                if state.fired {
                    return;
                }
                if Instant::now() >= state.deadline {
                    state.fired = true;
                    return;
                }
                state.deadline
            };
            sleep_until(deadline).await;
        }
    }

    pub async fn has_fired(&self) -> bool {
        self.state.lock().await.fired
    }
}
