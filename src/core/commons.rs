// src/core/commons.rs

use crate::CancellationToken;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Slice used by every blocking wait so Ctrl+C is noticed quickly.
pub const WAIT_TICK: Duration = Duration::from_millis(100);

/// Returns `true` once the user asked to stop.
pub fn is_cancelled(cancellation_token: &CancellationToken) -> bool {
    cancellation_token.load(Ordering::SeqCst)
}

/// Sleeps for `duration` in short slices.
/// Returns `false` if cancellation was requested before the time was up.
pub fn sleep_cancellable(duration: Duration, cancellation_token: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if is_cancelled(cancellation_token) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(WAIT_TICK.min(deadline - now));
    }
}
