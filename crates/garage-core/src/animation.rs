// ── Transition animation math ──
//
// Pure functions of (start, now, duration, start value, target value).
// The door's visible height is 100 when closed and 10 when open.

use std::time::Duration;

use tokio::time::Instant;

use crate::model::DoorState;

/// Visible door height when fully closed.
pub const CLOSED_POSITION: f64 = 100.0;
/// Visible door height when fully open.
pub const OPEN_POSITION: f64 = 10.0;

/// Fraction of `duration` elapsed since `start`, clamped to `[0, 1]`.
///
/// A zero duration is treated as already complete.
pub fn progress(start: Instant, now: Instant, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 1.0;
    }
    let elapsed = now.saturating_duration_since(start).as_secs_f64();
    (elapsed / duration.as_secs_f64()).clamp(0.0, 1.0)
}

/// Linear interpolation between `from` and `to`.
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Interpolated value at `now` for an animation starting at `start`.
pub fn position(
    start: Instant,
    now: Instant,
    duration: Duration,
    start_value: f64,
    target_value: f64,
) -> f64 {
    lerp(start_value, target_value, progress(start, now, duration))
}

/// Height of a door at rest. Transient states report the height they started from.
pub fn resting_position(state: DoorState) -> f64 {
    match state {
        DoorState::Closed | DoorState::Opening => CLOSED_POSITION,
        DoorState::Open | DoorState::Closing => OPEN_POSITION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEVEN_SECONDS: Duration = Duration::from_millis(7000);

    #[test]
    fn progress_is_clamped() {
        let start = Instant::now();
        assert!(progress(start, start, SEVEN_SECONDS).abs() < f64::EPSILON);
        assert!((progress(start, start + SEVEN_SECONDS * 2, SEVEN_SECONDS) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_before_start_is_zero() {
        let now = Instant::now();
        let start = now + Duration::from_secs(1);
        assert!(progress(start, now, SEVEN_SECONDS).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_duration_is_complete() {
        let start = Instant::now();
        assert!((progress(start, start, Duration::ZERO) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn opening_halfway_is_between_heights() {
        let start = Instant::now();
        let mid = start + Duration::from_millis(3500);
        let h = position(start, mid, SEVEN_SECONDS, CLOSED_POSITION, OPEN_POSITION);
        assert!((h - 55.0).abs() < 1e-9);
    }

    #[test]
    fn closing_ends_at_closed_height() {
        let start = Instant::now();
        let end = start + SEVEN_SECONDS;
        let h = position(start, end, SEVEN_SECONDS, OPEN_POSITION, CLOSED_POSITION);
        assert!((h - CLOSED_POSITION).abs() < f64::EPSILON);
    }
}
