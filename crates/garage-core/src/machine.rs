//! Per-device door state machine.
//!
//! Synchronous and free of I/O so every guard runs before the caller's
//! first `.await`. The caller supplies `now` for anything time-dependent,
//! which keeps the machine testable under a paused tokio clock.
//!
//! ```text
//! closed --open--> opening --timer--> open
//!   ^                 |
//!   +---dispatch err--+
//! open --close--> closing --timer--> closed
//!   ^                |
//!   +--dispatch err--+
//! ```
//!
//! While a transition is in flight, authoritative reports for that device
//! never touch its door state.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::animation;
use crate::error::TransitionError;
use crate::model::{DeviceId, DoorAction, DoorState, ReportedState};

// ── Transition ───────────────────────────────────────────────────────

/// A local transition from the moment it is guarded until it resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub intent_id: Uuid,
    pub action: DoorAction,
    /// Stable state to revert to if dispatch fails.
    pub from: DoorState,
    /// When the animation started. `None` while dispatch is pending.
    pub started_at: Option<Instant>,
    pub duration: Duration,
}

impl Transition {
    pub fn target(&self) -> DoorState {
        DoorState::terminal_for(self.action)
    }

    pub fn progress(&self, now: Instant) -> f64 {
        self.started_at
            .map_or(0.0, |start| animation::progress(start, now, self.duration))
    }

    pub fn position(&self, now: Instant) -> f64 {
        let from = animation::resting_position(self.from);
        let to = animation::resting_position(self.target());
        animation::lerp(from, to, self.progress(now))
    }
}

#[derive(Debug, Clone)]
struct DoorEntry {
    state: DoorState,
    transition: Option<Transition>,
}

// ── MergeOutcome ─────────────────────────────────────────────────────

/// What an authoritative report did to the door state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The report changed the state.
    Applied { from: DoorState, to: DoorState },
    /// The report agreed with the current state.
    Unchanged,
    /// A transition is in flight; the report was ignored.
    Suppressed,
    /// The report was transient (`opening`/`closing`/`moving`).
    NotAuthoritative,
    /// The device was never registered; the report was dropped.
    Untracked,
}

// ── DoorStateMachine ─────────────────────────────────────────────────

/// Door state and in-flight transitions for every known device.
#[derive(Debug)]
pub struct DoorStateMachine {
    doors: HashMap<DeviceId, DoorEntry>,
    transition_duration: Duration,
}

impl DoorStateMachine {
    pub fn new(transition_duration: Duration) -> Self {
        Self {
            doors: HashMap::new(),
            transition_duration,
        }
    }

    pub fn transition_duration(&self) -> Duration {
        self.transition_duration
    }

    /// Start tracking a device. Existing devices keep their state.
    pub fn register(&mut self, device: DeviceId, initial: DoorState) {
        let initial = match initial {
            DoorState::Opening => DoorState::Closed,
            DoorState::Closing => DoorState::Open,
            stable => stable,
        };
        self.doors.entry(device).or_insert(DoorEntry {
            state: initial,
            transition: None,
        });
    }

    /// Stop tracking a device, abandoning any transition.
    pub fn forget(&mut self, device: &DeviceId) {
        self.doors.remove(device);
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.doors.contains_key(device)
    }

    pub fn state(&self, device: &DeviceId) -> Option<DoorState> {
        self.doors.get(device).map(|e| e.state)
    }

    pub fn is_in_flight(&self, device: &DeviceId) -> bool {
        self.doors
            .get(device)
            .is_some_and(|e| e.transition.is_some())
    }

    pub fn transition(&self, device: &DeviceId) -> Option<&Transition> {
        self.doors.get(device).and_then(|e| e.transition.as_ref())
    }

    // ── User-driven transitions ──────────────────────────────────────

    /// Guard and start a transition, moving the door to its transient state.
    ///
    /// Returns the optimistic state on success.
    pub fn begin(
        &mut self,
        device: &DeviceId,
        action: DoorAction,
        intent_id: Uuid,
    ) -> Result<DoorState, TransitionError> {
        let duration = self.transition_duration;
        let entry = self
            .doors
            .get_mut(device)
            .ok_or_else(|| TransitionError::UnknownDevice {
                device: device.clone(),
            })?;

        if entry.transition.is_some() {
            return Err(TransitionError::InFlight {
                device: device.clone(),
            });
        }

        let terminal = DoorState::terminal_for(action);
        if entry.state == terminal {
            return Err(TransitionError::AlreadyInState {
                device: device.clone(),
                state: entry.state,
            });
        }

        let transient = DoorState::transient_for(action);
        entry.transition = Some(Transition {
            intent_id,
            action,
            from: entry.state,
            started_at: None,
            duration,
        });
        entry.state = transient;
        Ok(transient)
    }

    /// Dispatch was acknowledged: start the animation clock.
    ///
    /// Returns `false` if `intent_id` is not the device's current transition.
    pub fn dispatch_succeeded(&mut self, device: &DeviceId, intent_id: Uuid, now: Instant) -> bool {
        match self.current_mut(device, intent_id) {
            Some(transition) => {
                transition.started_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Dispatch failed: revert to the pre-transition stable state immediately.
    pub fn dispatch_failed(&mut self, device: &DeviceId, intent_id: Uuid) -> Option<DoorState> {
        let entry = self.doors.get_mut(device)?;
        let transition = entry.transition.take_if(|t| t.intent_id == intent_id)?;
        entry.state = transition.from;
        Some(entry.state)
    }

    /// The animation timer fired: settle on the terminal state.
    pub fn complete(&mut self, device: &DeviceId, intent_id: Uuid) -> Option<DoorState> {
        let entry = self.doors.get_mut(device)?;
        let transition = entry
            .transition
            .take_if(|t| t.intent_id == intent_id && t.started_at.is_some())?;
        entry.state = transition.target();
        Some(entry.state)
    }

    // ── Authoritative corrections ────────────────────────────────────

    /// Merge a backend report. Only `open`/`closed` count, and only when idle.
    pub fn apply_authoritative(&mut self, device: &DeviceId, reported: ReportedState) -> MergeOutcome {
        let Some(stable) = DoorState::from_reported(reported) else {
            return MergeOutcome::NotAuthoritative;
        };

        let Some(entry) = self.doors.get_mut(device) else {
            return MergeOutcome::Untracked;
        };

        if entry.transition.is_some() {
            return MergeOutcome::Suppressed;
        }
        if entry.state == stable {
            return MergeOutcome::Unchanged;
        }

        let from = entry.state;
        entry.state = stable;
        MergeOutcome::Applied { from, to: stable }
    }

    // ── Derived animation values ─────────────────────────────────────

    /// Animation progress in `[0, 1]`. Resting doors report `1.0`.
    pub fn progress(&self, device: &DeviceId, now: Instant) -> Option<f64> {
        let entry = self.doors.get(device)?;
        Some(entry.transition.as_ref().map_or(1.0, |t| t.progress(now)))
    }

    /// Visible door height: 100 closed, 10 open, interpolated in between.
    pub fn position(&self, device: &DeviceId, now: Instant) -> Option<f64> {
        let entry = self.doors.get(device)?;
        Some(match &entry.transition {
            Some(t) => t.position(now),
            None => animation::resting_position(entry.state),
        })
    }

    fn current_mut(&mut self, device: &DeviceId, intent_id: Uuid) -> Option<&mut Transition> {
        self.doors
            .get_mut(device)?
            .transition
            .as_mut()
            .filter(|t| t.intent_id == intent_id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DURATION: Duration = Duration::from_millis(7000);

    fn machine_with(state: DoorState) -> (DoorStateMachine, DeviceId) {
        let id = DeviceId::from("garage");
        let mut m = DoorStateMachine::new(DURATION);
        m.register(id.clone(), state);
        (m, id)
    }

    #[test]
    fn open_runs_to_completion() {
        let (mut m, id) = machine_with(DoorState::Closed);
        let intent = Uuid::new_v4();

        assert_eq!(m.begin(&id, DoorAction::Open, intent).unwrap(), DoorState::Opening);
        assert!(m.is_in_flight(&id));

        let start = Instant::now();
        assert!(m.dispatch_succeeded(&id, intent, start));
        let half = m.progress(&id, start + DURATION / 2).unwrap();
        assert!((half - 0.5).abs() < 1e-9);

        assert_eq!(m.complete(&id, intent), Some(DoorState::Open));
        assert!(!m.is_in_flight(&id));
        assert!((m.progress(&id, start + DURATION).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((m.position(&id, start).unwrap() - animation::OPEN_POSITION).abs() < f64::EPSILON);
    }

    #[test]
    fn second_request_while_in_flight_is_rejected() {
        let (mut m, id) = machine_with(DoorState::Closed);
        m.begin(&id, DoorAction::Open, Uuid::new_v4()).unwrap();

        let err = m.begin(&id, DoorAction::Close, Uuid::new_v4()).unwrap_err();
        assert_eq!(err, TransitionError::InFlight { device: id.clone() });
        assert_eq!(m.state(&id), Some(DoorState::Opening));
    }

    #[test]
    fn dispatch_failure_reverts_to_previous_stable_state() {
        let (mut m, id) = machine_with(DoorState::Open);
        let intent = Uuid::new_v4();
        m.begin(&id, DoorAction::Close, intent).unwrap();

        assert_eq!(m.dispatch_failed(&id, intent), Some(DoorState::Open));
        assert!(!m.is_in_flight(&id));

        // A fresh request is accepted again.
        assert!(m.begin(&id, DoorAction::Close, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn stale_intent_ids_are_ignored() {
        let (mut m, id) = machine_with(DoorState::Closed);
        let intent = Uuid::new_v4();
        m.begin(&id, DoorAction::Open, intent).unwrap();

        let other = Uuid::new_v4();
        assert!(!m.dispatch_succeeded(&id, other, Instant::now()));
        assert_eq!(m.dispatch_failed(&id, other), None);
        assert_eq!(m.complete(&id, other), None);
        assert!(m.is_in_flight(&id));
    }

    #[test]
    fn complete_requires_started_animation() {
        let (mut m, id) = machine_with(DoorState::Closed);
        let intent = Uuid::new_v4();
        m.begin(&id, DoorAction::Open, intent).unwrap();
        assert_eq!(m.complete(&id, intent), None);
        assert!((m.progress(&id, Instant::now()).unwrap()).abs() < f64::EPSILON);
    }

    #[test]
    fn no_op_requests_are_rejected() {
        let (mut m, id) = machine_with(DoorState::Open);
        assert!(matches!(
            m.begin(&id, DoorAction::Open, Uuid::new_v4()),
            Err(TransitionError::AlreadyInState { state: DoorState::Open, .. })
        ));
        assert!(!m.is_in_flight(&id));
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut m = DoorStateMachine::new(DURATION);
        assert!(matches!(
            m.begin(&DeviceId::from("nope"), DoorAction::Open, Uuid::new_v4()),
            Err(TransitionError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn authoritative_report_overrides_idle_state() {
        let (mut m, id) = machine_with(DoorState::Closed);
        assert_eq!(
            m.apply_authoritative(&id, ReportedState::Open),
            MergeOutcome::Applied {
                from: DoorState::Closed,
                to: DoorState::Open
            }
        );
        assert_eq!(m.apply_authoritative(&id, ReportedState::Open), MergeOutcome::Unchanged);
        assert_eq!(
            m.apply_authoritative(&id, ReportedState::Moving),
            MergeOutcome::NotAuthoritative
        );
        assert_eq!(m.state(&id), Some(DoorState::Open));
    }

    #[test]
    fn authoritative_report_is_suppressed_while_in_flight() {
        let (mut m, id) = machine_with(DoorState::Closed);
        let intent = Uuid::new_v4();
        m.begin(&id, DoorAction::Open, intent).unwrap();
        m.dispatch_succeeded(&id, intent, Instant::now());

        assert_eq!(m.apply_authoritative(&id, ReportedState::Closed), MergeOutcome::Suppressed);
        assert_eq!(m.state(&id), Some(DoorState::Opening));

        m.complete(&id, intent);
        assert_eq!(m.state(&id), Some(DoorState::Open));
    }

    #[test]
    fn position_interpolates_while_closing() {
        let (mut m, id) = machine_with(DoorState::Open);
        let intent = Uuid::new_v4();
        m.begin(&id, DoorAction::Close, intent).unwrap();
        let start = Instant::now();
        m.dispatch_succeeded(&id, intent, start);

        let at_start = m.position(&id, start).unwrap();
        let at_end = m.position(&id, start + DURATION).unwrap();
        assert!((at_start - animation::OPEN_POSITION).abs() < f64::EPSILON);
        assert!((at_end - animation::CLOSED_POSITION).abs() < f64::EPSILON);
    }

    #[test]
    fn register_never_stores_transient_state() {
        let mut m = DoorStateMachine::new(DURATION);
        let id = DeviceId::from("1");
        m.register(id.clone(), DoorState::Opening);
        assert_eq!(m.state(&id), Some(DoorState::Closed));
        assert!(!m.is_in_flight(&id));
    }

    #[test]
    fn reports_never_create_doors() {
        let mut m = DoorStateMachine::new(DURATION);
        let ghost = DeviceId::from("ghost");

        assert_eq!(m.apply_authoritative(&ghost, ReportedState::Closed), MergeOutcome::Untracked);
        assert!(!m.contains(&ghost));
        assert!(matches!(
            m.begin(&ghost, DoorAction::Open, Uuid::new_v4()),
            Err(TransitionError::UnknownDevice { .. })
        ));
    }
}
