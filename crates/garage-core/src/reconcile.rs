// ── Reconciliation ──
//
// Merges authoritative status (polled or pushed) into the device store.
// Door state goes through the state machine, which ignores reports while
// a transition is in flight; sensor readings and activity always merge.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use garage_api::{GarageRecord, InboundEvent, StatusReport, StatusUpdate};
use strum::Display;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::machine::{DoorStateMachine, MergeOutcome};
use crate::model::{Activity, ActivityKind, Device, DeviceId, DoorState, ReportedState};
use crate::store::DataStore;

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Poll,
    Push,
}

/// One authoritative report about one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub device: DeviceId,
    pub state: Option<ReportedState>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub source: Source,
}

impl Observation {
    pub fn from_status_report(device: DeviceId, report: &StatusReport) -> Self {
        Self {
            device,
            state: report.state,
            temperature: report.temperature,
            humidity: report.humidity,
            observed_at: Utc::now(),
            source: Source::Poll,
        }
    }

    fn from_record(device: DeviceId, record: &GarageRecord) -> Self {
        Self {
            device,
            state: Some(record.current_state),
            temperature: record.temperature,
            humidity: record.humidity,
            observed_at: Utc::now(),
            source: Source::Poll,
        }
    }

    fn from_push(device: DeviceId, update: &StatusUpdate) -> Self {
        Self {
            device,
            state: update.state,
            temperature: update.temperature,
            humidity: update.humidity,
            observed_at: update.timestamp.unwrap_or_else(Utc::now),
            source: Source::Push,
        }
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

/// Borrowed view over the state a merge touches.
pub(crate) struct Reconciler<'a> {
    pub store: &'a DataStore,
    pub machine: &'a Mutex<DoorStateMachine>,
    pub activity: &'a broadcast::Sender<Arc<Activity>>,
    /// Set for single-garage backends, whose reports never name a device.
    pub single_device: Option<&'a DeviceId>,
}

impl Reconciler<'_> {
    /// Merge one observation. The store's door state is always copied from
    /// the machine, so the two never disagree.
    pub fn merge(&self, obs: &Observation) -> MergeOutcome {
        let mut machine = lock(self.machine);
        let outcome = match obs.state {
            Some(state) => machine.apply_authoritative(&obs.device, state),
            None => MergeOutcome::NotAuthoritative,
        };
        let door = machine.state(&obs.device);
        let touch = obs.source == Source::Push || matches!(outcome, MergeOutcome::Applied { .. });

        let updated = self.store.update_device(&obs.device, |d| {
            if let Some(door) = door {
                d.door = door;
            }
            if obs.state.is_some() {
                d.reported = obs.state;
            }
            d.sensors.merge(obs.temperature, obs.humidity, obs.observed_at);
            if touch {
                d.touch(obs.observed_at);
            }
        });
        drop(machine);

        if updated.is_none() {
            debug!(device_id = %obs.device, "observation for untracked garage dropped");
            return outcome;
        }

        match outcome {
            MergeOutcome::Applied { from, to } => {
                info!(device_id = %obs.device, %from, %to, source = %obs.source, "door state corrected");
                self.emit(Some(obs.device.clone()), ActivityKind::DoorChanged { from, to });
            }
            MergeOutcome::Suppressed => {
                debug!(
                    device_id = %obs.device,
                    reported = ?obs.state,
                    source = %obs.source,
                    "report ignored while transition in flight"
                );
            }
            MergeOutcome::Unchanged | MergeOutcome::NotAuthoritative | MergeOutcome::Untracked => {}
        }
        outcome
    }

    /// Merge a fleet listing: add new garages, refresh metadata, drop vanished ones.
    pub fn apply_fleet(&self, records: &[GarageRecord]) {
        let mut seen = Vec::with_capacity(records.len());

        for record in records {
            let id = DeviceId::from(record.id.as_str());
            seen.push(id.clone());

            let existing = self.store.device_by_id(&id);
            let mut device = match existing {
                Some(d) => Device::clone(&d),
                None => {
                    let initial = DoorState::from_reported(record.current_state).unwrap_or_else(|| {
                        debug!(device_id = %id, reported = %record.current_state, "new garage in motion, assuming closed");
                        DoorState::Closed
                    });
                    lock(self.machine).register(id.clone(), initial);
                    Device::new(id.clone(), record.name.clone(), initial)
                }
            };
            device.name.clone_from(&record.name);
            device.hardware_identifier = Some(record.esp32_identifier.clone());
            self.store.upsert_device(device);

            self.merge(&Observation::from_record(id, record));
        }

        let removed = self.store.retain_devices(&seen);
        if !removed.is_empty() {
            let mut machine = lock(self.machine);
            for id in &removed {
                machine.forget(id);
            }
            info!(count = removed.len(), "garages removed from backend");
        }
    }

    /// Consume one push event.
    pub fn apply_event(&self, event: &InboundEvent) {
        self.store.mark_push_event();
        let device = self.resolve(event.device_id());
        let at = event.timestamp().unwrap_or_else(Utc::now);

        match event {
            InboundEvent::Status(update) => match device {
                Some(id) => {
                    self.merge(&Observation::from_push(id, update));
                }
                None => {
                    debug!(garage = ?update.device_id, "status for unknown garage ignored");
                }
            },
            InboundEvent::CommandAck(echo) => {
                debug!(device_id = ?device, action = ?echo.action, "command relayed on push stream");
                self.touch(device.as_ref(), at);
                self.emit(device, ActivityKind::CommandRelayed { action: echo.action });
            }
            InboundEvent::Error(notice) => {
                warn!(device_id = ?device, message = %notice.message, "backend reported an error");
                self.touch(device.as_ref(), at);
                self.emit(
                    device,
                    ActivityKind::BackendError {
                        message: notice.message.clone(),
                    },
                );
            }
        }
    }

    fn resolve(&self, raw: Option<&str>) -> Option<DeviceId> {
        if let Some(single) = self.single_device {
            return Some(single.clone());
        }
        raw.and_then(|id| self.store.resolve(id))
    }

    fn touch(&self, device: Option<&DeviceId>, at: DateTime<Utc>) {
        if let Some(id) = device {
            self.store.update_device(id, |d| d.touch(at));
        }
    }

    fn emit(&self, device: Option<DeviceId>, kind: ActivityKind) {
        // No subscribers is fine.
        let _ = self.activity.send(Arc::new(Activity::now(device, kind)));
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────────
