// ── Central reactive data store ──
//
// Thread-safe storage for every known garage door. Mutations are
// broadcast to subscribers via `watch` channels. Only the reconciliation
// path and the state machine's transitions write here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::model::{Device, DeviceId};
use crate::stream::EntityStream;

pub struct DataStore {
    pub(crate) devices: EntityCollection<Device>,
    pub(crate) last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_push_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        let (last_push_event, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            last_full_refresh,
            last_push_event,
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn device_by_id(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.get_by_key(id.as_str())
    }

    /// Resolve a backend identifier (`id` or `esp32_identifier`) to a device id.
    pub fn resolve(&self, identifier: &str) -> Option<DeviceId> {
        self.devices.resolve_key(identifier).map(DeviceId::from)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_devices(&self) -> EntityStream<Device> {
        EntityStream::new(self.devices.subscribe())
    }

    // ── Mutation (crate-private) ─────────────────────────────────────

    pub(crate) fn upsert_device(&self, device: Device) -> bool {
        let key = device.id.as_str().to_owned();
        let alias = device.hardware_identifier.clone();
        self.devices.upsert(key, alias, device)
    }

    pub(crate) fn update_device(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&mut Device),
    ) -> Option<Arc<Device>> {
        self.devices.update(id.as_str(), f)
    }

    /// Drop every device not in `keep`. Returns the removed ids.
    pub(crate) fn retain_devices(&self, keep: &[DeviceId]) -> Vec<DeviceId> {
        let mut removed = Vec::new();
        for key in self.devices.keys() {
            if !keep.iter().any(|id| id.as_str() == key) {
                self.devices.remove(&key);
                removed.push(DeviceId::from(key));
            }
        }
        removed
    }

    pub(crate) fn mark_refreshed(&self) {
        let _ = self.last_full_refresh.send_replace(Some(Utc::now()));
    }

    pub(crate) fn mark_push_event(&self) {
        let _ = self.last_push_event.send_replace(Some(Utc::now()));
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    /// How long ago the last full refresh occurred, or `None` if never refreshed.
    pub fn data_age(&self) -> Option<chrono::Duration> {
        self.last_full_refresh().map(|t| Utc::now() - t)
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
