// ── Controller abstraction ──
//
// Full lifecycle management for one garage backend. Owns the device
// store, the door state machine, the command dispatcher and the push
// channel, and runs the background reconciliation tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use garage_api::{
    AccessLogEntry, ChannelStatus, GarageClient, InboundEvent, InvalidationReason,
    ResilientChannel, Session, SessionState, StatusReport,
};
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ControllerConfig, Flavor, SINGLE_DEVICE_ID};
use crate::dispatch::{ApiEndpoint, CommandDispatcher, FixedLocation};
use crate::error::CoreError;
use crate::machine::DoorStateMachine;
use crate::model::{Activity, ActivityKind, CommandIntent, Device, DeviceId, DoorAction, DoorState};
use crate::reconcile::{Observation, Reconciler, lock};
use crate::store::DataStore;
use crate::stream::EntityStream;

const ACTIVITY_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The session was invalidated; a new login is required.
    SessionExpired,
    Failed,
}

// ── TransitionTicket ─────────────────────────────────────────────

/// Returned once a transition's command is acknowledged and the animation runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTicket {
    pub intent_id: Uuid,
    pub device_id: DeviceId,
    pub action: DoorAction,
    /// State the door settles in when the animation completes.
    pub target: DoorState,
    pub duration: Duration,
    /// Backend acknowledgement text, if any.
    pub message: Option<String>,
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    store: Arc<DataStore>,
    machine: Mutex<DoorStateMachine>,
    client: GarageClient,
    channel: Option<Arc<ResilientChannel>>,
    dispatcher: CommandDispatcher,
    single_device: Option<DeviceId>,
    connection_state: watch::Sender<ConnectionState>,
    activity_tx: broadcast::Sender<Arc<Activity>>,
    cancel: CancellationToken,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Build a controller from configuration and an issued session.
    ///
    /// Does NOT connect; call [`connect()`](Self::connect) to load state and
    /// start background tasks.
    pub fn new(config: ControllerConfig, session: Option<Session>) -> Result<Self, CoreError> {
        let mut client = GarageClient::new(config.api_url.clone(), &config.transport())?;
        if let Some(session) = session.clone() {
            client = client.with_session(session);
        }

        let channel = config.channel().map(|channel_config| {
            Arc::new(ResilientChannel::new(
                channel_config,
                session,
                CancellationToken::new(),
            ))
        });

        let endpoint = Arc::new(ApiEndpoint::new(client.clone(), config.flavor));
        let mut dispatcher = CommandDispatcher::new(endpoint, config.dispatch_timeout);
        if let Some(channel) = &channel {
            dispatcher = dispatcher.with_push(Arc::clone(channel) as _);
        }
        if let Some(coords) = config.location {
            dispatcher = dispatcher.with_location(
                Arc::new(FixedLocation::new(coords)),
                config.location_timeout,
            );
        }

        Ok(Self::from_parts(config, client, dispatcher, channel))
    }

    /// Assemble a controller from pre-built parts.
    pub fn from_parts(
        config: ControllerConfig,
        client: GarageClient,
        dispatcher: CommandDispatcher,
        channel: Option<Arc<ResilientChannel>>,
    ) -> Self {
        let store = Arc::new(DataStore::new());
        let mut machine = DoorStateMachine::new(config.transition_duration);

        // A single-garage backend has exactly one, anonymous device.
        let single_device = (config.flavor == Flavor::Single).then(|| {
            let id = DeviceId::from(SINGLE_DEVICE_ID);
            machine.register(id.clone(), DoorState::Closed);
            store.upsert_device(Device::new(id.clone(), config.device_name.clone(), DoorState::Closed));
            id
        });

        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (activity_tx, _) = broadcast::channel(ACTIVITY_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                store,
                machine: Mutex::new(machine),
                client,
                channel,
                dispatcher,
                single_device,
                connection_state,
                activity_tx,
                cancel: CancellationToken::new(),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Exchange the backend password for a session.
    pub async fn login(config: &ControllerConfig, password: &SecretString) -> Result<Session, CoreError> {
        let client = GarageClient::new(config.api_url.clone(), &config.transport())?;
        Ok(client.login(password).await?)
    }

    /// Ask the backend whether `session` is still accepted.
    pub async fn verify(config: &ControllerConfig, session: Session) -> Result<bool, CoreError> {
        let client =
            GarageClient::new(config.api_url.clone(), &config.transport())?.with_session(session);
        Ok(client.verify_token().await?)
    }

    /// Invalidate the session and stop everything.
    pub async fn logout(&self) {
        if let Some(session) = self.inner.client.session() {
            session.invalidate(InvalidationReason::Logout);
        }
        self.shutdown().await;
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    /// Id of the only garage on a single-garage backend.
    pub fn single_device(&self) -> Option<&DeviceId> {
        self.inner.single_device.as_ref()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Load the initial state and spawn the background tasks (push
    /// channel, event consumer, status poll, session watcher).
    ///
    /// A rejected session always fails. Any other failed first poll only
    /// fails the fleet flavor, which has no garages until a listing
    /// succeeds; a single garage starts from its default state and the
    /// poll or push stream catches up.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.start(false).await
    }

    async fn start(&self, require_status: bool) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        if let Err(e) = self.refresh().await {
            let fatal =
                require_status || e.is_auth() || self.inner.config.flavor == Flavor::Fleet;
            if fatal {
                let state = if e.is_auth() {
                    ConnectionState::SessionExpired
                } else {
                    ConnectionState::Failed
                };
                let _ = self.inner.connection_state.send(state);
                return Err(e);
            }
            warn!(error = %e, "initial status unavailable, starting from the last known state");
        }

        let mut handles = self.inner.task_handles.lock().await;

        if let Some(channel) = &self.inner.channel {
            // Subscribe before connecting so no early frame is missed.
            let rx = channel.subscribe();
            channel.connect();
            handles.push(tokio::spawn(event_task(self.clone(), rx)));
        }

        let interval = self.inner.config.poll_interval;
        if !interval.is_zero() {
            handles.push(tokio::spawn(poll_task(self.clone(), interval)));
        }

        if let Some(session) = self.inner.client.session() {
            handles.push(tokio::spawn(session_task(self.clone(), session.subscribe())));
        }

        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        info!(
            flavor = %self.inner.config.flavor,
            devices = self.inner.store.device_count(),
            "connected to garage backend"
        );
        Ok(())
    }

    /// Cancel every background task (including pending transition timers
    /// and the reconnect loop) and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        drop(handles);

        if let Some(channel) = &self.inner.channel {
            channel.shutdown().await;
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("controller shut down");
    }

    /// Fetch authoritative status once and merge it.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        match self.inner.config.flavor {
            Flavor::Single => {
                let report = self.inner.client.status().await?;
                if let Some(id) = &self.inner.single_device {
                    self.apply_status(id, &report);
                }
            }
            Flavor::Fleet => {
                let records = self.inner.client.list_garages().await?;
                self.reconciler().apply_fleet(&records);
            }
        }

        self.inner.store.mark_refreshed();
        Ok(())
    }

    /// One-shot: connect, run closure, shut down.
    ///
    /// Disables the push stream and polling since only a single
    /// request-response cycle is needed.
    pub async fn oneshot<F, Fut, T>(
        config: ControllerConfig,
        session: Option<Session>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.ws_url = None;
        cfg.poll_interval = Duration::ZERO;

        let controller = Controller::new(cfg, session)?;
        // A one-shot read has nothing to show without a fresh status.
        controller.start(true).await?;
        let result = f(controller.clone()).await;
        controller.shutdown().await;
        result
    }

    // ── Door transitions ─────────────────────────────────────────

    /// Open or close a door.
    ///
    /// The single-flight guard runs synchronously before the first await,
    /// so a second request for the same door is rejected immediately. On
    /// dispatch failure the door reverts to where it was; on success the
    /// animation runs for the configured duration and then settles.
    pub async fn request_transition(
        &self,
        device: &DeviceId,
        action: DoorAction,
    ) -> Result<TransitionTicket, CoreError> {
        let intent = CommandIntent::new(device.clone(), action);
        let intent_id = intent.id;

        {
            let mut machine = lock(&self.inner.machine);
            let state = machine.begin(device, action, intent_id)?;
            self.inner.store.update_device(device, |d| d.door = state);
        }
        info!(device_id = %device, %action, %intent_id, "transition started");
        self.emit(Some(device.clone()), ActivityKind::TransitionStarted { action });

        let mut pending = PendingTransition {
            controller: self,
            device,
            intent_id,
            armed: true,
        };

        let ack = match self.inner.dispatcher.dispatch(intent).await {
            Ok(ack) => ack,
            Err(e) => {
                pending.armed = false;
                self.revert(device, intent_id, &e.to_string());
                return Err(e.into());
            }
        };
        pending.armed = false;

        let now = Instant::now();
        let duration = {
            let mut machine = lock(&self.inner.machine);
            if !machine.dispatch_succeeded(device, intent_id, now) {
                return Err(CoreError::Internal(format!(
                    "transition {intent_id} for garage {device} was abandoned"
                )));
            }
            machine.transition_duration()
        };

        tokio::spawn(completion_timer(
            self.clone(),
            device.clone(),
            intent_id,
            now + duration,
        ));

        Ok(TransitionTicket {
            intent_id,
            device_id: device.clone(),
            action,
            target: DoorState::terminal_for(action),
            duration,
            message: ack.message,
        })
    }

    fn revert(&self, device: &DeviceId, intent_id: Uuid, reason: &str) {
        let reverted = {
            let mut machine = lock(&self.inner.machine);
            let state = machine.dispatch_failed(device, intent_id);
            if let Some(state) = state {
                self.inner.store.update_device(device, |d| d.door = state);
            }
            state
        };

        if let Some(state) = reverted {
            warn!(device_id = %device, %intent_id, %state, reason, "transition reverted");
            self.emit(
                Some(device.clone()),
                ActivityKind::TransitionReverted {
                    state,
                    reason: reason.to_owned(),
                },
            );
        }
    }

    fn finish_transition(&self, device: &DeviceId, intent_id: Uuid) {
        let settled = {
            let mut machine = lock(&self.inner.machine);
            let state = machine.complete(device, intent_id);
            if let Some(state) = state {
                self.inner.store.update_device(device, |d| {
                    d.door = state;
                    d.touch(chrono::Utc::now());
                });
            }
            state
        };

        if let Some(state) = settled {
            info!(device_id = %device, %intent_id, %state, "transition complete");
            self.emit(Some(device.clone()), ActivityKind::TransitionCompleted { state });
        }
    }

    // ── Reconciliation inputs ────────────────────────────────────

    /// Merge a status snapshot for `device` as if it had been polled.
    pub fn apply_status(&self, device: &DeviceId, report: &StatusReport) {
        self.reconciler()
            .merge(&Observation::from_status_report(device.clone(), report));
    }

    /// Merge one push-stream event.
    pub fn ingest(&self, event: &InboundEvent) {
        self.reconciler().apply_event(event);
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler {
            store: &self.inner.store,
            machine: &self.inner.machine,
            activity: &self.inner.activity_tx,
            single_device: self.inner.single_device.as_ref(),
        }
    }

    // ── Door observation ─────────────────────────────────────────

    pub fn door_state(&self, device: &DeviceId) -> Option<DoorState> {
        lock(&self.inner.machine).state(device)
    }

    pub fn is_in_flight(&self, device: &DeviceId) -> bool {
        lock(&self.inner.machine).is_in_flight(device)
    }

    /// Animation progress in `[0, 1]`; `1.0` for a door at rest.
    pub fn progress(&self, device: &DeviceId) -> Option<f64> {
        lock(&self.inner.machine).progress(device, Instant::now())
    }

    /// Visible door height: 100 closed, 10 open.
    pub fn position(&self, device: &DeviceId) -> Option<f64> {
        lock(&self.inner.machine).position(device, Instant::now())
    }

    // ── State observation ────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Push stream status. Reports disconnected when the stream is disabled.
    pub fn channel_status(&self) -> ChannelStatus {
        self.inner
            .channel
            .as_ref()
            .map(|c| c.status())
            .unwrap_or_default()
    }

    pub fn watch_channel_status(&self) -> Option<watch::Receiver<ChannelStatus>> {
        self.inner.channel.as_ref().map(|c| c.watch_status())
    }

    pub fn activity(&self) -> broadcast::Receiver<Arc<Activity>> {
        self.inner.activity_tx.subscribe()
    }

    // ── Device accessors (delegate to DataStore) ─────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.devices_snapshot()
    }

    pub fn devices(&self) -> EntityStream<Device> {
        self.inner.store.subscribe_devices()
    }

    /// Look a garage up by id or hardware identifier.
    pub fn device(&self, identifier: &str) -> Option<Arc<Device>> {
        let id = self.inner.store.resolve(identifier)?;
        self.inner.store.device_by_id(&id)
    }

    /// Resolve a garage identifier; `None` picks the single garage, or
    /// the only garage of a one-device fleet.
    pub fn resolve_device(&self, identifier: Option<&str>) -> Result<DeviceId, CoreError> {
        if let Some(identifier) = identifier {
            return self
                .inner
                .store
                .resolve(identifier)
                .ok_or_else(|| CoreError::DeviceNotFound {
                    identifier: identifier.to_owned(),
                });
        }

        if let Some(id) = &self.inner.single_device {
            return Ok(id.clone());
        }
        let snapshot = self.inner.store.devices_snapshot();
        match snapshot.as_slice() {
            [only] => Ok(only.id.clone()),
            _ => Err(CoreError::DeviceNotFound {
                identifier: "(none given)".into(),
            }),
        }
    }

    // ── Pass-through reads ───────────────────────────────────────

    pub async fn access_logs(&self) -> Result<Vec<AccessLogEntry>, CoreError> {
        Ok(self.inner.client.list_logs().await?)
    }

    fn emit(&self, device: Option<DeviceId>, kind: ActivityKind) {
        let _ = self.inner.activity_tx.send(Arc::new(Activity::now(device, kind)));
    }
}

// ── Abandoned dispatch guard ─────────────────────────────────────

/// Reverts the optimistic state if `request_transition` is dropped mid-dispatch.
struct PendingTransition<'a> {
    controller: &'a Controller,
    device: &'a DeviceId,
    intent_id: Uuid,
    armed: bool,
}

impl Drop for PendingTransition<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller
                .revert(self.device, self.intent_id, "request abandoned");
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Settle a transition at its deadline unless the controller shuts down first.
async fn completion_timer(controller: Controller, device: DeviceId, intent_id: Uuid, deadline: Instant) {
    let cancel = controller.inner.cancel.clone();

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(device_id = %device, %intent_id, "transition timer cancelled");
        }
        () = tokio::time::sleep_until(deadline) => {
            controller.finish_transition(&device, intent_id);
        }
    }
}

/// Periodically poll authoritative status.
async fn poll_task(controller: Controller, interval: Duration) {
    let cancel = controller.inner.cancel.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match controller.refresh().await {
                    Ok(()) => {}
                    Err(e) if e.is_auth() => {
                        warn!(error = %e, "status poll stopped, session no longer valid");
                        break;
                    }
                    Err(e) => warn!(error = %e, "status poll failed"),
                }
            }
        }
    }
}

/// Drain push events in arrival order.
async fn event_task(controller: Controller, mut rx: broadcast::Receiver<Arc<InboundEvent>>) {
    let cancel = controller.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => controller.ingest(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push event consumer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Flip to `SessionExpired` and stop the push stream once the session dies.
async fn session_task(controller: Controller, mut rx: watch::Receiver<SessionState>) {
    let cancel = controller.inner.cancel.clone();

    let invalidated = tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        res = rx.wait_for(|s| *s != SessionState::Valid) => res.is_ok(),
    };
    if !invalidated {
        return;
    }

    warn!("session invalidated, log in again");
    let _ = controller
        .inner
        .connection_state
        .send(ConnectionState::SessionExpired);
    if let Some(channel) = &controller.inner.channel {
        channel.shutdown().await;
    }
}
