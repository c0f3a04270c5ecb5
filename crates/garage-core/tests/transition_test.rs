#![allow(clippy::unwrap_used)]
// Door transition properties under a paused clock, with a fake command path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

use garage_api::transport::TransportConfig;
use garage_api::{CommandAck, GarageClient, StatusReport};
use garage_core::{
    ActivityKind, CommandDispatcher, CommandEndpoint, CommandIntent, Controller, ControllerConfig,
    CoreError, DeviceId, DispatchError, DoorAction, DoorState, Flavor, ReportedState,
    TransitionError, SINGLE_DEVICE_ID,
};

const TRANSITION: Duration = Duration::from_millis(7000);

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Ack,
    Reject,
    /// Wait for `release` before acknowledging.
    Gate,
}

struct FakeEndpoint {
    behavior: Behavior,
    release: Notify,
    calls: AtomicUsize,
}

impl FakeEndpoint {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl CommandEndpoint for FakeEndpoint {
    fn send<'a>(
        &'a self,
        _intent: &'a CommandIntent,
    ) -> BoxFuture<'a, Result<CommandAck, garage_api::Error>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Ack => Ok(CommandAck { message: None }),
                Behavior::Reject => Err(garage_api::Error::CommandRejected {
                    message: "relay offline".into(),
                }),
                Behavior::Gate => {
                    self.release.notified().await;
                    Ok(CommandAck { message: None })
                }
            }
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn controller(endpoint: Arc<FakeEndpoint>) -> Controller {
    let url = Url::parse("http://127.0.0.1:9").unwrap();
    let mut config = ControllerConfig::new(url.clone(), Flavor::Single);
    config.poll_interval = Duration::ZERO;
    config.transition_duration = TRANSITION;

    let client = GarageClient::new(url, &TransportConfig::default()).unwrap();
    let dispatcher = CommandDispatcher::new(endpoint, Duration::from_secs(15));
    Controller::from_parts(config, client, dispatcher, None)
}

fn garage() -> DeviceId {
    DeviceId::from(SINGLE_DEVICE_ID)
}

fn report(state: ReportedState) -> StatusReport {
    StatusReport {
        state: Some(state),
        temperature: None,
        humidity: None,
        error: None,
    }
}

async fn wait_for_door(ctrl: &Controller, door: DoorState) {
    ctrl.devices()
        .wait_for(|devices| devices.iter().any(|d| d.door == door))
        .await
        .unwrap();
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn open_reaches_open_after_exactly_the_transition_duration() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Ack));
    let id = garage();
    let start = Instant::now();

    let ticket = ctrl.request_transition(&id, DoorAction::Open).await.unwrap();
    assert_eq!(ticket.target, DoorState::Open);
    assert_eq!(ticket.duration, TRANSITION);
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Opening));

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let half = ctrl.progress(&id).unwrap();
    assert!((half - 0.5).abs() < 1e-9, "progress at half time was {half}");

    tokio::time::sleep(Duration::from_millis(3499)).await;
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Opening));

    wait_for_door(&ctrl, DoorState::Open).await;
    assert_eq!(start.elapsed(), TRANSITION);
    assert!((ctrl.progress(&id).unwrap() - 1.0).abs() < f64::EPSILON);
    assert!(!ctrl.is_in_flight(&id));
}

#[tokio::test(start_paused = true)]
async fn failed_dispatch_reverts_and_clears_flag() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Reject));
    let id = garage();
    let mut activity = ctrl.activity();

    let err = ctrl.request_transition(&id, DoorAction::Open).await.unwrap_err();
    assert!(matches!(err, CoreError::Dispatch(DispatchError::Rejected { .. })));
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Closed));
    assert!(!ctrl.is_in_flight(&id));
    assert_eq!(ctrl.device(SINGLE_DEVICE_ID).unwrap().door, DoorState::Closed);

    let started = activity.recv().await.unwrap();
    assert!(matches!(started.kind, ActivityKind::TransitionStarted { action: DoorAction::Open }));
    let reverted = activity.recv().await.unwrap();
    assert!(matches!(
        reverted.kind,
        ActivityKind::TransitionReverted { state: DoorState::Closed, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn second_request_is_rejected_while_in_flight() {
    let endpoint = FakeEndpoint::new(Behavior::Gate);
    let ctrl = controller(Arc::clone(&endpoint));
    let id = garage();

    let first = {
        let ctrl = ctrl.clone();
        let id = id.clone();
        tokio::spawn(async move { ctrl.request_transition(&id, DoorAction::Open).await })
    };
    while !ctrl.is_in_flight(&id) {
        tokio::task::yield_now().await;
    }

    let err = ctrl.request_transition(&id, DoorAction::Close).await.unwrap_err();
    assert!(matches!(err, CoreError::Transition(TransitionError::InFlight { .. })));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

    endpoint.release.notify_one();
    first.await.unwrap().unwrap();
    wait_for_door(&ctrl, DoorState::Open).await;
}

#[tokio::test(start_paused = true)]
async fn poll_during_opening_is_ignored_until_timer_completes() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Ack));
    let id = garage();

    ctrl.request_transition(&id, DoorAction::Open).await.unwrap();

    // Interleave stale polls throughout the animation.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctrl.apply_status(&id, &report(ReportedState::Closed));
        assert_eq!(ctrl.door_state(&id), Some(DoorState::Opening));
    }

    wait_for_door(&ctrl, DoorState::Open).await;

    // Once idle, authoritative data wins again.
    ctrl.apply_status(&id, &report(ReportedState::Closed));
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Closed));
}

#[tokio::test(start_paused = true)]
async fn poll_open_while_idle_updates_closed_device() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Ack));
    let id = garage();
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Closed));

    ctrl.apply_status(&id, &report(ReportedState::Open));
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Open));
    assert_eq!(ctrl.device(SINGLE_DEVICE_ID).unwrap().door, DoorState::Open);
    assert!((ctrl.position(&id).unwrap() - 10.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn abandoned_request_reverts() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Gate));
    let id = garage();

    let result =
        tokio::time::timeout(Duration::from_secs(1), ctrl.request_transition(&id, DoorAction::Open))
            .await;
    assert!(result.is_err());
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Closed));
    assert!(!ctrl.is_in_flight(&id));
}

#[tokio::test(start_paused = true)]
async fn no_op_and_unknown_requests_are_rejected_before_dispatch() {
    let endpoint = FakeEndpoint::new(Behavior::Ack);
    let ctrl = controller(Arc::clone(&endpoint));

    let err = ctrl
        .request_transition(&garage(), DoorAction::Close)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Transition(TransitionError::AlreadyInState { .. })));

    let err = ctrl
        .request_transition(&DeviceId::from("shed"), DoorAction::Open)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Transition(TransitionError::UnknownDevice { .. })));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn close_then_open_round_trip() {
    let ctrl = controller(FakeEndpoint::new(Behavior::Ack));
    let id = garage();
    ctrl.apply_status(&id, &report(ReportedState::Open));

    ctrl.request_transition(&id, DoorAction::Close).await.unwrap();
    assert_eq!(ctrl.door_state(&id), Some(DoorState::Closing));
    wait_for_door(&ctrl, DoorState::Closed).await;

    ctrl.request_transition(&id, DoorAction::Open).await.unwrap();
    wait_for_door(&ctrl, DoorState::Open).await;
}
