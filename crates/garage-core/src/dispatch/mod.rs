// ── Command dispatch ──
//
// Sends one intent over two independent paths: a best-effort push over
// the stream and a direct request whose answer alone decides success.

mod endpoint;
mod location;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use garage_api::{CommandAck, OutboundCommand};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, LocationError};
use crate::model::{CommandIntent, Coordinates};

pub use endpoint::ApiEndpoint;
pub use location::FixedLocation;

// ── Seams ────────────────────────────────────────────────────────────

/// The direct request/response command path.
pub trait CommandEndpoint: Send + Sync {
    fn send<'a>(&'a self, intent: &'a CommandIntent)
    -> BoxFuture<'a, Result<CommandAck, garage_api::Error>>;
}

/// The fire-and-forget push path.
pub trait PushSink: Send + Sync {
    fn push(&self, command: &OutboundCommand) -> Result<(), garage_api::Error>;
}

/// Source of location proof attached to commands.
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> BoxFuture<'_, Result<Coordinates, LocationError>>;
}

impl PushSink for garage_api::ResilientChannel {
    fn push(&self, command: &OutboundCommand) -> Result<(), garage_api::Error> {
        self.send_command(command)
    }
}

// ── CommandDispatcher ────────────────────────────────────────────────

/// Dual-path command sender.
///
/// Performs no deduplication; the door state machine's single-flight
/// guard runs before anything reaches here.
#[derive(Clone)]
pub struct CommandDispatcher {
    endpoint: Arc<dyn CommandEndpoint>,
    push: Option<Arc<dyn PushSink>>,
    location: Option<Arc<dyn LocationProvider>>,
    location_timeout: Duration,
    dispatch_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(endpoint: Arc<dyn CommandEndpoint>, dispatch_timeout: Duration) -> Self {
        Self {
            endpoint,
            push: None,
            location: None,
            location_timeout: Duration::from_secs(10),
            dispatch_timeout,
        }
    }

    /// Also send every intent over the push stream.
    pub fn with_push(mut self, push: Arc<dyn PushSink>) -> Self {
        self.push = Some(push);
        self
    }

    /// Require location proof, resolved under `timeout` before anything is sent.
    pub fn with_location(mut self, provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        self.location = Some(provider);
        self.location_timeout = timeout;
        self
    }

    /// Send `intent` over both paths. Only the direct acknowledgement counts.
    pub async fn dispatch(&self, mut intent: CommandIntent) -> Result<CommandAck, DispatchError> {
        if let Some(provider) = &self.location {
            let coords = tokio::time::timeout(self.location_timeout, provider.locate())
                .await
                .map_err(|_| DispatchError::LocationTimeout {
                    timeout_ms: millis(self.location_timeout),
                })??;
            debug!(intent_id = %intent.id, "location proof resolved");
            intent.location_proof = Some(coords);
        }

        if let Some(push) = &self.push {
            let frame = OutboundCommand::new(
                intent.device_id.as_str(),
                intent.action,
                intent.id,
                intent.location_proof,
                intent.issued_at,
            );
            if let Err(e) = push.push(&frame) {
                warn!(intent_id = %intent.id, error = %e, "push send failed, relying on direct request");
            }
        }

        let ack = tokio::time::timeout(self.dispatch_timeout, self.endpoint.send(&intent))
            .await
            .map_err(|_| DispatchError::Timeout {
                timeout_ms: millis(self.dispatch_timeout),
            })??;

        info!(
            intent_id = %intent.id,
            device_id = %intent.device_id,
            action = %intent.action,
            "command acknowledged"
        );
        Ok(ack)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::{DeviceId, DoorAction};

    #[derive(Default)]
    struct FakeEndpoint {
        calls: Mutex<Vec<CommandIntent>>,
        fail_with: Mutex<Option<garage_api::Error>>,
        hang: bool,
    }

    impl CommandEndpoint for FakeEndpoint {
        fn send<'a>(
            &'a self,
            intent: &'a CommandIntent,
        ) -> BoxFuture<'a, Result<CommandAck, garage_api::Error>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(intent.clone());
                if self.hang {
                    std::future::pending::<()>().await;
                }
                match self.fail_with.lock().unwrap().take() {
                    Some(e) => Err(e),
                    None => Ok(CommandAck { message: None }),
                }
            })
        }
    }

    #[derive(Default)]
    struct FakePush {
        sent: AtomicUsize,
        down: bool,
    }

    impl PushSink for FakePush {
        fn push(&self, _command: &OutboundCommand) -> Result<(), garage_api::Error> {
            if self.down {
                return Err(garage_api::Error::NotConnected);
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowLocation;

    impl LocationProvider for SlowLocation {
        fn locate(&self) -> BoxFuture<'_, Result<Coordinates, LocationError>> {
            Box::pin(std::future::pending())
        }
    }

    struct DeniedLocation;

    impl LocationProvider for DeniedLocation {
        fn locate(&self) -> BoxFuture<'_, Result<Coordinates, LocationError>> {
            Box::pin(async { Err(LocationError::Denied) })
        }
    }

    fn intent() -> CommandIntent {
        CommandIntent::new(DeviceId::from("garage"), DoorAction::Open)
    }

    #[tokio::test]
    async fn sends_on_both_paths_with_location() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let push = Arc::new(FakePush::default());
        let coords = Coordinates {
            latitude: 52.0,
            longitude: 4.0,
        };
        let dispatcher = CommandDispatcher::new(endpoint.clone(), Duration::from_secs(5))
            .with_push(push.clone())
            .with_location(Arc::new(FixedLocation::new(coords)), Duration::from_secs(1));

        dispatcher.dispatch(intent()).await.unwrap();

        assert_eq!(push.sent.load(Ordering::SeqCst), 1);
        let calls = endpoint.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].location_proof, Some(coords));
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_dispatch() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let push = Arc::new(FakePush {
            down: true,
            ..FakePush::default()
        });
        let dispatcher =
            CommandDispatcher::new(endpoint.clone(), Duration::from_secs(5)).with_push(push);

        assert!(dispatcher.dispatch(intent()).await.is_ok());
        assert_eq!(endpoint.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn direct_failure_is_the_verdict() {
        let endpoint = Arc::new(FakeEndpoint::default());
        *endpoint.fail_with.lock().unwrap() = Some(garage_api::Error::CommandRejected {
            message: "relay offline".into(),
        });
        let push = Arc::new(FakePush::default());
        let dispatcher =
            CommandDispatcher::new(endpoint.clone(), Duration::from_secs(5)).with_push(push.clone());

        let err = dispatcher.dispatch(intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
        assert_eq!(push.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_surfaces_as_dispatch_error() {
        let endpoint = Arc::new(FakeEndpoint::default());
        *endpoint.fail_with.lock().unwrap() = Some(garage_api::Error::SessionExpired);
        let dispatcher = CommandDispatcher::new(endpoint, Duration::from_secs(5));

        assert!(matches!(
            dispatcher.dispatch(intent()).await,
            Err(DispatchError::Unauthorized)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn location_timeout_sends_nothing() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let push = Arc::new(FakePush::default());
        let dispatcher = CommandDispatcher::new(endpoint.clone(), Duration::from_secs(5))
            .with_push(push.clone())
            .with_location(Arc::new(SlowLocation), Duration::from_secs(10));

        let err = dispatcher.dispatch(intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::LocationTimeout { timeout_ms: 10_000 }));
        assert_eq!(push.sent.load(Ordering::SeqCst), 0);
        assert!(endpoint.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_denied_sends_nothing() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let dispatcher = CommandDispatcher::new(endpoint.clone(), Duration::from_secs(5))
            .with_location(Arc::new(DeniedLocation), Duration::from_secs(10));

        let err = dispatcher.dispatch(intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Location(LocationError::Denied)));
        assert!(endpoint.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_path_runs_under_timeout() {
        let endpoint = Arc::new(FakeEndpoint {
            hang: true,
            ..FakeEndpoint::default()
        });
        let dispatcher = CommandDispatcher::new(endpoint, Duration::from_secs(3));

        let err = dispatcher.dispatch(intent()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 3000 }));
    }
}
