// Direct command path backed by the REST client.

use futures_util::future::BoxFuture;
use garage_api::{CommandAck, GarageClient};

use super::CommandEndpoint;
use crate::config::Flavor;
use crate::model::CommandIntent;

/// Routes intents to the control endpoint the backend flavor exposes.
pub struct ApiEndpoint {
    client: GarageClient,
    flavor: Flavor,
}

impl ApiEndpoint {
    pub fn new(client: GarageClient, flavor: Flavor) -> Self {
        Self { client, flavor }
    }
}

impl CommandEndpoint for ApiEndpoint {
    fn send<'a>(
        &'a self,
        intent: &'a CommandIntent,
    ) -> BoxFuture<'a, Result<CommandAck, garage_api::Error>> {
        Box::pin(async move {
            match self.flavor {
                Flavor::Single => {
                    self.client
                        .trigger(intent.action, intent.location_proof)
                        .await
                }
                Flavor::Fleet => {
                    self.client
                        .control_garage(
                            intent.device_id.as_str(),
                            intent.action,
                            intent.location_proof,
                        )
                        .await
                }
            }
        })
    }
}
