// Location proof sources.

use futures_util::future::BoxFuture;

use super::LocationProvider;
use crate::error::LocationError;
use crate::model::Coordinates;

/// Coordinates configured up front (the CLI has no device geolocation).
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    coords: Coordinates,
}

impl FixedLocation {
    pub fn new(coords: Coordinates) -> Self {
        Self { coords }
    }
}

impl LocationProvider for FixedLocation {
    fn locate(&self) -> BoxFuture<'_, Result<Coordinates, LocationError>> {
        let coords = self.coords;
        Box::pin(async move {
            if !coords.latitude.is_finite() || !coords.longitude.is_finite() {
                return Err(LocationError::Unavailable("configured coordinates are not finite".into()));
            }
            Ok(coords)
        })
    }
}
