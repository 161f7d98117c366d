//! Failure broadcasting
//!
//! Callers always get the error back, but toast widgets and auth listeners
//! are not in the call chain. Every failed call is also reported to an
//! optional [`FailureSink`], typically the application's [`EventBus`].

use bus::events::names;
use bus::{DashboardEvent, DynamicEvent, Event, EventBus};
use reqwest::Method;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ErrorKind};

/// One failed request, as seen by listeners
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub request_id: Uuid,
    pub method: Method,
    pub endpoint: String,
    pub error: ApiError,
}

pub trait FailureSink: Send + Sync {
    fn report(&self, failure: &ApiFailure);
}

impl<E> FailureSink for EventBus<E>
where
    E: Event + From<ApiFailure>,
{
    fn report(&self, failure: &ApiFailure) {
        self.publish(E::from(failure.clone()));
    }
}

impl From<ApiFailure> for DashboardEvent {
    fn from(failure: ApiFailure) -> Self {
        match failure.error {
            ApiError::Unauthorized { message } => DashboardEvent::Unauthorized {
                endpoint: failure.endpoint,
                message,
            },
            error => DashboardEvent::ApiError {
                endpoint: failure.endpoint,
                method: failure.method.to_string(),
                status: error.status(),
                kind: error.kind().as_str().to_string(),
                message: error.to_string(),
            },
        }
    }
}

impl From<ApiFailure> for DynamicEvent {
    fn from(failure: ApiFailure) -> Self {
        let name = if failure.error.kind() == ErrorKind::Unauthorized {
            names::AUTH_UNAUTHORIZED
        } else {
            names::API_ERROR
        };
        DynamicEvent::new(
            name,
            json!({
                "requestId": failure.request_id.to_string(),
                "method": failure.method.as_str(),
                "endpoint": failure.endpoint,
                "status": failure.error.status(),
                "kind": failure.error.kind().as_str(),
                "message": failure.error.to_string(),
                "details": failure.error.details(),
            }),
        )
    }
}
