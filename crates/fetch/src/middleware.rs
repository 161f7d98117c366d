//! Middleware - composable request/response stages
//!
//! The chain is `[stage_0, stage_1, ..., transport]`. Each stage receives the
//! request plus a [`Next`] that runs everything after it, so a stage can
//! rewrite the request, inspect the response, or run the rest of the chain
//! more than once.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::sync::Arc;

use crate::auth::{TokenProvider, TokenRefresher};
use crate::error::Result;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    async fn handle(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse>;
}

/// The remainder of the chain after the current stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    transport: &'a dyn HttpTransport,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Middleware>], transport: &'a dyn HttpTransport) -> Self {
        Self { stages, transport }
    }

    pub async fn run(self, request: HttpRequest) -> Result<HttpResponse> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                tracing::trace!(stage = stage.name(), id = %request.id, "Entering middleware");
                stage.handle(request, Next::new(rest, self.transport)).await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// Sets `Authorization: Bearer <token>` when a token is available
pub struct BearerAuth {
    provider: Arc<dyn TokenProvider>,
}

impl BearerAuth {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    fn name(&self) -> &str {
        "BearerAuth"
    }

    async fn handle(&self, mut request: HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        if let Some(token) = self.provider.current_token() {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => {
                    tracing::warn!(id = %request.id, "Token is not a valid header value, sending unauthenticated");
                }
            }
        }
        next.run(request).await
    }
}

/// On a 401, refresh the session and replay the rest of the chain once.
///
/// If the refresh fails, or the replay is still 401, the 401 response is
/// passed up and becomes [`ApiError::Unauthorized`](crate::ApiError::Unauthorized).
pub struct RefreshOnUnauthorized {
    refresher: Arc<dyn TokenRefresher>,
}

impl RefreshOnUnauthorized {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher }
    }
}

#[async_trait]
impl Middleware for RefreshOnUnauthorized {
    fn name(&self) -> &str {
        "RefreshOnUnauthorized"
    }

    async fn handle(&self, request: HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
        let replay = request.clone();
        let response = next.run(request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(id = %replay.id, url = %replay.url, "Got 401, refreshing token");
        match self.refresher.refresh_token().await {
            Ok(()) => next.run(replay).await,
            Err(e) => {
                tracing::warn!(id = %replay.id, "Token refresh failed: {}", e);
                Ok(response)
            }
        }
    }
}
