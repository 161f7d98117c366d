//! Fetch Client - HTTP access to the care dashboard API
//!
//! ```text
//! request(endpoint) ─► ResponseCache ─hit──────────────────────────► data
//!                          │ miss
//!                          ▼
//!                     in-flight map ─joined──► shared call ─────────► data / error
//!                          │ new
//!                          ▼
//!              [RefreshOnUnauthorized] → [BearerAuth] → [custom] → HttpTransport
//!                                                                      │
//!                              failures ─► FailureSink (EventBus) ◄────┘
//! ```
//!
//! The client is an explicit instance: build it once at startup and hand
//! clones to whoever needs it.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod middleware;
pub mod response;
pub mod transport;

pub use auth::{CurrentUser, SessionStore, TokenProvider, TokenRefresher};
pub use cache::{CacheKey, ResponseCache};
pub use client::{CachedFetchClient, ClientBuilder, RequestOptions};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind, Result};
pub use events::{ApiFailure, FailureSink};
pub use middleware::{BearerAuth, Middleware, Next, RefreshOnUnauthorized};
pub use response::ResponseData;
pub use transport::{FormPart, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};
