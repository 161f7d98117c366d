//! Auth collaborators - where bearer tokens come from and how they are renewed

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::error::Result;

/// Source of the current bearer token
pub trait TokenProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_token(&self) -> Option<String> {
        self()
    }
}

/// Renews the session after a 401. `Ok` means a retry is worth attempting.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_token(&self) -> Result<()>;
}

/// Signed-in staff member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// In-memory holder for the signed-in user. Never persisted.
#[derive(Debug, Default)]
pub struct SessionStore {
    user: RwLock<Option<CurrentUser>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, user: CurrentUser) {
        tracing::debug!(user_id = %user.id, role = %user.role, "Session started");
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn logout(&self) {
        if let Some(user) = self.user.write().unwrap_or_else(|e| e.into_inner()).take() {
            tracing::debug!(user_id = %user.id, "Session ended");
        }
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the token of the signed-in user. No-op when signed out.
    pub fn set_token(&self, token: Option<String>) {
        if let Some(user) = self.user.write().unwrap_or_else(|e| e.into_inner()).as_mut() {
            user.token = token;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }
}

impl TokenProvider for SessionStore {
    fn current_token(&self) -> Option<String> {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|u| u.token.clone())
    }
}
