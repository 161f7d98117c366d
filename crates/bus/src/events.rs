//! Dashboard Events - the application's event vocabulary
//!
//! One variant per event name. Serialized form is `{"event": "<name>", "data": {...}}`
//! so the serde tag and [`Event::name`] always agree.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// Well-known event names
pub mod names {
    pub const AUTH_LOGIN: &str = "auth:login";
    pub const AUTH_LOGOUT: &str = "auth:logout";
    pub const AUTH_UNAUTHORIZED: &str = "auth:unauthorized";
    pub const PATIENT_UPDATED: &str = "patient:updated";
    pub const INVENTORY_LOW_STOCK: &str = "inventory:low_stock";
    pub const UI_THEME_CHANGED: &str = "ui:theme_changed";
    pub const UI_NOTIFICATION: &str = "ui:notification";
    pub const API_ERROR: &str = "api:error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events exchanged between dashboard widgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DashboardEvent {
    #[serde(rename = "auth:login")]
    Login { user_id: String, role: String },

    #[serde(rename = "auth:logout")]
    Logout,

    /// A request was rejected with 401 and the session could not be refreshed
    #[serde(rename = "auth:unauthorized")]
    Unauthorized { endpoint: String, message: String },

    #[serde(rename = "patient:updated")]
    PatientUpdated { patient_id: String, changes: Value },

    #[serde(rename = "inventory:low_stock")]
    LowStock { item: String, qty: u32 },

    #[serde(rename = "ui:theme_changed")]
    ThemeChanged { theme: String },

    /// Toast notification request
    #[serde(rename = "ui:notification")]
    Notification {
        level: NotificationLevel,
        message: String,
    },

    #[serde(rename = "api:error")]
    ApiError {
        endpoint: String,
        method: String,
        status: u16,
        kind: String,
        message: String,
    },
}

impl Event for DashboardEvent {
    fn name(&self) -> &str {
        match self {
            DashboardEvent::Login { .. } => names::AUTH_LOGIN,
            DashboardEvent::Logout => names::AUTH_LOGOUT,
            DashboardEvent::Unauthorized { .. } => names::AUTH_UNAUTHORIZED,
            DashboardEvent::PatientUpdated { .. } => names::PATIENT_UPDATED,
            DashboardEvent::LowStock { .. } => names::INVENTORY_LOW_STOCK,
            DashboardEvent::ThemeChanged { .. } => names::UI_THEME_CHANGED,
            DashboardEvent::Notification { .. } => names::UI_NOTIFICATION,
            DashboardEvent::ApiError { .. } => names::API_ERROR,
        }
    }
}
