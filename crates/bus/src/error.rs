//! Error types for bus operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Event name must not be empty")]
    EmptyEventName,
}
