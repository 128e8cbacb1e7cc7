//! Error types for the monitor

use crate::config::ConfigError;
use rma_core::{RmaError, StoreError};

/// Monitor error type
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Case file could not be opened
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Engine operation failed
    #[error(transparent)]
    Rma(#[from] RmaError),

    /// Scheduler task is no longer running
    #[error("scheduler is not running")]
    SchedulerStopped,
}

impl MonitorError {
    /// Check if the caller caused the error
    #[inline]
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Rma(e) => e.is_user_error(),
            Self::Store(_) | Self::SchedulerStopped => false,
        }
    }
}
