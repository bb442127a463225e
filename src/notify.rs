//! User Notifications
//!
//! The engine renders nothing; failed mutations are reported to a sink.

use log::warn;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

use crate::error::{EngineError, FailureKind};

/// User-facing description of a failed mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: FailureKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    /// Describe the failure of `action` (e.g. "add to shot")
    pub fn from_error(action: &str, err: &EngineError) -> Self {
        let kind = err.failure_kind();
        let message = match kind {
            FailureKind::Allocation => {
                "No free timeline slot was found here. Try placing it somewhere else.".to_string()
            }
            FailureKind::InternalConstraint => {
                "An internal constraint rejected this change. Please refresh and try again.".to_string()
            }
            FailureKind::Connectivity => "Network error. Please check your connection and try again.".to_string(),
            FailureKind::Overloaded => "The server is busy right now. Please try again shortly.".to_string(),
            FailureKind::Generic => err.to_string(),
        };
        Self {
            kind,
            title: format!("Failed to {}", action),
            message,
        }
    }
}

pub trait NotificationSink {
    fn notify(&self, notice: &Notice);
}

/// Writes notices to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notice: &Notice) {
        warn!("[notice] {}: {}", notice.title, notice.message);
    }
}

/// Keeps every notice, for callers that poll
#[derive(Debug, Default)]
pub struct RecordingSink {
    notices: RefCell<Vec<Notice>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.borrow().clone()
    }

    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.borrow_mut())
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: &Notice) {
        self.notices.borrow_mut().push(notice.clone());
    }
}
