//! Recovery outcomes and error history records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::strategy::TerminalAction;
use crate::error::{ErrorContext, ErrorKind};

/// Terminal state of one error instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A retry succeeded.
    Recovered,
    /// The user must sign in again.
    RequiresReauth,
    /// The user has to do something (fix input, upgrade, wait).
    RequiresManualAction,
}

/// Structured result of running recovery for one error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub kind: ErrorKind,
    pub resolution: Resolution,
    /// Short, non-technical text for the end user.
    pub user_message: String,
    /// Original error text, for logs only.
    pub technical_detail: String,
    /// Total attempts made, including the first.
    pub attempts: u32,
    pub operation: String,
    /// The caller should end the session and wipe persisted session data.
    pub clear_session: bool,
}

impl RecoveryOutcome {
    pub fn requires_reauth(&self) -> bool {
        self.resolution == Resolution::RequiresReauth
    }

}

/// One observed failure, kept in the manager's rolling history.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub strategy: &'static str,
    pub attempt: u32,
    /// Set on the record that ended the error: the last failed attempt, or
    /// the success after a retry. `None` on intermediate attempts.
    pub resolution: Option<Resolution>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        context: ErrorContext,
        terminal: TerminalAction,
        attempt: u32,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            context,
            strategy: terminal.as_str(),
            attempt,
            resolution: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }
}
