//! Error recovery: per-kind policy, retry orchestration and outcomes.

mod manager;
mod outcome;
mod strategy;

pub use manager::{purge_namespace, RecoveryManager, DEFAULT_HISTORY_LIMIT};
pub use outcome::{ErrorRecord, RecoveryOutcome, Resolution};
pub use strategy::{Backoff, RecoveryStrategy, TerminalAction, MAX_BACKOFF};
