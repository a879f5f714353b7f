//! civic-auth: authentication and enhanced-token lifecycle for the civic
//! engagement client.
//!
//! The [`auth::AuthSessionController`] owns all auth state; everything else
//! (gateway, exchange client, recovery, persistence) sits behind it.

pub mod adapters;
pub mod auth;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod recovery;
pub mod traits;
