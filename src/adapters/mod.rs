//! Concrete implementations of trait abstractions.
//!
//! This module provides the production adapters behind the traits defined in
//! `crate::traits`, so the auth core can be wired to real services or to the
//! test doubles in [`mock`].
//!
//! # Adapters
//!
//! - [`ReqwestHttpClient`] - HTTP client using reqwest
//! - [`HttpIdentityProvider`] - GoTrue-style identity provider REST API
//! - [`HttpProfileStore`] - PostgREST profile table
//! - [`FileKeyValueStore`] - file-per-key persisted storage
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles for all adapters:
//! - [`mock::MockHttpClient`] - Configurable HTTP responses
//! - [`mock::MockIdentityProvider`] - Stateful in-memory identity provider
//! - [`mock::InMemoryProfileStore`] - Profile rows in memory
//! - [`mock::InMemoryStore`] - In-memory key/value storage

pub mod file_storage;
pub mod http_identity;
pub mod http_profiles;
pub mod mock;
pub mod reqwest_http;

pub use file_storage::FileKeyValueStore;
pub use http_identity::HttpIdentityProvider;
pub use http_profiles::HttpProfileStore;
pub use mock::{InMemoryProfileStore, InMemoryStore, MockHttpClient, MockIdentityProvider};
pub use reqwest_http::ReqwestHttpClient;
