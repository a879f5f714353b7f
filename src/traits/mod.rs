//! Trait abstractions for dependency injection and testability.
//!
//! Every external collaborator of the auth core sits behind one of these
//! traits, so the controller can be driven against real services or the
//! doubles in [`crate::adapters::mock`].
//!
//! # Traits
//!
//! - [`HttpClient`] - request/response HTTP (GET, POST, PATCH)
//! - [`IdentityProvider`] - identity provider primitives
//! - [`ProfileStore`] - profile read/update by user id
//! - [`KeyValueStore`] - persisted client-side storage

pub mod http;
pub mod identity;
pub mod profiles;
pub mod storage;

pub use http::{Headers, HttpClient, HttpError, Response};
pub use identity::{IdentityProvider, ProviderError};
pub use profiles::{ProfileStore, ProfileStoreError};
pub use storage::{KeyValueStore, StorageError};
