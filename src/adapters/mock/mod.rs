//! Mock implementations for testing.
//!
//! Test doubles for every trait in [`crate::traits`], enabling controller
//! tests without network or file system access.
//!
//! # Available Mocks
//!
//! - [`MockHttpClient`] - HTTP client with configurable responses
//! - [`MockIdentityProvider`] - scripted identity provider
//! - [`InMemoryProfileStore`] - profile rows in memory
//! - [`InMemoryStore`] - key/value storage in memory

pub mod http;
pub mod identity;
pub mod profiles;
pub mod storage;

pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use identity::{IdentityOp, MockIdentityProvider};
pub use profiles::InMemoryProfileStore;
pub use storage::InMemoryStore;
