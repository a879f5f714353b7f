//! Authentication core.
//!
//! This module provides:
//! - The session controller that owns auth state ([`AuthSessionController`])
//! - The identity gateway wrapping the provider ([`IdentityGateway`])
//! - The enhanced-token exchange client ([`TokenExchangeClient`])
//! - Session persistence and redirect-callback handling

pub mod callback;
pub mod claims;
pub mod controller;
pub mod exchange;
pub mod gateway;
pub mod persistence;
pub mod pkce;
pub mod state;
pub mod types;

pub use callback::{CallbackAction, CallbackLiveness, CallbackParams};
pub use claims::{merge_claims, REQUIRED_CLAIMS};
pub use controller::{AuthServices, AuthSessionController, SignUpOutcome};
pub use exchange::TokenExchangeClient;
pub use gateway::{IdentityGateway, SessionEvent, SessionSubscription, SignOutReason, SignUpResult};
pub use persistence::{LoadResult, PersistedSession, SessionStore};
pub use pkce::PkcePair;
pub use state::{AuthState, AuthStatus, SurfacedError};
pub use types::{
    ClaimSet, EnhancedToken, ProfileSeed, ProfileUpdate, Session, SignInMethod, Tier, TokenType,
    TokenValidation, User, UserProfile,
};
