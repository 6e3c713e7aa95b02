//! Core domain types.

pub mod refresh_token;
pub mod token_pair;

pub use refresh_token::{RefreshTokenRecord, SessionClaims, TokenStatus, fingerprint};
pub use token_pair::{SessionInfo, SessionScope, TokenPair};
