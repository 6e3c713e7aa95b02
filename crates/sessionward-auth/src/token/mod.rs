//! Token encoding and generation.
//!
//! This module provides:
//!
//! - Access token signing and verification (JWT)
//! - Two-key verification window for signing key rotation
//! - Opaque refresh token id generation

pub mod codec;
pub mod jwt;

pub use codec::{REFRESH_ID_LEN, TokenCodec, generate_refresh_id, is_well_formed_refresh_id};
pub use jwt::{AccessTokenClaims, JwtError, KeyFamily, KeyPem, SigningAlgorithm, SigningKeyPair};
