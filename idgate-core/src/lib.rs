//! # idgate-core
//!
//! Core types, token claims, and error handling for the idgate client.
//!
//! - **Errors**: [`ApiError`], the taxonomy every idgate call reports through
//! - **JWT**: signature-less decoding of access token claims
//! - **Models**: credentials, token pairs, user profiles, paging
//! - **Identifiers**: request ids and timestamps
//!
//! ## Example
//!
//! ```rust
//! use idgate_core::{jwt, PageQuery};
//!
//! let token = jwt::encode_unsigned(&serde_json::json!({ "exp": 4_000_000_000i64 }));
//! assert!(jwt::is_valid_at(&token, chrono::Utc::now()));
//!
//! let query = PageQuery::new().page(2).filter("status", "duplicate");
//! assert_eq!(query.to_pairs()[0], ("page".to_string(), "2".to_string()));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod errors;
pub mod identifier;
pub mod jwt;
pub mod models;

pub use errors::{ApiError, Result};
pub use jwt::Claims;
pub use models::{
    Credentials, HttpMethod, Page, PageQuery, RefreshRequest, TokenKind, TokenPair,
    TokenResponse, UserProfile, UserRole,
};
