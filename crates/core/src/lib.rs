//! `warden-core`: shared building blocks for the access-control engine.
//!
//! This crate contains identifiers and the error taxonomy only (no IO).

pub mod error;
pub mod id;

pub use error::{AccessError, AccessResult, StoreError};
pub use id::{GLOBAL_ORG_ID, OrgId, TeamId, UserId};
