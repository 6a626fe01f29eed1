//! HTTP handlers for identity-service.

pub mod admin;
pub mod auth;

pub use auth::*;
