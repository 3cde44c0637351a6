//! Shared domain types for the AI Hub admission layer.
//!
//! Everything here is transport-agnostic: the identity model
//! ([`Principal`]), the configuration tree ([`config::Config`]), the
//! shared [`Error`] enum and the abstract [`store::Store`] collaborator
//! that the limiter and the permission broker persist through.

pub mod config;
pub mod error;
pub mod principal;
pub mod store;

pub use error::{Error, Result};
pub use principal::Principal;
