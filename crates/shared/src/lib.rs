//! Shared types for the AutoMed dashboard client and its tooling.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;
