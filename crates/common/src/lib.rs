//! Shared types for the credential rotation workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
