//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database credentials.

pub use secrecy::{ExposeSecret, SecretString};
