//! # corral-common
//!
//! Shared types for the Corral launcher crates:
//! - The error taxonomy used from entry-point resolution to instance registration
//! - Standard state directories
//! - Validated container (instance) identifiers

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{CorralError, CorralResult};
pub use id::ContainerId;
pub use paths::CorralPaths;
