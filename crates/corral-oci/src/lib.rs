//! # corral-oci
//!
//! The part of the OCI Runtime Specification (config.json) that the launcher
//! consumes: the container process, its capabilities, and the Linux
//! namespace set that decides whether a surrogate init is needed.

#![warn(missing_docs)]

pub mod runtime;

pub use runtime::{NamespaceType, Spec};
