//! Launch engine: configuration, launch specification and orchestration.

pub mod config;
pub mod launch;
pub mod spec;

pub use config::{EngineConfig, ImageDescriptor, MountDev};
pub use launch::{Engine, enter_working_directory};
pub use spec::{LaunchSpec, LaunchStrategy};
