//! # Corral
//!
//! Corral starts the process of a container from inside the container. It
//! resolves the entry point (falling back when the image lacks its action
//! scripts), prepares the process environment, and then either replaces
//! itself with the container process or forks it and stays behind as a
//! minimal init that reaps orphans and forwards signals. Instances are
//! recorded so they can be found again later.
//!
//! ## Usage
//!
//! ```no_run
//! use corral::engine::{Engine, EngineConfig};
//!
//! # async fn example() -> corral_common::CorralResult<()> {
//! let config = EngineConfig::load(std::path::Path::new("/run/corral/engine.json"))?;
//! let engine = Engine::new(config);
//!
//! let exit_code = engine.start_process(None).await?;
//! std::process::exit(exit_code);
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod engine;
pub mod exec;
pub mod instance;
pub mod security;
pub mod supervisor;
pub mod user;

pub use engine::{Engine, EngineConfig, LaunchSpec, LaunchStrategy};
