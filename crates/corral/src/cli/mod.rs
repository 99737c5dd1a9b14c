//! CLI command definitions and handlers.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use corral_common::CorralPaths;
use serde::Serialize;

use crate::engine::{Engine, EngineConfig, LaunchStrategy};
use crate::exec::adopt_control_channel;

/// Corral - in-container process launcher and init supervisor
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for corral state
    #[arg(long, global = true, env = "CORRAL_ROOT")]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Launcher commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the container process described by an engine configuration
    Launch {
        /// Engine configuration (JSON)
        #[arg(short, long, env = "CORRAL_CONFIG")]
        config: PathBuf,

        /// Control socket inherited from the parent launcher
        #[arg(long)]
        control_fd: Option<RawFd>,
    },

    /// Record a started instance
    Register {
        /// Engine configuration (JSON)
        #[arg(short, long, env = "CORRAL_CONFIG")]
        config: PathBuf,

        /// Pid of the container process
        #[arg(long)]
        pid: u32,

        /// Pid of the process that parents the container process
        /// [default: the caller of this command]
        #[arg(long)]
        ppid: Option<u32>,
    },

    /// Print the resolved entry point and launch strategy
    Resolve {
        /// Engine configuration (JSON)
        #[arg(short, long, env = "CORRAL_CONFIG")]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct ResolvedLaunch {
    args: Vec<String>,
    strategy: LaunchStrategy,
}

impl Cli {
    /// Default log directive for the chosen verbosity.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        if self.debug {
            "corral=debug"
        } else {
            "corral=info"
        }
    }

    fn paths(&self) -> CorralPaths {
        self.root
            .as_ref()
            .map_or_else(CorralPaths::default, CorralPaths::with_root)
    }

    /// Execute the CLI command, returning the process exit code.
    pub async fn execute(self) -> Result<i32> {
        let paths = self.paths();

        match self.command {
            Commands::Launch { config, control_fd } => {
                let engine = load_engine(&config, paths)?;
                let channel = control_fd
                    .map(adopt_control_channel)
                    .transpose()
                    .map_err(|e| eyre!("Failed to adopt control channel: {}", e))?;

                let code = engine
                    .start_process(channel)
                    .await
                    .map_err(|e| eyre!("Failed to start container process: {}", e))?;
                Ok(code)
            }

            Commands::Register { config, pid, ppid } => {
                let engine = load_engine(&config, paths)?;
                let ppid = ppid.unwrap_or_else(std::os::unix::process::parent_id);
                engine
                    .register_instance(pid, ppid)
                    .map_err(|e| eyre!("Failed to register instance: {}", e))?;
                Ok(0)
            }

            Commands::Resolve { config } => {
                let engine = load_engine(&config, paths)?;
                let launch = engine
                    .resolve_launch()
                    .map_err(|e| eyre!("Failed to resolve entry point: {}", e))?;

                let strategy = launch.strategy();
                let resolved = ResolvedLaunch {
                    args: launch.args,
                    strategy,
                };
                println!("{}", serde_json::to_string_pretty(&resolved)?);
                Ok(0)
            }
        }
    }
}

fn load_engine(config: &Path, paths: CorralPaths) -> Result<Engine> {
    let config = EngineConfig::load(config)
        .map_err(|e| eyre!("Failed to load engine configuration: {}", e))?;
    Ok(Engine::new(config).with_paths(paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_launch_with_control_fd() {
        let cli = Cli::parse_from([
            "corral",
            "--debug",
            "launch",
            "--config",
            "/tmp/engine.json",
            "--control-fd",
            "5",
        ]);

        assert_eq!(cli.log_directive(), "corral=debug");
        match cli.command {
            Commands::Launch { config, control_fd } => {
                assert_eq!(config, PathBuf::from("/tmp/engine.json"));
                assert_eq!(control_fd, Some(5));
            }
            _ => panic!("expected launch"),
        }
    }

    #[test]
    fn root_selects_the_state_tree() {
        let cli = Cli::parse_from([
            "corral",
            "register",
            "--root",
            "/tmp/corral-test",
            "--config",
            "c.json",
            "--pid",
            "9",
        ]);

        assert_eq!(
            cli.paths().runtime,
            PathBuf::from("/tmp/corral-test/run")
        );
    }

    #[test]
    fn register_takes_an_explicit_parent() {
        let cli = Cli::parse_from([
            "corral", "register", "--config", "c.json", "--pid", "9", "--ppid", "4",
        ]);

        match cli.command {
            Commands::Register { pid, ppid, .. } => {
                assert_eq!(pid, 9);
                assert_eq!(ppid, Some(4));
            }
            _ => panic!("expected register"),
        }
    }
}
