//! Command line for the `ringpool` echo server.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{ResumeStrategy, ServerConfig};

/// Echo server backed by a two-stage job pool.
#[derive(Debug, Parser)]
#[command(name = "ringpool", version, about)]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Number of dispatch/ingest worker pairs.
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// How paused workers wait before the pool starts.
    #[arg(long, value_enum)]
    pub resume: Option<ResumeArg>,

    /// Enable debug logging.
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResumeArg {
    /// Busy-loop until released.
    Spin,
    /// Sleep until released.
    Park,
}

impl From<ResumeArg> for ResumeStrategy {
    fn from(arg: ResumeArg) -> Self {
        match arg {
            ResumeArg::Spin => ResumeStrategy::Spin,
            ResumeArg::Park => ResumeStrategy::Park,
        }
    }
}

impl Cli {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.pool.worker_pairs = Some(workers);
        }
        if let Some(resume) = self.resume {
            config.pool.resume = resume.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["ringpool"]);
        assert!(!cli.verbose);
        assert!(cli.config.is_none());

        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::parse_from(["ringpool", "-p", "7000", "-w", "3", "-c", "pool.toml", "-v"]);
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.workers, Some(3));
        assert_eq!(cli.config, Some(PathBuf::from("pool.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["ringpool", "--port", "0", "--workers", "2", "--resume", "park"]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.port, 0);
        assert_eq!(config.pool.worker_pairs, Some(2));
        assert_eq!(config.pool.resume, ResumeStrategy::Park);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Cli::try_parse_from(["ringpool", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }
}
