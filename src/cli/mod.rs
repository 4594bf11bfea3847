//! Command-line interface for Varia.
//!
//! # Commands
//!
//! - `render` - Render recipes under every variant they use
//! - `variants` - Show a recipe's combined specification, used variables and variants
//! - `validate` - Check variant config files
//!
//! # Global Options
//!
//! - `--verbose` / `-v` - Debug logging
//! - `--quiet` / `-q` - Errors only
//! - `--config` / `-c` - Global config file instead of `~/.varia/config.toml`
//!
//! # Examples
//!
//! ```bash
//! varia render ./recipes/numpy --variant python=3.11,3.12
//! varia variants ./recipes/numpy --platform osx-arm64
//! varia validate conda_build_config.yaml
//! ```

mod common;
mod render;
mod validate;
mod variants;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::config::GlobalConfig;

pub use common::VariantArgs;
pub use render::{MetadataSummary, OutputFormat};

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive (`debug`, `warn`, `error`)
    pub log_level: String,

    /// Global config file override
    pub config_path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(
    name = "varia",
    about = "Variant resolution and recipe rendering for conda-style build recipes",
    version,
    long_about = "Varia combines layered variant configuration, works out which variables a recipe \
                  actually uses, and renders one metadata document per distinct variant."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the global config file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render recipes into metadata, one per distinct variant
    Render(render::RenderCommand),

    /// Show the combined specification and the variants a recipe renders
    Variants(variants::VariantsCommand),

    /// Validate variant config files
    Validate(validate::ValidateCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        };

        CliConfig {
            log_level: log_level.to_string(),
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        let global = GlobalConfig::load_with_optional(config.config_path.clone()).await?;
        debug!("Global config: {global:?}");

        match self.command {
            Commands::Render(cmd) => cmd.execute(&global).await,
            Commands::Variants(cmd) => cmd.execute(&global).await,
            Commands::Validate(cmd) => cmd.execute(&global).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_flags() {
        let cli = Cli::parse_from(["varia", "-v", "validate", "a.yaml"]);
        assert_eq!(cli.build_config().log_level, "debug");

        let cli = Cli::parse_from(["varia", "validate", "a.yaml", "--quiet"]);
        assert_eq!(cli.build_config().log_level, "error");

        let cli = Cli::parse_from(["varia", "validate", "a.yaml"]);
        assert_eq!(cli.build_config().log_level, "warn");
    }

    #[test]
    fn test_render_arguments() {
        let cli = Cli::parse_from([
            "varia",
            "render",
            "recipes/a",
            "recipes/b",
            "-m",
            "extra.yaml",
            "--variant",
            "python=3.11,3.12",
            "--platform",
            "win-64",
            "--format",
            "json",
            "--serial",
        ]);
        let Commands::Render(cmd) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(cmd.recipes.len(), 2);
        assert_eq!(cmd.variants.variant_config_files, vec![PathBuf::from("extra.yaml")]);
        assert_eq!(cmd.variants.platform.as_deref(), Some("win-64"));
        assert_eq!(cmd.format, OutputFormat::Json);
        assert!(cmd.serial);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["varia", "-v", "-q", "validate", "a.yaml"]).is_err());
    }
}
