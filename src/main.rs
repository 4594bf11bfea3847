//! Varia CLI entry point
//!
//! Parses arguments, installs logging and runs the selected command:
//! - `render` - Render recipes into metadata, one per distinct variant
//! - `variants` - Show a recipe's combined specification and variants
//! - `validate` - Validate variant config files

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use varia_cli::cli;
use varia_cli::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.build_config();

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute_with_config(config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
