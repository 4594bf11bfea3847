//! Flags and helpers shared by the commands.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::{GlobalConfig, RenderConfig};

/// Variant configuration flags accepted by `render` and `variants`.
#[derive(Args, Debug, Clone, Default)]
pub struct VariantArgs {
    /// Extra variant config file, read after the discovered ones (repeatable)
    #[arg(short = 'm', long = "variant-config-files", value_name = "FILE")]
    pub variant_config_files: Vec<PathBuf>,

    /// Exclusive variant config file; disables user, working-directory and
    /// recipe config discovery (repeatable)
    #[arg(short = 'e', long = "exclusive-config-files", value_name = "FILE")]
    pub exclusive_config_files: Vec<PathBuf>,

    /// Override a variable: `NAME=VALUE[,VALUE...]` (repeatable)
    #[arg(long = "variant", value_name = "KEY=VALUE")]
    pub variant: Vec<String>,

    /// Overrides as a YAML mapping, e.g. `{python: ['3.11', '3.12']}`
    #[arg(long, value_name = "YAML")]
    pub variants: Option<String>,

    /// Target platform subdir, e.g. `linux-64` or `win-64`
    #[arg(long, value_name = "SUBDIR")]
    pub platform: Option<String>,

    /// Skip `~/conda_build_config.yaml` and `./conda_build_config.yaml`
    #[arg(long)]
    pub ignore_system_variants: bool,
}

impl VariantArgs {
    /// The render configuration these flags select, on top of the global config.
    pub fn render_config(&self, global: &GlobalConfig) -> Result<RenderConfig> {
        let mut config = RenderConfig::from_global(global)?;
        if let Some(platform) = &self.platform {
            config.target_platform.clone_from(platform);
        }
        config.variant_config_files.clone_from(&self.variant_config_files);
        config.exclusive_config_files.clone_from(&self.exclusive_config_files);
        config.variant_overrides.clone_from(&self.variant);
        config.variants_yaml.clone_from(&self.variants);
        config.ignore_system_variants = self.ignore_system_variants;
        Ok(config)
    }
}

/// Write command output to a file, or to stdout when no file is given.
pub async fn write_output(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("Failed to write output to {}", path.display()))?;
            eprintln!("{} Wrote {}", "✓".green(), path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// Print best-effort warnings on stderr.
pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{} {warning}", "⚠".yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_global_config() {
        let global = GlobalConfig {
            target_platform: Some("osx-64".to_string()),
            ..GlobalConfig::default()
        };
        let args = VariantArgs {
            platform: Some("win-64".to_string()),
            variant: vec!["python=3.12".to_string()],
            ignore_system_variants: true,
            ..VariantArgs::default()
        };
        let config = args.render_config(&global).unwrap();
        assert_eq!(config.target_platform, "win-64");
        assert_eq!(config.variant_overrides, vec!["python=3.12"]);
        assert!(config.ignore_system_variants);

        let config = VariantArgs::default().render_config(&global).unwrap();
        assert_eq!(config.target_platform, "osx-64");
    }

    #[tokio::test]
    async fn test_write_output_to_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.yaml");
        write_output(Some(&path), "a: 1\n").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "a: 1\n");
    }
}
