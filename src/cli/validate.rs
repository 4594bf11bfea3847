//! Validate variant configuration files.
//!
//! Each file is parsed and checked on its own, the same way the combiner checks
//! a source: key names, `zip_keys` structure, zip group lengths and
//! `extend_keys` overlaps. Every problem of every file is reported before the
//! command fails.
//!
//! # Examples
//!
//! ```bash
//! varia validate conda_build_config.yaml
//! varia validate ci/*.yaml --platform win-64 --format json
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::{GlobalConfig, host_platform};
use crate::core::VariaError;
use crate::variants::{load_variant_file, validate_source};

#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Variant config files to check
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Platform used to evaluate line selectors
    #[arg(long, value_name = "SUBDIR")]
    pub platform: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only print problems
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationResults {
    pub valid: bool,
    pub files: Vec<FileResult>,
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    pub file: String,
    pub valid: bool,
    pub variables: usize,
    pub errors: Vec<String>,
}

/// Check one file; problems are returned one per entry.
fn validate_file(path: &PathBuf, platform: &str) -> FileResult {
    let file = path.display().to_string();
    let outcome = load_variant_file(path, platform).and_then(|source| validate_source(&source));
    match outcome {
        Ok(spec) => FileResult {
            file,
            valid: true,
            variables: spec.variables().len(),
            errors: Vec::new(),
        },
        Err(VariaError::VariantConfigError {
            problems,
        }) => FileResult {
            file,
            valid: false,
            variables: 0,
            errors: problems.iter().map(ToString::to_string).collect(),
        },
        Err(err) => FileResult {
            file,
            valid: false,
            variables: 0,
            errors: vec![err.to_string()],
        },
    }
}

impl ValidateCommand {
    pub async fn execute(self, global: &GlobalConfig) -> Result<()> {
        let platform = self
            .platform
            .clone()
            .or_else(|| global.target_platform.clone())
            .unwrap_or_else(|| host_platform().to_string());

        let files = self.files.clone();
        let platform_for_task = platform.clone();
        let results: Vec<FileResult> = tokio::task::spawn_blocking(move || {
            files.iter().map(|path| validate_file(path, &platform_for_task)).collect()
        })
        .await?;

        let validation = ValidationResults {
            valid: results.iter().all(|r| r.valid),
            files: results,
        };

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&validation)?),
            OutputFormat::Text => {
                for result in &validation.files {
                    if result.valid {
                        if !self.quiet {
                            println!("{} {} ({} variables)", "✓".green(), result.file, result.variables);
                        }
                    } else {
                        println!("{} {}", "✗".red(), result.file);
                        for error in &result.errors {
                            println!("    {error}");
                        }
                    }
                }
            }
        }

        if validation.valid {
            Ok(())
        } else {
            let invalid = validation.files.iter().filter(|r| !r.valid).count();
            Err(anyhow::anyhow!("{invalid} of {} variant config file(s) are invalid for {platform}", validation.files.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cbc.yaml");
        std::fs::write(&path, "python:\n  - '3.11'\n  - '3.12'\nzlib: ['1.3']\n").unwrap();

        let result = validate_file(&path, "linux-64");
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.variables, 2);
    }

    #[test]
    fn test_all_problems_are_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cbc.yaml");
        std::fs::write(
            &path,
            "bad-key: ['1']\nzip_keys:\n  - [python, numpy]\npython: ['3.11', '3.12']\nnumpy: ['1.26']\n",
        )
        .unwrap();

        let result = validate_file(&path, "linux-64");
        assert!(!result.valid);
        assert!(result.errors.len() >= 2, "{:?}", result.errors);
        assert!(result.errors.iter().any(|e| e.contains("bad-key")));
    }

    #[test]
    fn test_unreadable_file() {
        let temp = TempDir::new().unwrap();
        let result = validate_file(&temp.path().join("absent.yaml"), "linux-64");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
    }
}
