//! Common test utilities for Varia integration tests

// Not every helper is used by every test file
#![allow(dead_code)]

use anyhow::{Context, Result};
use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use varia_cli::config::RenderConfig;
use varia_cli::render::{RecipeSource, RenderReport, render_recipe};
use varia_cli::test_utils::RecipeFixture;

/// A scratch directory with an isolated home, holding recipes and config files.
pub struct TestProject {
    _temp_dir: TempDir,
    project_dir: PathBuf,
    home_dir: PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let project_dir = temp_dir.path().join("project");
        let home_dir = temp_dir.path().join("home");

        fs::create_dir_all(&project_dir)?;
        fs::create_dir_all(&home_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            project_dir,
            home_dir,
        })
    }

    pub fn project_path(&self) -> &Path {
        &self.project_dir
    }

    pub fn home_path(&self) -> &Path {
        &self.home_dir
    }

    /// Write a recipe directory under the project and return its path.
    pub fn write_recipe(&self, fixture: &RecipeFixture) -> Result<PathBuf> {
        fixture.write_to(&self.project_dir)
    }

    /// Write a file relative to the project directory.
    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf> {
        let file = self.project_dir.join(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, content).with_context(|| format!("Failed to write {}", file.display()))?;
        Ok(file)
    }

    /// A render config that reads only the recipe's own config and the given files.
    pub fn render_config(&self, platform: &str) -> RenderConfig {
        RenderConfig {
            target_platform: platform.to_string(),
            ignore_system_variants: true,
            ..RenderConfig::default()
        }
    }

    /// Render a recipe directory through the library.
    pub fn render(&self, recipe_dir: &Path, config: &RenderConfig) -> Result<RenderReport> {
        let recipe = RecipeSource::load(recipe_dir)?;
        let ctx = config.render_context(recipe)?;
        Ok(render_recipe(&ctx)?)
    }

    /// Run the `varia` binary in the project directory with an isolated home.
    pub fn run_varia(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::cargo_bin("varia")
            .context("Failed to locate varia binary")?
            .args(args)
            .current_dir(&self.project_dir)
            .env("HOME", &self.home_dir)
            .env("USERPROFILE", &self.home_dir)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .output()
            .context("Failed to run varia command")?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Command output helper
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        assert!(self.success, "Command failed with code {:?}\nStderr: {}", self.code, self.stderr);
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(!self.success, "Command unexpectedly succeeded\nStdout: {}", self.stdout);
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(self.stdout.contains(text), "Expected stdout to contain '{text}'\nActual stdout: {}", self.stdout);
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(self.stderr.contains(text), "Expected stderr to contain '{text}'\nActual stderr: {}", self.stderr);
        self
    }

    /// Stdout parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.stdout)
            .unwrap_or_else(|e| panic!("stdout is not JSON ({e}):\n{}", self.stdout))
    }
}
