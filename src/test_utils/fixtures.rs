//! Recipe fixtures for tests.
//!
//! A [`RecipeFixture`] is a recipe directory described in memory: the recipe
//! template, an optional `conda_build_config.yaml` and any build scripts.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::render::{RECIPE_CONFIG_FILE, RecipeSource};

#[derive(Clone, Debug)]
pub struct RecipeFixture {
    pub name: String,
    pub meta: String,
    pub config: Option<String>,
    pub scripts: BTreeMap<String, String>,
}

impl RecipeFixture {
    pub fn new(name: impl Into<String>, meta: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: meta.into(),
            config: None,
            scripts: BTreeMap::new(),
        }
    }

    /// A recipe using `python` only, with `python` and `numpy` in its config.
    pub fn python_only() -> Self {
        Self::new(
            "pyonly",
            r"
package:
  name: pyonly
  version: 1.0
requirements:
  host:
    - python
  run:
    - python
"
            .trim_start(),
        )
        .with_config("python:\n  - '3.10'\n  - '3.11'\nnumpy:\n  - '1.26'\n  - '2.0'\n")
    }

    /// A parent recipe with one output using `zlib` and one using nothing.
    pub fn multi_output() -> Self {
        Self::new(
            "multi",
            r"
package:
  name: multi
  version: 2.0
outputs:
  - name: libmulti
    requirements:
      host:
        - zlib
  - name: multi-tools
    requirements:
      run:
        - libmulti
"
            .trim_start(),
        )
        .with_config("zlib:\n  - '1.2'\n  - '1.3'\n")
    }

    #[must_use]
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    #[must_use]
    pub fn with_script(mut self, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.scripts.insert(file_name.into(), text.into());
        self
    }

    /// Write the recipe into `parent/<name>` and return that directory.
    pub fn write_to(&self, parent: &Path) -> Result<PathBuf> {
        let dir = parent.join(&self.name);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::write(dir.join("meta.yaml"), &self.meta).context("Failed to write meta.yaml")?;
        if let Some(config) = &self.config {
            fs::write(dir.join(RECIPE_CONFIG_FILE), config).context("Failed to write recipe config")?;
        }
        for (file, text) in &self.scripts {
            fs::write(dir.join(file), text).with_context(|| format!("Failed to write {file}"))?;
        }
        Ok(dir)
    }

    /// Write the recipe into a fresh temporary directory.
    ///
    /// The directory lives as long as the returned [`TempDir`].
    pub fn create(&self) -> Result<(TempDir, PathBuf)> {
        let temp = TempDir::new().context("Failed to create temp dir")?;
        let dir = self.write_to(temp.path())?;
        Ok((temp, dir))
    }

    /// The recipe as an in-memory source, without touching the filesystem.
    pub fn source(&self) -> RecipeSource {
        self.scripts
            .iter()
            .fold(RecipeSource::from_text(&self.name, &self.meta), |source, (file, text)| {
                source.with_script(file, text)
            })
    }
}
