//! Recipe input: locate and read a recipe and its build scripts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::core::VariaError;
use crate::templating::RecipeInfo;

/// File names tried, in order, when a recipe directory is given.
pub const RECIPE_FILES: &[&str] = &["meta.yaml", "conda.yaml"];

/// Variant configuration file looked up next to a recipe.
pub const RECIPE_CONFIG_FILE: &str = "conda_build_config.yaml";

const SCRIPT_EXTENSIONS: &[&str] = &["sh", "bat"];

/// A recipe template with the scripts that sit next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSource {
    pub info: RecipeInfo,
    /// Directory containing the recipe file, when read from disk
    pub directory: Option<PathBuf>,
    pub template: String,
    /// Shell and batch scripts by file name
    pub scripts: BTreeMap<String, String>,
}

impl RecipeSource {
    pub fn from_text(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            info: RecipeInfo::new(name),
            directory: None,
            template: template.into(),
            scripts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_script(mut self, file_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.scripts.insert(file_name.into(), text.into());
        self
    }

    /// Read a recipe from a directory or a recipe file.
    ///
    /// # Errors
    ///
    /// [`VariaError::RecipeNotFound`] when no recipe file exists, and IO errors
    /// from reading it.
    pub fn load(path: &Path) -> Result<Self, VariaError> {
        let file = locate_recipe(path)?;
        let directory = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let template = std::fs::read_to_string(&file)?;

        let name = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.clone())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recipe".to_string());

        let mut scripts = BTreeMap::new();
        for entry in WalkDir::new(&directory).max_depth(1).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            let is_script = path.extension().and_then(|e| e.to_str()).is_some_and(|e| SCRIPT_EXTENSIONS.contains(&e));
            if !entry.file_type().is_file() || !is_script {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(path) {
                scripts.insert(entry.file_name().to_string_lossy().into_owned(), text);
            }
        }
        debug!("Loaded recipe {} from {} with {} script(s)", name, file.display(), scripts.len());

        Ok(Self {
            info: RecipeInfo::new(name).with_path(file.clone()),
            directory: Some(directory),
            template,
            scripts,
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// `conda_build_config.yaml` next to the recipe, if present.
    pub fn config_file(&self) -> Option<PathBuf> {
        let file = self.directory.as_ref()?.join(RECIPE_CONFIG_FILE);
        file.is_file().then_some(file)
    }

    /// The default build script for a platform (`bld.bat` on Windows, else `build.sh`).
    pub fn build_script(&self, target_platform: &str) -> Option<&str> {
        let file = if target_platform.starts_with("win") { "bld.bat" } else { "build.sh" };
        self.scripts.get(file).map(String::as_str)
    }
}

/// The recipe file for a path: the path itself, or the first recipe file in it.
pub fn locate_recipe(path: &Path) -> Result<PathBuf, VariaError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        if let Some(file) = RECIPE_FILES.iter().map(|name| path.join(name)).find(|file| file.is_file()) {
            return Ok(file);
        }
    }
    Err(VariaError::RecipeNotFound {
        path: path.display().to_string(),
    })
}
