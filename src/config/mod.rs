//! Configuration for rendering.
//!
//! Two layers:
//!
//! - [`GlobalConfig`]: user-wide defaults in `~/.varia/config.toml`
//! - [`RenderConfig`]: the settings of one invocation, which discovers the
//!   variant config files for a recipe and builds its [`RenderContext`]
//!
//! # Variant config discovery
//!
//! Sources are combined lowest precedence first:
//!
//! 1. built-in defaults
//! 2. exclusive config files; when any are given, steps 3 and 4 are skipped
//! 3. the user file (`variant_config_file`, else `~/conda_build_config.yaml`),
//!    then `./conda_build_config.yaml`, unless system variants are ignored
//! 4. `conda_build_config.yaml` next to the recipe
//! 5. extra variant config files
//! 6. command-line overrides

mod global;

pub use global::GlobalConfig;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::VariaError;
use crate::render::{RECIPE_CONFIG_FILE, RecipeSource, RenderContext, RenderOptions};
use crate::variants::{
    CLI_ORIGIN, SourceValue, SpecSource, VariantSpec, combine_specs, default_source, load_variant_file,
    parse_overrides, parse_variant_config,
};

/// Origin label for a YAML mapping passed with `--variants`.
pub const VARIANTS_ARG_ORIGIN: &str = "--variants";

/// Settings of one render invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Subdir rendered for, e.g. `linux-64`
    pub target_platform: String,
    /// When non-empty, replaces the user, working-directory and recipe config files
    pub exclusive_config_files: Vec<PathBuf>,
    /// Read after the discovered files
    pub variant_config_files: Vec<PathBuf>,
    /// Skip the user and working-directory config files
    pub ignore_system_variants: bool,
    /// `name=v1,v2` overrides
    pub variant_overrides: Vec<String>,
    /// A YAML mapping of overrides
    pub variants_yaml: Option<String>,
    /// User-level variant file; `None` means `~/conda_build_config.yaml`
    pub user_variant_file: Option<PathBuf>,
    pub best_effort: bool,
    pub parallel: bool,
    pub hash_length: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let options = RenderOptions::default();
        Self {
            target_platform: host_platform().to_string(),
            exclusive_config_files: Vec::new(),
            variant_config_files: Vec::new(),
            ignore_system_variants: false,
            variant_overrides: Vec::new(),
            variants_yaml: None,
            user_variant_file: None,
            best_effort: options.best_effort,
            parallel: options.parallel,
            hash_length: options.hash_length,
        }
    }
}

impl RenderConfig {
    /// Defaults taken from the global config.
    ///
    /// # Errors
    ///
    /// Returns an error when `variant_config_file` cannot be expanded.
    pub fn from_global(global: &GlobalConfig) -> anyhow::Result<Self> {
        Ok(Self {
            target_platform: global.target_platform.clone().unwrap_or_else(|| host_platform().to_string()),
            user_variant_file: global.expanded_variant_config_file()?,
            parallel: global.parallel,
            hash_length: global.hash_length,
            ..Self::default()
        })
    }

    /// The variant config files read for a recipe, lowest precedence first.
    ///
    /// Discovered files that do not exist are left out; explicitly named ones
    /// are kept so reading them reports the problem.
    pub fn config_files(&self, recipe: &RecipeSource) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if self.exclusive_config_files.is_empty() {
            if !self.ignore_system_variants {
                let user_file = self
                    .user_variant_file
                    .clone()
                    .or_else(|| dirs::home_dir().map(|home| home.join(RECIPE_CONFIG_FILE)));
                files.extend(user_file.filter(|file| file.is_file()));

                let cwd_file = PathBuf::from(RECIPE_CONFIG_FILE);
                if cwd_file.is_file() && !files.iter().any(|f| same_file(f, &cwd_file)) {
                    files.push(cwd_file);
                }
            }
            if let Some(recipe_file) = recipe.config_file() {
                if !files.iter().any(|f| same_file(f, &recipe_file)) {
                    files.push(recipe_file);
                }
            }
        } else {
            files.extend(self.exclusive_config_files.iter().cloned());
        }
        files.extend(self.variant_config_files.iter().cloned());
        files
    }

    /// Every specification source for a recipe, defaults first.
    ///
    /// # Errors
    ///
    /// Returns an error when a config file cannot be read or parsed, or an
    /// override is malformed.
    pub fn sources(&self, recipe: &RecipeSource) -> Result<Vec<SpecSource>, VariaError> {
        let mut sources = Vec::new();
        for file in self.config_files(recipe) {
            debug!("Reading variant config {}", file.display());
            sources.push(load_variant_file(&file, &self.target_platform)?);
        }
        if let Some(yaml) = &self.variants_yaml {
            sources.push(parse_variant_config(yaml, VARIANTS_ARG_ORIGIN, &self.target_platform)?);
        }
        if !self.variant_overrides.is_empty() {
            let overrides = parse_overrides(&self.variant_overrides)?;
            debug!("{} override(s) from the {CLI_ORIGIN}", overrides.entries.len());
            sources.push(overrides);
        }

        let python_hint = python_hint(&sources);
        sources.insert(0, default_source(&self.target_platform, python_hint.as_deref()));
        Ok(sources)
    }

    /// The combined specification for a recipe.
    ///
    /// # Errors
    ///
    /// Returns every collected configuration problem as one
    /// [`VariaError::VariantConfigError`], or the first loading error.
    pub fn combined_spec(&self, recipe: &RecipeSource) -> Result<VariantSpec, VariaError> {
        combine_specs(&self.sources(recipe)?)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            best_effort: self.best_effort,
            parallel: self.parallel,
            hash_length: self.hash_length,
        }
    }

    /// A fresh render context for a recipe.
    ///
    /// # Errors
    ///
    /// See [`RenderConfig::combined_spec`].
    pub fn render_context(&self, recipe: RecipeSource) -> Result<RenderContext, VariaError> {
        let spec = self.combined_spec(&recipe)?;
        Ok(RenderContext::new(recipe, spec, self.target_platform.clone()).with_options(self.render_options()))
    }
}

/// The first `python` value of the highest-precedence source that sets one.
fn python_hint(sources: &[SpecSource]) -> Option<String> {
    sources.iter().rev().find_map(|source| match source.get("python") {
        Some(SourceValue::Candidates(values)) => values.first().and_then(|c| c.value.as_str()).map(str::to_string),
        _ => None,
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// The conda subdir of the machine running the render.
pub fn host_platform() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "aarch64") => "linux-aarch64",
        ("linux", "powerpc64") => "linux-ppc64le",
        ("linux", "s390x") => "linux-s390x",
        ("linux", "x86") => "linux-32",
        ("linux", _) => "linux-64",
        ("macos", "aarch64") => "osx-arm64",
        ("macos", _) => "osx-64",
        ("windows", "aarch64") => "win-arm64",
        ("windows", "x86") => "win-32",
        ("windows", _) => "win-64",
        _ => "linux-64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn recipe_in(dir: &Path, config: Option<&str>) -> RecipeSource {
        std::fs::write(dir.join("meta.yaml"), "package:\n  name: demo\n  version: 1.0\n").unwrap();
        if let Some(config) = config {
            std::fs::write(dir.join(RECIPE_CONFIG_FILE), config).unwrap();
        }
        RecipeSource::load(dir).unwrap()
    }

    fn isolated() -> RenderConfig {
        RenderConfig {
            target_platform: "linux-64".to_string(),
            ignore_system_variants: true,
            ..RenderConfig::default()
        }
    }

    #[test]
    fn test_recipe_config_is_discovered() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe_in(temp.path(), Some("zlib:\n  - '1.2'\n  - '1.3'\n"));
        let config = isolated();

        assert_eq!(config.config_files(&recipe), vec![temp.path().join(RECIPE_CONFIG_FILE)]);
        let spec = config.combined_spec(&recipe).unwrap();
        assert_eq!(spec.get("zlib").map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_exclusive_files_replace_discovery() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe_in(temp.path(), Some("zlib: ['1.2']\n"));
        let exclusive = temp.path().join("only.yaml");
        std::fs::write(&exclusive, "openssl: ['3']\n").unwrap();

        let config = RenderConfig {
            exclusive_config_files: vec![exclusive.clone()],
            ..isolated()
        };
        assert_eq!(config.config_files(&recipe), vec![exclusive]);
        let spec = config.combined_spec(&recipe).unwrap();
        assert!(spec.contains("openssl"));
        assert!(!spec.contains("zlib"));
    }

    #[test]
    fn test_later_sources_override_earlier() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe_in(temp.path(), Some("zlib: ['1.2']\npython: ['3.8']\n"));
        let extra = temp.path().join("extra.yaml");
        std::fs::write(&extra, "zlib: ['1.3']\n").unwrap();

        let config = RenderConfig {
            variant_config_files: vec![extra],
            variant_overrides: vec!["python=3.11,3.12".to_string()],
            ..isolated()
        };
        let spec = config.combined_spec(&recipe).unwrap();
        let values = |name: &str| {
            spec.get(name).unwrap().values.iter().map(|c| c.value.to_string()).collect::<Vec<_>>()
        };
        assert_eq!(values("zlib"), vec!["1.3"]);
        assert_eq!(values("python"), vec!["3.11", "3.12"]);
    }

    #[test]
    fn test_variants_yaml_argument() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe_in(temp.path(), None);
        let config = RenderConfig {
            variants_yaml: Some("{cuda_compiler_version: ['11.8', '12.0']}".to_string()),
            ..isolated()
        };
        let spec = config.combined_spec(&recipe).unwrap();
        assert_eq!(spec.get("cuda_compiler_version").map(|v| v.origin.as_str()), Some(VARIANTS_ARG_ORIGIN));
    }

    #[test]
    fn test_missing_extra_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe_in(temp.path(), None);
        let config = RenderConfig {
            variant_config_files: vec![temp.path().join("absent.yaml")],
            ..isolated()
        };
        assert!(matches!(config.combined_spec(&recipe), Err(VariaError::ConfigError { .. })));
    }

    #[test]
    fn test_python_hint_from_highest_source() {
        let sources = vec![
            SpecSource::new("a").with("python", ["2.7"]),
            SpecSource::new("b").with("zlib", ["1.2"]),
            SpecSource::new("c").with("python", ["3.12", "3.11"]),
        ];
        assert_eq!(python_hint(&sources).as_deref(), Some("3.12"));
        assert_eq!(python_hint(&[]), None);
    }

    #[test]
    #[serial]
    fn test_working_directory_config() {
        let temp = TempDir::new().unwrap();
        let recipe_dir = temp.path().join("recipe");
        std::fs::create_dir(&recipe_dir).unwrap();
        let recipe = recipe_in(&recipe_dir, None);
        std::fs::write(temp.path().join(RECIPE_CONFIG_FILE), "zlib: ['1.2']\n").unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp.path()).unwrap();
        let config = RenderConfig {
            user_variant_file: Some(temp.path().join("no-user-file.yaml")),
            ..RenderConfig::default()
        };
        let discovered = config.config_files(&recipe);
        let ignored = RenderConfig {
            ignore_system_variants: true,
            ..config.clone()
        }
        .config_files(&recipe);
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(discovered, vec![PathBuf::from(RECIPE_CONFIG_FILE)]);
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_from_global() {
        let global = GlobalConfig {
            target_platform: Some("osx-arm64".to_string()),
            hash_length: 12,
            parallel: false,
            ..GlobalConfig::default()
        };
        let config = RenderConfig::from_global(&global).unwrap();
        assert_eq!(config.target_platform, "osx-arm64");
        assert_eq!(config.render_options().hash_length, 12);
        assert!(!config.render_options().parallel);
    }
}
