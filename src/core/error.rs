//! Error handling for varia
//!
//! This module provides the error types and user-facing error reporting used by the
//! variant resolution and rendering engine. The error system follows two rules:
//! 1. **Strongly-typed errors** so callers can match on the precise failure
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`VariaError`] - Enumerated error types for every failure the engine can report
//! - [`ConfigProblem`] - One problem found while combining variant specifications
//! - [`ErrorContext`] - Wrapper that adds user-friendly details and suggestions
//!
//! # Error Categories
//!
//! - **Configuration**: [`VariaError::VariantConfigError`], [`VariaError::ConfigError`]
//! - **Templates**: [`VariaError::Template`], [`VariaError::SelectorError`]
//! - **Usage resolution**: [`VariaError::UnknownHelper`], [`VariaError::HelperArgument`]
//! - **Rendering outcome**: [`VariaError::Unsatisfiable`], [`VariaError::UnresolvedVariable`],
//!   [`VariaError::IdentityConflict`], [`VariaError::Aborted`]
//! - **Recipe input**: [`VariaError::RecipeNotFound`], [`VariaError::RecipeParseError`]
//!
//! Use [`user_friendly_error`] to turn any [`anyhow::Error`] into an [`ErrorContext`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use varia_cli::core::{ErrorContext, VariaError};
//!
//! let error = VariaError::RecipeNotFound {
//!     path: "recipes/zlib".to_string(),
//! };
//! let context = ErrorContext::new(error)
//!     .with_suggestion("Pass the directory that contains meta.yaml")
//!     .with_details("varia looks for meta.yaml or conda.yaml in the recipe directory");
//!
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::templating::TemplateError;

/// A single problem detected while combining variant specification sources.
///
/// The combiner collects every problem it finds before failing so that a user can fix
/// a broken `conda_build_config.yaml` in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    /// A variable name contains a `-`, which cannot be used as a template identifier.
    InvalidKeyName {
        /// Where the key was declared
        origin: String,
        /// The offending key
        key: String,
    },
    /// `zip_keys` is neither a list of strings nor a list of lists of strings.
    MalformedZipKeys {
        /// Where the zip keys were declared
        origin: String,
        /// Why the value was rejected
        reason: String,
    },
    /// A key appears in more than one zip group.
    KeyInMultipleZipGroups {
        /// The key listed twice
        key: String,
    },
    /// A key is both zipped and extended.
    ZipAndExtend {
        /// The conflicting key
        key: String,
    },
    /// Members of one zip group have candidate sequences of different lengths.
    ZipLengthMismatch {
        /// Where the mismatch was introduced
        origin: String,
        /// The group members and the length of each
        lengths: Vec<(String, usize)>,
    },
    /// A zip key is not defined by any source.
    UndefinedZipKey {
        /// The group containing the key
        group: Vec<String>,
        /// The missing key
        key: String,
    },
    /// A subspace filter names a value that the filtered sequence does not contain.
    MissingSubspaceValue {
        /// Where the filter was declared
        origin: String,
        /// The filtered key
        key: String,
        /// The value that could not be found
        value: String,
    },
    /// A value could not be interpreted.
    InvalidValue {
        /// Where the value was declared
        origin: String,
        /// The key holding the value
        key: String,
        /// Why the value was rejected
        reason: String,
    },
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyName {
                origin,
                key,
            } => write!(
                f,
                "{origin}: '-' is not allowed in variant key '{key}'; use '_' instead"
            ),
            Self::MalformedZipKeys {
                origin,
                reason,
            } => write!(f, "{origin}: malformed zip_keys ({reason})"),
            Self::KeyInMultipleZipGroups {
                key,
            } => write!(f, "zip_keys: '{key}' appears in more than one zip group"),
            Self::ZipAndExtend {
                key,
            } => write!(f, "'{key}' cannot be in both zip_keys and extend_keys"),
            Self::ZipLengthMismatch {
                origin,
                lengths,
            } => {
                let rendered: Vec<String> =
                    lengths.iter().map(|(key, len)| format!("{key} ({len})")).collect();
                write!(
                    f,
                    "{origin}: zipped keys have mismatched lengths: {}",
                    rendered.join(", ")
                )
            }
            Self::UndefinedZipKey {
                group,
                key,
            } => write!(f, "zip group [{}] references undefined key '{key}'", group.join(", ")),
            Self::MissingSubspaceValue {
                origin,
                key,
                value,
            } => write!(
                f,
                "{origin}: filtering for unimplemented subspace: '{key}' has no value '{value}'"
            ),
            Self::InvalidValue {
                origin,
                key,
                reason,
            } => write!(f, "{origin}: invalid value for '{key}': {reason}"),
        }
    }
}

/// The main error type for varia operations
///
/// Each variant names one failure mode of variant resolution or recipe rendering and
/// carries enough context (recipe, expression, variable names) to locate the fault.
///
/// # Examples
///
/// ```rust,no_run
/// use varia_cli::core::VariaError;
///
/// fn describe(error: &VariaError) -> &'static str {
///     match error {
///         VariaError::Unsatisfiable { .. } => "no build configuration survives",
///         VariaError::Template(_) => "recipe authoring bug",
///         _ => "other failure",
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum VariaError {
    /// One or more variant specification sources are malformed or inconsistent
    ///
    /// All problems found by the combiner are reported together, one per line.
    #[error("Variant configuration errors:\n{}", format_problems(problems))]
    VariantConfigError {
        /// Every problem found, in detection order
        problems: Vec<ConfigProblem>,
    },

    /// A general configuration failure (global config, CLI overrides)
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },

    /// The recipe calls a function that is neither a recipe helper nor a template builtin
    #[error("Unknown helper function '{name}' in {recipe}")]
    UnknownHelper {
        /// The called function name
        name: String,
        /// The recipe containing the call
        recipe: String,
    },

    /// A helper call cannot be mapped to the variables it consumes
    ///
    /// Raised for non-literal arguments and unknown language tags rather than guessing.
    #[error("Cannot resolve {helper}(...) in {recipe}: {reason}")]
    HelperArgument {
        /// The helper function name
        helper: String,
        /// Why the call could not be resolved
        reason: String,
        /// The recipe containing the call
        recipe: String,
    },

    /// The recipe template failed to render
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A selector expression could not be parsed or evaluated
    #[error("Invalid selector '[{expression}]': {reason}")]
    SelectorError {
        /// The selector text between the brackets
        expression: String,
        /// Why the selector was rejected
        reason: String,
    },

    /// A template reference stayed unbound after the used-variable set converged
    #[error("Unresolved variable(s) {} in {scope} of {recipe}", variables.join(", "))]
    UnresolvedVariable {
        /// The recipe being rendered
        recipe: String,
        /// The scope (top-level or output name) where the reference appears
        scope: String,
        /// The unbound names
        variables: Vec<String>,
    },

    /// Applicability filtering removed every candidate variant
    #[error("Unsatisfiable configuration for {scope} of {recipe}: {details}")]
    Unsatisfiable {
        /// The recipe being rendered
        recipe: String,
        /// The scope that has no surviving variant
        scope: String,
        /// The used variables and why nothing survived
        details: String,
    },

    /// Two rendered metadata share an identity but differ in content
    #[error("Identity conflict for '{identity}' in {recipe}: two variants rendered different content")]
    IdentityConflict {
        /// The colliding identity
        identity: String,
        /// The recipe being rendered
        recipe: String,
    },

    /// The render was cancelled through its abort signal
    #[error("Render aborted")]
    Aborted,

    /// No recipe file exists at the given location
    #[error("Recipe not found: {path}")]
    RecipeNotFound {
        /// The path that was searched
        path: String,
    },

    /// The rendered recipe is not a valid document
    #[error("Failed to parse rendered recipe {recipe}: {reason}")]
    RecipeParseError {
        /// The recipe being rendered
        recipe: String,
        /// The parser message
        reason: String,
    },

    /// The same recipe was rendered through too many iterations
    #[error("Used-variable set for {scope} of {recipe} did not converge after {iterations} iterations")]
    NoConvergence {
        /// The recipe being rendered
        recipe: String,
        /// The scope that kept growing
        scope: String,
        /// Iterations performed
        iterations: usize,
    },

    /// IO error from the standard library
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Any other failure
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

fn format_problems(problems: &[ConfigProblem]) -> String {
    problems.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n")
}

impl Clone for VariaError {
    fn clone(&self) -> Self {
        match self {
            Self::VariantConfigError {
                problems,
            } => Self::VariantConfigError {
                problems: problems.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::UnknownHelper {
                name,
                recipe,
            } => Self::UnknownHelper {
                name: name.clone(),
                recipe: recipe.clone(),
            },
            Self::HelperArgument {
                helper,
                reason,
                recipe,
            } => Self::HelperArgument {
                helper: helper.clone(),
                reason: reason.clone(),
                recipe: recipe.clone(),
            },
            Self::Template(err) => Self::Template(err.clone()),
            Self::SelectorError {
                expression,
                reason,
            } => Self::SelectorError {
                expression: expression.clone(),
                reason: reason.clone(),
            },
            Self::UnresolvedVariable {
                recipe,
                scope,
                variables,
            } => Self::UnresolvedVariable {
                recipe: recipe.clone(),
                scope: scope.clone(),
                variables: variables.clone(),
            },
            Self::Unsatisfiable {
                recipe,
                scope,
                details,
            } => Self::Unsatisfiable {
                recipe: recipe.clone(),
                scope: scope.clone(),
                details: details.clone(),
            },
            Self::IdentityConflict {
                identity,
                recipe,
            } => Self::IdentityConflict {
                identity: identity.clone(),
                recipe: recipe.clone(),
            },
            Self::Aborted => Self::Aborted,
            Self::RecipeNotFound {
                path,
            } => Self::RecipeNotFound {
                path: path.clone(),
            },
            Self::RecipeParseError {
                recipe,
                reason,
            } => Self::RecipeParseError {
                recipe: recipe.clone(),
                reason: reason.clone(),
            },
            Self::NoConvergence {
                recipe,
                scope,
                iterations,
            } => Self::NoConvergence {
                recipe: recipe.clone(),
                scope: scope.clone(),
                iterations: *iterations,
            },
            // io::Error is not Clone; keep the kind and message
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Self::YamlError(e) => Self::Other {
                message: format!("YAML error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that carries suggestions and details for display
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: VariaError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: VariaError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add an actionable suggestion, shown in green.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error, shown in yellow.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Known error types are downcast and mapped to tailored suggestions. Errors wrapped
/// with [`anyhow::Context`] are searched through their whole chain, so a
/// [`VariaError`] raised deep in the engine keeps its suggestion at the CLI.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    for cause in error.chain() {
        if let Some(varia_error) = cause.downcast_ref::<VariaError>() {
            let mut ctx = create_error_context(varia_error.clone());
            // Keep the outer anyhow context when it adds information
            let outer = error.to_string();
            if outer != varia_error.to_string() {
                ctx.details = Some(match ctx.details.take() {
                    Some(details) => format!("{outer}\n{details}"),
                    None => outer,
                });
            }
            return ctx;
        }

        if let Some(template_error) = cause.downcast_ref::<TemplateError>() {
            return create_error_context(VariaError::Template(template_error.clone()));
        }
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(VariaError::Other {
                    message: format!("Permission denied: {io_error}"),
                })
                .with_suggestion("Check the ownership and permissions of the recipe and config files");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(VariaError::Other {
                    message: format!("File not found: {io_error}"),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(VariaError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of ~/.varia/config.toml")
        .with_details("The global configuration file could not be parsed");
    }

    if let Some(yaml_error) = error.downcast_ref::<serde_yaml::Error>() {
        return ErrorContext::new(VariaError::Other {
            message: format!("YAML error: {yaml_error}"),
        })
        .with_suggestion("Check the YAML syntax: indentation, quoting and list markers");
    }

    // Walk the chain so the user sees every layer of context
    let mut message = error.to_string();
    for cause in error.chain().skip(1) {
        message.push_str(&format!("\n  caused by: {cause}"));
    }
    ErrorContext::new(VariaError::Other {
        message,
    })
}

fn create_error_context(error: VariaError) -> ErrorContext {
    match &error {
        VariaError::VariantConfigError {
            problems,
        } => {
            let zip_related = problems.iter().any(|p| {
                matches!(
                    p,
                    ConfigProblem::ZipLengthMismatch { .. }
                        | ConfigProblem::UndefinedZipKey { .. }
                        | ConfigProblem::KeyInMultipleZipGroups { .. }
                )
            });
            let ctx = ErrorContext::new(error);
            if zip_related {
                ctx.with_suggestion(
                    "Every key in a zip group must list the same number of values in the file that defines the group",
                )
                .with_details("Zipped keys vary together: the n-th value of each key forms one configuration")
            } else {
                ctx.with_suggestion(
                    "Fix the listed entries in your conda_build_config.yaml files and run 'varia validate' on them",
                )
            }
        }
        VariaError::UnknownHelper {
            ..
        } => ErrorContext::new(error)
            .with_suggestion(
                "Available helpers: compiler, cdt, pin_compatible, pin_subpackage, load_setup_py_data, load_file_regex, load_file_data, resolved_packages",
            )
            .with_details("Only the recipe helper functions and template builtins may be called"),
        VariaError::HelperArgument {
            helper,
            ..
        } => {
            let suggestion = if helper == "compiler" {
                "Pass a literal language name such as compiler('c'), or define <language>_compiler in your variant config"
            } else {
                "Pass helper arguments as string literals so the variables they consume can be determined"
            };
            ErrorContext::new(error).with_suggestion(suggestion)
        }
        VariaError::Template(_) => ErrorContext::new(error)
            .with_suggestion("Check the template syntax near the reported line")
            .with_details("Template syntax errors are recipe authoring bugs and are never retried"),
        VariaError::SelectorError {
            ..
        } => ErrorContext::new(error).with_suggestion(
            "Selectors support 'and', 'or', 'not', comparisons and platform names like win, linux, osx",
        ),
        VariaError::UnresolvedVariable {
            ..
        } => ErrorContext::new(error)
            .with_suggestion(
                "Declare the variable in conda_build_config.yaml, define it with {% set %}, or pass --variant key=value",
            )
            .with_details("The variable is referenced by the recipe but no specification source provides it"),
        VariaError::Unsatisfiable {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the selectors attached to variant values against the target platforms")
            .with_details("Every combination of used variables was excluded by an applicability selector"),
        VariaError::IdentityConflict {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Make the differing content depend on a variant variable, or remove the duplicate")
            .with_details("Identity is computed only from the variables the recipe uses"),
        VariaError::RecipeNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Pass a recipe directory containing meta.yaml, or the path to the file itself"),
        VariaError::RecipeParseError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'varia render' with --verbose to inspect the rendered text")
            .with_details("The template rendered successfully but the result is not valid YAML"),
        _ => ErrorContext::new(error),
    }
}
