//! Variant specifications and their expansion.
//!
//! A recipe is rendered once per *variant*: an assignment of concrete values to the
//! configuration variables the recipe actually uses. This module covers everything
//! up to producing those assignments:
//!
//! - [`loader`] reads layered config files into [`SpecSource`]s
//! - [`defaults`] provides the built-in lowest-precedence source
//! - [`combine`] merges sources into one [`VariantSpec`]
//! - [`expand`] turns a spec and a [`UsedVariableSet`] into ordered [`Variant`]s
//!
//! # Example
//!
//! ```
//! use varia_cli::variants::{SpecSource, UsedVariableSet, combine_specs, expand_variants};
//!
//! let spec = combine_specs(&[
//!     SpecSource::new("config").with("python", ["2.7", "3.5"]).with("numpy", ["1.10", "1.11"]),
//! ])
//! .unwrap();
//! let used: UsedVariableSet = ["python".to_string()].into_iter().collect();
//! assert_eq!(expand_variants(&spec, &used).len(), 2);
//! ```

pub mod combine;
pub mod defaults;
pub mod expand;
pub mod loader;
pub mod types;

pub use combine::{combine_specs, validate_source};
pub use defaults::{DEFAULT_PYTHON, DEFAULTS_ORIGIN, default_source, native_compiler};
pub use expand::expand_variants;
pub use loader::{CLI_ORIGIN, load_variant_file, parse_overrides, parse_variant_config};
pub use types::{
    CandidateValue, ConfigVariable, DEFAULT_EXTEND_KEYS, PinExpression, SPECIAL_KEYS, SourceValue, SpecSource,
    UsedVariableSet, VariableValue, Variant, VariantSpec,
};
