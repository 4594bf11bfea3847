//! Varia - variant resolution and recipe rendering
//!
//! Varia renders conda-style build recipes: a `meta.yaml` template plus layered
//! variant configuration (`conda_build_config.yaml` files and command-line
//! overrides) becomes one rendered metadata document per distinct build
//! configuration the recipe actually depends on.
//!
//! # Architecture Overview
//!
//! Rendering is a fixed point. The set of variables a recipe uses is not known
//! until the recipe is rendered, and which parts get rendered depends on the
//! variables bound. Varia starts from the empty set, renders every variant of the
//! current set, collects usage from the template text and the rendered results,
//! and repeats until the set stops growing. Unused configuration axes never
//! multiply the output.
//!
//! ```text
//! config files ──► variants::combine ──► VariantSpec
//!                                            │
//!            ┌──────── used set ◄── usage ◄──┤
//!            ▼                               │
//!     variants::expand ──► templating ──► render (fixed point per scope)
//!                                            │
//!                                            ▼
//!                                   metadata::RenderedMetadata
//! ```
//!
//! # Core Modules
//!
//! ## Configuration
//! - [`variants`] - Variant specifications: loading, combination and expansion
//! - [`selectors`] - `# [expr]` line selectors and value predicates
//! - [`config`] - Global (`~/.varia/config.toml`) and per-render configuration
//!
//! ## Rendering
//! - [`templating`] - Tera-based recipe rendering with undefined-name sentinels
//! - [`usage`] - Detection of the variables a recipe part uses
//! - [`render`] - The fixed-point orchestrator and recipe loading
//! - [`metadata`] - Rendered metadata, identities, outputs and implicit pinning
//!
//! ## Supporting Modules
//! - [`core`] - Error types and user-facing error display
//! - [`cli`] - The `varia` command line
//!
//! # Example
//!
//! ```rust
//! use varia_cli::render::{RecipeSource, RenderContext, render_recipe};
//! use varia_cli::variants::{SpecSource, combine_specs, default_source};
//!
//! let recipe = RecipeSource::from_text(
//!     "demo",
//!     "package:\n  name: demo\n  version: 1.0\nrequirements:\n  host:\n    - python\n",
//! );
//! let spec = combine_specs(&[
//!     default_source("linux-64", None),
//!     SpecSource::new("cfg").with("python", ["3.11", "3.12"]).with("numpy", ["1.26", "2.0"]),
//! ])
//! .unwrap();
//!
//! let report = render_recipe(&RenderContext::new(recipe, spec, "linux-64")).unwrap();
//! // numpy is configured but unused, so only python multiplies
//! assert_eq!(report.metadata.len(), 2);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod metadata;
pub mod render;
pub mod selectors;
pub mod templating;
pub mod usage;
pub mod variants;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
