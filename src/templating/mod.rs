//! Recipe templating with Tera.
//!
//! Recipes are YAML documents with embedded template expressions. This module turns
//! one recipe template plus one variant into a structured document.
//!
//! # Overview
//!
//! Rendering one variant has three stages:
//! 1. Tera evaluates the template with the variant values, the selector flags
//!    derived from them (`linux`, `win`, `py`, `np`, ...) and the recipe helpers
//! 2. Selector comments (`# [win]`) drop the lines whose condition is false
//! 3. The text is parsed as YAML with every plain scalar kept as a string
//!
//! # Supported Syntax
//!
//! - Variable substitution: `{{ python }}`
//! - Conditional logic: `{% if python == "3.8" %}...{% endif %}`
//! - Loops and assignments: `{% for ... %}`, `{% set name = "zlib" %}`
//! - Tera filters, including the positional forms `replace('.', '')` and `default('x')`
//! - Dictionary lookups with a fallback: `{{ environ.get('GIT_DESCRIBE_TAG', '0') }}`
//! - Recipe helpers called with positional or named arguments:
//!   `{{ compiler('c') }}`, `{{ pin_compatible('numpy', max_pin='x.x') }}`
//!
//! # Recipe Helpers
//!
//! | Helper | Result | Consumes |
//! |---|---|---|
//! | `compiler(language)` | `gcc_linux-64 11` | `<language>_compiler`, `<language>_compiler_version`, `target_platform` |
//! | `cdt(package_name)` | `libx11-cos6-x86_64` | `cdt_name`, `cdt_arch`, `target_platform` |
//! | `pin_compatible(package_name, ...)` | `numpy >=1.11,<2a0` | the package's variable |
//! | `pin_subpackage(subpackage_name, ...)` | `libfoo >=1.2,<2a0` | nothing |
//! | `load_setup_py_data()`, `load_file_regex(...)`, `load_file_data(...)` | empty | nothing; needs download |
//! | `resolved_packages(env)` | empty | nothing; needs re-parse |
//!
//! # Undefined Names
//!
//! Names without a value do not fail the render. They are bound to the sentinel
//! `__VARIA_UNDEFINED_<name>__` and reported in [`RenderOutcome::NeedsMoreVariables`].
//!
//! ```
//! use varia_cli::templating::{RecipeInfo, RenderOutcome, VariantRenderer};
//! use varia_cli::variants::Variant;
//!
//! let renderer = VariantRenderer::new(RecipeInfo::new("zlib"), "version: {{ zlib }}\n", "linux-64");
//! let outcome = renderer.render(&Variant::new()).unwrap();
//! assert!(matches!(outcome, RenderOutcome::NeedsMoreVariables { ref names, .. } if names.contains("zlib")));
//! ```

pub mod calls;
pub mod error;
pub mod helpers;
pub mod renderer;

pub use calls::{CallArg, FunctionCall, normalize_template, string_literal};
pub use error::{ErrorLocation, TemplateError};
pub use helpers::{Consumption, Deferral, HELPERS, HelperSpec, RenderTrace, helper};
pub use renderer::{
    RecipeInfo, RenderOutcome, RenderedDocument, SENTINEL_PREFIX, TemplateBindings, TemplateEngine, TeraEngine,
    TextRender, VariantRenderer, find_sentinels, format_tera_error, package_versions, sentinel,
};
