//! Recipe helper functions.
//!
//! Every helper a recipe may call is declared once in [`HELPERS`] together with its
//! parameter names and the variables it consumes. The usage analyzer reads the
//! table to resolve `compiler('c')` into `c_compiler`, and the renderer registers
//! one Tera function per entry.
//!
//! Helpers that depend on the build environment (`load_setup_py_data`,
//! `resolved_packages`, ...) cannot be evaluated while rendering. They return
//! empty values and record in the [`RenderTrace`] that the metadata needs the
//! source downloaded or a re-parse inside the build environment.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tera::{Tera, Value};

use crate::metadata::pins::apply_pin_expressions;
use crate::variants::{Variant, native_compiler};

/// What a helper defers to a later build stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// The recipe source has to be downloaded first
    Download,
    /// The value exists only inside the build environment
    Reparse,
}

/// Which variables a helper call reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// `<language>_compiler`, `<language>_compiler_version` and `target_platform`
    Compiler,
    /// A fixed list of variables
    Fixed(&'static [&'static str]),
    /// The variable named by the `package_name` argument (`-` becomes `_`)
    PackageVariable,
    /// No variable
    Nothing,
}

/// Declaration of one helper function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperSpec {
    pub name: &'static str,
    /// Parameter names in positional order
    pub params: &'static [&'static str],
    pub consumes: Consumption,
    pub deferral: Option<Deferral>,
}

pub static HELPERS: &[HelperSpec] = &[
    HelperSpec {
        name: "compiler",
        params: &["language"],
        consumes: Consumption::Compiler,
        deferral: None,
    },
    HelperSpec {
        name: "cdt",
        params: &["package_name"],
        consumes: Consumption::Fixed(&["cdt_name", "cdt_arch", "target_platform"]),
        deferral: None,
    },
    HelperSpec {
        name: "pin_compatible",
        params: &["package_name", "min_pin", "max_pin", "lower_bound", "upper_bound", "exact"],
        consumes: Consumption::PackageVariable,
        deferral: None,
    },
    HelperSpec {
        name: "pin_subpackage",
        params: &["subpackage_name", "min_pin", "max_pin", "exact"],
        consumes: Consumption::Nothing,
        deferral: None,
    },
    HelperSpec {
        name: "load_setup_py_data",
        params: &["setup_file", "from_recipe_dir", "recipe_dir"],
        consumes: Consumption::Nothing,
        deferral: Some(Deferral::Download),
    },
    HelperSpec {
        name: "load_file_regex",
        params: &["load_file", "regex_pattern", "from_recipe_dir", "recipe_dir"],
        consumes: Consumption::Nothing,
        deferral: Some(Deferral::Download),
    },
    HelperSpec {
        name: "load_file_data",
        params: &["filename", "file_type", "from_recipe_dir", "recipe_dir"],
        consumes: Consumption::Nothing,
        deferral: Some(Deferral::Download),
    },
    HelperSpec {
        name: "resolved_packages",
        params: &["env"],
        consumes: Consumption::Nothing,
        deferral: Some(Deferral::Reparse),
    },
];

/// Functions built into Tera that recipes may call.
pub const TERA_FUNCTIONS: &[&str] = &["range", "now", "throw", "get_env", "get_random"];

/// Names the renderer binds itself; they are never configuration variables.
pub const TEMPLATE_GLOBALS: &[&str] = &["environ", "loop"];

pub fn helper(name: &str) -> Option<&'static HelperSpec> {
    HELPERS.iter().find(|h| h.name == name)
}

pub const DEFAULT_MIN_PIN: &str = "x.x.x.x.x.x";
pub const DEFAULT_MAX_PIN: &str = "x";

/// Side effects recorded by helpers during one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTrace {
    pub needs_download: bool,
    pub needs_reparse: bool,
    /// `pin_subpackage` targets whose version was not known yet
    pub missed_subpackages: BTreeSet<String>,
}

/// Everything the helpers of one render can see.
#[derive(Debug)]
pub struct HelperContext {
    /// The variant bindings, including `target_platform`
    pub variant: Variant,
    pub target_platform: String,
    /// Versions of the recipe's own packages by name
    pub subpackages: BTreeMap<String, String>,
    pub trace: Mutex<RenderTrace>,
}

impl HelperContext {
    pub fn new(variant: Variant, target_platform: impl Into<String>) -> Self {
        Self {
            variant,
            target_platform: target_platform.into(),
            subpackages: BTreeMap::new(),
            trace: Mutex::new(RenderTrace::default()),
        }
    }

    #[must_use]
    pub fn with_subpackages(mut self, subpackages: BTreeMap<String, String>) -> Self {
        self.subpackages = subpackages;
        self
    }

    fn platform(&self) -> &str {
        self.variant.get_str("target_platform").unwrap_or(&self.target_platform)
    }

    fn record(&self, update: impl FnOnce(&mut RenderTrace)) {
        // A poisoned trace only means another helper panicked; keep recording.
        let mut trace = self.trace.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        update(&mut trace);
    }

    pub fn take_trace(&self) -> RenderTrace {
        let mut trace = self.trace.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *trace)
    }
}

/// Register every helper of [`HELPERS`] on a Tera instance.
pub fn register_helpers(tera: &mut Tera, ctx: &Arc<HelperContext>) {
    tera.register_function("compiler", create_compiler_function(Arc::clone(ctx)));
    tera.register_function("cdt", create_cdt_function(Arc::clone(ctx)));
    tera.register_function("pin_compatible", create_pin_compatible_function(Arc::clone(ctx)));
    tera.register_function("pin_subpackage", create_pin_subpackage_function(Arc::clone(ctx)));
    for spec in HELPERS {
        if let Some(deferral) = spec.deferral {
            tera.register_function(spec.name, create_deferred_function(Arc::clone(ctx), spec.name, deferral));
        }
    }
}

fn str_arg<'a>(args: &'a HashMap<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn bool_arg(args: &HashMap<String, Value>, name: &str) -> bool {
    match args.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn required<'a>(args: &'a HashMap<String, Value>, helper: &str, name: &str) -> tera::Result<&'a str> {
    str_arg(args, name).ok_or_else(|| tera::Error::msg(format!("{helper}() requires a string '{name}' argument")))
}

/// `compiler(language)` → `<compiler>_<target_platform>[ <version>]`.
pub fn create_compiler_function(ctx: Arc<HelperContext>) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let language = required(args, "compiler", "language")?;
        let platform = ctx.platform();
        let compiler = match ctx.variant.get_str(&format!("{language}_compiler")) {
            Some(compiler) => compiler.to_string(),
            None => native_compiler(language, platform, ctx.variant.get_str("python")).ok_or_else(|| {
                tera::Error::msg(format!("no compiler is configured for language '{language}' on {platform}"))
            })?,
        };
        let mut spec = format!("{compiler}_{platform}");
        if let Some(version) = ctx.variant.get_str(&format!("{language}_compiler_version")) {
            spec.push(' ');
            spec.push_str(version);
        }
        Ok(Value::String(spec))
    }
}

/// `cdt(package_name)` → `<name>-<cdt_name>-<cdt_arch>`.
pub fn create_cdt_function(ctx: Arc<HelperContext>) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = required(args, "cdt", "package_name")?;
        let platform = ctx.platform();
        let arch = platform.split_once('-').map_or("", |(_, arch)| arch);
        let default_arch = match arch {
            "64" => "x86_64",
            "32" => "i686",
            other => other,
        };
        let default_name = if matches!(arch, "64" | "32") { "cos6" } else { "cos7" };
        let cdt_name = ctx.variant.get_str("cdt_name").unwrap_or(default_name);
        let cdt_arch = ctx.variant.get_str("cdt_arch").unwrap_or(default_arch);
        Ok(Value::String(format!("{name}-{cdt_name}-{cdt_arch}")))
    }
}

/// `pin_compatible(package_name, ...)` → `<name> <constraint>` from the variant value.
///
/// When the package has no variant value the bare name is returned and the
/// metadata is marked for re-parsing in the build environment.
pub fn create_pin_compatible_function(ctx: Arc<HelperContext>) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = required(args, "pin_compatible", "package_name")?;
        let Some(version) = ctx.variant.get_str(&name.replace('-', "_")) else {
            ctx.record(|t| t.needs_reparse = true);
            return Ok(Value::String(name.to_string()));
        };
        let constraint = pin_constraint(args, version, bool_arg(args, "exact"));
        Ok(Value::String(format!("{name} {constraint}")))
    }
}

/// `pin_subpackage(subpackage_name, ...)` → a pin on one of the recipe's own packages.
pub fn create_pin_subpackage_function(ctx: Arc<HelperContext>) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = required(args, "pin_subpackage", "subpackage_name")?;
        let Some(version) = ctx.subpackages.get(name) else {
            ctx.record(|t| {
                t.missed_subpackages.insert(name.to_string());
            });
            return Ok(Value::String(name.to_string()));
        };
        let constraint = pin_constraint(args, version, bool_arg(args, "exact"));
        Ok(Value::String(format!("{name} {constraint}")))
    }
}

fn pin_constraint(args: &HashMap<String, Value>, version: &str, exact: bool) -> String {
    if exact {
        return version.to_string();
    }
    let lower = str_arg(args, "lower_bound");
    let upper = str_arg(args, "upper_bound");
    if lower.is_some() || upper.is_some() {
        let mut parts = Vec::new();
        if let Some(lower) = lower {
            parts.push(format!(">={lower}"));
        }
        if let Some(upper) = upper {
            parts.push(format!("<{upper}"));
        }
        return parts.join(",");
    }
    apply_pin_expressions(
        version,
        str_arg(args, "min_pin").unwrap_or(DEFAULT_MIN_PIN),
        str_arg(args, "max_pin").unwrap_or(DEFAULT_MAX_PIN),
    )
}

/// A helper whose real value only exists later; renders as an empty value.
pub fn create_deferred_function(
    ctx: Arc<HelperContext>,
    name: &'static str,
    deferral: Deferral,
) -> impl tera::Function + 'static {
    move |_args: &HashMap<String, Value>| -> tera::Result<Value> {
        tracing::debug!("{name}() deferred ({deferral:?})");
        ctx.record(|t| match deferral {
            Deferral::Download => t.needs_download = true,
            Deferral::Reparse => t.needs_reparse = true,
        });
        Ok(match name {
            "resolved_packages" => Value::Array(Vec::new()),
            _ => Value::Object(serde_json::Map::new()),
        })
    }
}
