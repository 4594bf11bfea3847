//! Built-in default variant values and native compilers.

use std::collections::BTreeMap;

use super::types::{CandidateValue, SourceValue, SpecSource, VariableValue};

/// Python used when no source declares one.
pub const DEFAULT_PYTHON: &str = "3.11";

/// Origin label of the built-in source.
pub const DEFAULTS_ORIGIN: &str = "<built-in defaults>";

/// The native compiler package for a language on a platform.
///
/// On Windows the C and C++ compilers follow the Python version, matching the
/// compiler used to build upstream Python.
pub fn native_compiler(language: &str, target_platform: &str, python: Option<&str>) -> Option<String> {
    let platform = target_platform.split('-').next().unwrap_or(target_platform);
    let compiler = match (platform, language) {
        ("linux", "c") => "gcc",
        ("linux", "cxx") => "gxx",
        ("osx", "c") => "clang",
        ("osx", "cxx") => "clangxx",
        ("linux" | "osx" | "win", "fortran") => "gfortran",
        ("win", "c" | "cxx") => windows_toolchain(python.unwrap_or(DEFAULT_PYTHON)).0,
        _ => return None,
    };
    Some(compiler.to_string())
}

/// `(compiler, vc)` for a Python version on Windows.
fn windows_toolchain(python: &str) -> (&'static str, &'static str) {
    let mut parts = python.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(3);
    let minor = parts.next().unwrap_or(0);
    match (major, minor) {
        (2, _) | (3, 0..=2) => ("vs2008", "9"),
        (3, 3 | 4) => ("vs2010", "10"),
        _ => ("vs2017", "14"),
    }
}

/// The built-in lowest-precedence specification source.
///
/// `python_hint` is the Python value requested by higher sources; it selects the
/// Windows toolchain the same way the declared Python would.
pub fn default_source(target_platform: &str, python_hint: Option<&str>) -> SpecSource {
    let python = python_hint.unwrap_or(DEFAULT_PYTHON);
    let on_win = target_platform.starts_with("win-");

    let pin = |min: &str, max: &str| {
        let mut expr = BTreeMap::new();
        expr.insert("min_pin".to_string(), VariableValue::from(min));
        expr.insert("max_pin".to_string(), VariableValue::from(max));
        VariableValue::Map(expr)
    };
    let mut pin_run_as_build = BTreeMap::new();
    pin_run_as_build.insert("python".to_string(), pin("x.x", "x.x"));
    pin_run_as_build.insert("r-base".to_string(), pin("x.x", "x.x"));

    let mut source = SpecSource::new(DEFAULTS_ORIGIN)
        .with("python", [DEFAULT_PYTHON])
        .with("numpy", ["1.26"])
        .with("perl", ["5.26.2"])
        .with("lua", ["5"])
        .with("r_base", [if on_win { "3.4" } else { "3.5" }])
        .with("cpu_optimization_target", ["nocona"])
        .with_value("pin_run_as_build", SourceValue::Mapping(pin_run_as_build))
        .with_value("ignore_version", SourceValue::Candidates(Vec::new()))
        .with("ignore_build_only_deps", ["python", "numpy"])
        .with("extend_keys", super::types::DEFAULT_EXTEND_KEYS.iter().copied())
        .with("cran_mirror", ["https://cran.r-project.org"])
        .with("target_platform", [target_platform]);

    for language in ["c", "cxx", "fortran"] {
        if let Some(compiler) = native_compiler(language, target_platform, Some(python)) {
            source.set(
                &format!("{language}_compiler"),
                SourceValue::Candidates(vec![CandidateValue::new(compiler)]),
            );
        }
    }
    if on_win {
        source = source.with("vc", [windows_toolchain(python).1]);
    }
    source
}
