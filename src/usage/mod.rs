//! Variable usage analysis.
//!
//! Decides which configuration variables a recipe scope references. A scope is
//! the whole recipe, its top-level part, or one output. Usage comes from:
//!
//! - identifiers in `{{ }}` and `{% %}` regions, including derived selector
//!   flags (`py` reads `python`, `win` reads `target_platform`)
//! - helper calls, resolved through the static helper table
//!   (`compiler('c')` reads `c_compiler` and `c_compiler_version`)
//! - selector comments (`# [win and py >= 38]`)
//! - sentinels of unbound names left in the rendered document
//! - bare requirements of the rendered document (`- zlib`)
//! - `$name` / `%name%` references in build scripts
//!
//! Every result is intersected with the universe of candidate variables passed in,
//! so a result is always a subset of the active specification.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;
use tracing::trace;

use crate::core::VariaError;
use crate::metadata::pins::variable_name;
use crate::selectors::{Selector, derived_source, split_selector};
use crate::templating::calls::{FunctionCall, RegionKind, TokenKind, function_calls, lex, template_regions};
use crate::templating::helpers::{Consumption, TEMPLATE_GLOBALS, TERA_FUNCTIONS, helper};
use crate::templating::{find_sentinels, string_literal};
use crate::variants::{UsedVariableSet, VariantSpec, native_compiler};

mod requirements;

pub use requirements::requirement_usage;

static SHELL_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{?\s*([A-Za-z_][A-Za-z0-9_]*)").expect("shell pattern is valid"));
static BATCH_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)%").expect("batch pattern is valid"));

/// Words of the template language that are never variables.
const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "elif", "else", "endif", "for", "endfor", "set", "set_global",
    "true", "false", "True", "False", "none", "None", "with", "endwith", "block", "endblock", "macro",
    "endmacro", "filter", "endfilter", "include", "import", "extends", "as", "break", "continue", "self",
    "super",
];

/// Variables consumed by `compiler(...)` besides the language pair.
const SYSROOT_VARIABLE: &str = "CONDA_BUILD_SYSROOT";

/// Usage analysis for one recipe against one combined specification.
#[derive(Debug, Clone, Copy)]
pub struct UsageAnalyzer<'a> {
    spec: &'a VariantSpec,
    recipe: &'a str,
    target_platform: &'a str,
}

impl<'a> UsageAnalyzer<'a> {
    pub fn new(spec: &'a VariantSpec, recipe: &'a str, target_platform: &'a str) -> Self {
        Self {
            spec,
            recipe,
            target_platform,
        }
    }

    /// Variables of `universe` the template text of a scope references.
    ///
    /// # Errors
    ///
    /// Calls to unknown functions, helper calls whose arguments are not string
    /// literals, unknown compiler languages and unparsable selectors.
    pub fn text_usage(&self, text: &str, universe: &UsedVariableSet) -> Result<UsedVariableSet, VariaError> {
        let mut used = UsedVariableSet::new();
        let regions = template_regions(text);
        let local = local_names(text);

        for &region in &regions {
            for name in region_identifiers(&text[region.start..region.end]) {
                if !local.contains(&name) {
                    add_with_source(&mut used, &name, universe);
                }
            }
            for call in function_calls(text, region) {
                if local.contains(&call.name) {
                    continue;
                }
                for name in self.call_usage(&call)? {
                    if universe.contains(&name) {
                        used.insert(name);
                    }
                }
            }
        }

        for line in text.lines() {
            let Some((_, expression)) = split_selector(line) else {
                continue;
            };
            for name in Selector::parse(expression)?.variables() {
                if universe.contains(&name) {
                    used.insert(name);
                }
            }
        }

        trace!("Text of {} references {:?}", self.recipe, used);
        Ok(used)
    }

    /// Variables whose sentinels or bare requirements appear in a rendered document.
    pub fn document_usage(&self, document: &Value, universe: &UsedVariableSet) -> UsedVariableSet {
        let mut used = UsedVariableSet::new();
        let mut strings = Vec::new();
        collect_strings(document, &mut strings);
        for text in strings {
            for name in find_sentinels(text) {
                add_with_source(&mut used, root_name(&name), universe);
            }
        }
        used.extend(requirement_usage(document, universe, &self.spec.ignore_build_only_deps()));
        used
    }

    /// Variables whose template lookup failed and that the scope text mentions.
    ///
    /// A failed lookup leaves no sentinel when it only fed a condition, so the
    /// scope text decides whether the lookup belongs to this scope.
    pub fn lookup_usage(
        &self,
        undefined: &BTreeSet<String>,
        text: &str,
        universe: &UsedVariableSet,
    ) -> UsedVariableSet {
        let mentioned = mentioned_identifiers(text);
        let mut used = UsedVariableSet::new();
        for name in undefined {
            let root = root_name(name);
            if mentioned.contains(root) {
                add_with_source(&mut used, root, universe);
            }
        }
        used
    }

    /// Names still unbound in a final render of a scope: sentinels left in its
    /// document, and failed lookups its text mentions.
    pub fn unresolved_names(&self, text: &str, document: &Value, undefined: &BTreeSet<String>) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut strings = Vec::new();
        collect_strings(document, &mut strings);
        for text in strings {
            names.extend(find_sentinels(text));
        }
        let mentioned = mentioned_identifiers(text);
        names.extend(undefined.iter().filter(|name| mentioned.contains(root_name(name))).cloned());
        names.into_iter().collect()
    }

    fn call_usage(&self, call: &FunctionCall) -> Result<Vec<String>, VariaError> {
        let Some(spec) = helper(&call.name) else {
            if TERA_FUNCTIONS.contains(&call.name.as_str()) {
                return Ok(Vec::new());
            }
            return Err(VariaError::UnknownHelper {
                name: call.name.clone(),
                recipe: self.recipe.to_string(),
            });
        };

        match spec.consumes {
            Consumption::Nothing => Ok(Vec::new()),
            Consumption::Fixed(names) => Ok(names.iter().map(|n| (*n).to_string()).collect()),
            Consumption::PackageVariable => {
                let package = self.literal_argument(call, spec.params, "package_name")?;
                Ok(vec![variable_name(&package)])
            }
            Consumption::Compiler => {
                let language = self.literal_argument(call, spec.params, "language")?;
                let variable = format!("{language}_compiler");
                let known = self.spec.contains(&variable)
                    || native_compiler(&language, self.target_platform, None).is_some();
                if !known {
                    return Err(VariaError::HelperArgument {
                        helper: call.name.clone(),
                        reason: format!(
                            "unknown language '{language}': no '{variable}' variable and no native compiler for {}",
                            self.target_platform
                        ),
                        recipe: self.recipe.to_string(),
                    });
                }
                let mut names = vec![format!("{variable}_version"), variable, "target_platform".to_string()];
                if matches!(language.as_str(), "c" | "cxx") {
                    names.push(SYSROOT_VARIABLE.to_string());
                }
                Ok(names)
            }
        }
    }

    fn literal_argument(&self, call: &FunctionCall, params: &[&str], param: &str) -> Result<String, VariaError> {
        let raw = call.argument(param, params).ok_or_else(|| VariaError::HelperArgument {
            helper: call.name.clone(),
            reason: format!("missing '{param}' argument"),
            recipe: self.recipe.to_string(),
        })?;
        string_literal(raw).ok_or_else(|| VariaError::HelperArgument {
            helper: call.name.clone(),
            reason: format!("'{param}' must be a string literal, got `{}`", raw.trim()),
            recipe: self.recipe.to_string(),
        })
    }
}

/// Variables of `universe` referenced as `$name`/`${name}` (or `%name%` on Windows) in a build script.
pub fn script_usage(script: &str, universe: &UsedVariableSet, windows: bool) -> UsedVariableSet {
    let pattern = if windows { &*BATCH_REFERENCE } else { &*SHELL_REFERENCE };
    pattern
        .captures_iter(script)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| universe.contains(*name))
        .map(str::to_string)
        .collect()
}

fn add_with_source(used: &mut UsedVariableSet, name: &str, universe: &UsedVariableSet) {
    if universe.contains(name) {
        used.insert(name.to_string());
    }
    if let Some(source) = derived_source(name) {
        if universe.contains(source) {
            used.insert(source.to_string());
        }
    }
}

fn root_name(name: &str) -> &str {
    name.split(['.', '[']).next().unwrap_or(name)
}

/// Identifiers read by one region: not attributes, filters, tests, calls,
/// keyword argument names or keywords.
fn region_identifiers(inner: &str) -> Vec<String> {
    let tokens = lex(inner);
    let mut names = Vec::new();
    for (idx, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Ident || KEYWORDS.contains(&token.text) || TEMPLATE_GLOBALS.contains(&token.text) {
            continue;
        }
        let prev = idx.checked_sub(1).map(|i| tokens[i].text);
        let before_prev = idx.checked_sub(2).map(|i| tokens[i].text);
        let next = tokens.get(idx + 1).map(|t| t.text);
        let attribute_or_filter = matches!(prev, Some("." | "|" | "is" | ":"));
        let negated_test = prev == Some("not") && before_prev == Some("is");
        let call_or_keyword_arg = matches!(next, Some("(" | "="));
        if attribute_or_filter || negated_test || call_or_keyword_arg {
            continue;
        }
        names.push(token.text.to_string());
    }
    names
}

/// Names the template defines itself: `set` targets, loop variables and macros.
fn local_names(text: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for region in template_regions(text) {
        if region.kind != RegionKind::Statement {
            continue;
        }
        let tokens = lex(&text[region.start..region.end]);
        let Some(keyword) = tokens.first().map(|t| t.text) else {
            continue;
        };
        let targets: &[_] = match keyword {
            "set" | "set_global" => {
                let end = tokens.iter().position(|t| t.text == "=").unwrap_or(tokens.len());
                &tokens[1..end]
            }
            "for" => {
                let end = tokens.iter().position(|t| t.text == "in").unwrap_or(tokens.len());
                &tokens[1..end]
            }
            "macro" => {
                let end = tokens.iter().position(|t| t.text == ")").unwrap_or(tokens.len());
                &tokens[1..end]
            }
            _ => continue,
        };
        let mut after_default = false;
        for token in targets {
            match token.text {
                "=" => after_default = true,
                "," | "(" => after_default = false,
                _ if token.kind == TokenKind::Ident && !after_default => {
                    names.insert(token.text.to_string());
                }
                _ => {}
            }
        }
    }
    names
}

/// Every identifier token in the template regions of `text`.
fn mentioned_identifiers(text: &str) -> BTreeSet<String> {
    template_regions(text)
        .into_iter()
        .flat_map(|region| {
            lex(&text[region.start..region.end])
                .into_iter()
                .filter(|t| t.kind == TokenKind::Ident)
                .map(|t| t.text.to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn collect_strings<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Sequence(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Mapping(map) => {
            for (key, item) in map {
                collect_strings(key, out);
                collect_strings(item, out);
            }
        }
        Value::Tagged(tagged) => collect_strings(&tagged.value, out),
        _ => {}
    }
}
