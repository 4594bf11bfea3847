//! Recipe rendering with Tera.
//!
//! Rendering one variant runs three stages: the template text is evaluated by a
//! [`TemplateEngine`], selector comments are applied to the result, and the
//! remaining text is parsed as YAML with every scalar kept as a string.
//!
//! The Tera engine tolerates names that are not bound yet. When a lookup fails,
//! the name is bound to an undefined sentinel (`__VARIA_UNDEFINED_<name>__`) and
//! the render is retried. The names bound this way are returned with the
//! document so the orchestrator can grow its used-variable set.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as _;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_yaml::Value;
use strsim::levenshtein;
use tera::{Context as TeraContext, Tera};
use tracing::{debug, trace};

use super::calls::{RegionKind, TokenKind, lex, normalize_template, template_regions};
use super::error::{ErrorLocation, TemplateError};
use super::helpers::{HelperContext, RenderTrace, register_helpers};
use crate::core::VariaError;
use crate::selectors::{Namespace, SelectorValue, select_lines};
use crate::variants::Variant;
use crate::variants::loader::stringify_scalars;

/// Prefix of the marker bound to names without a value.
pub const SENTINEL_PREFIX: &str = "__VARIA_UNDEFINED_";
const SENTINEL_SUFFIX: &str = "__";

/// Maximum allowed Levenshtein distance as a percentage of target length for suggestions.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Upper bound on sentinel retries for one render.
const MAX_UNDEFINED_RETRIES: usize = 256;

static SENTINEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__VARIA_UNDEFINED_([A-Za-z0-9_.]+)__").expect("sentinel pattern is valid"));
static VARIABLE_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Variable `([^`]+)` not found").expect("lookup pattern is valid"));
static FUNCTION_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Function [`']([^`']+)[`'] not found").expect("function pattern is valid"));
static FUNCTION_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Function call [`']([^`']+)[`'] failed").expect("call pattern is valid"));
static LINE_COLUMN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+):(\d+)").expect("line pattern is valid"));

/// The sentinel text for a name.
pub fn sentinel(name: &str) -> String {
    format!("{SENTINEL_PREFIX}{name}{SENTINEL_SUFFIX}")
}

/// Names of every sentinel occurring in `text`.
pub fn find_sentinels(text: &str) -> BTreeSet<String> {
    SENTINEL.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string()).collect()
}

/// Identification of the recipe being rendered, for error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeInfo {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl RecipeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Values visible to one template evaluation.
#[derive(Debug, Clone)]
pub struct TemplateBindings<'a> {
    /// Variant values, with `target_platform` always present
    pub variant: &'a Variant,
    /// Selector namespace of the variant; its derived flags are exposed too
    pub namespace: &'a Namespace,
    pub target_platform: &'a str,
    /// Versions of the recipe's own packages, for `pin_subpackage`
    pub subpackages: &'a BTreeMap<String, String>,
    pub recipe: &'a RecipeInfo,
}

/// Result of evaluating template text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRender {
    pub text: String,
    /// Names that were bound to their sentinel
    pub undefined: BTreeSet<String>,
    pub trace: RenderTrace,
}

/// The template-expression evaluator used by [`VariantRenderer`].
pub trait TemplateEngine: Send + Sync {
    fn render_text(&self, template: &str, bindings: &TemplateBindings<'_>) -> Result<TextRender, TemplateError>;
}

/// [`TemplateEngine`] backed by a fresh Tera instance per render.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraEngine;

impl TemplateEngine for TeraEngine {
    fn render_text(&self, template: &str, bindings: &TemplateBindings<'_>) -> Result<TextRender, TemplateError> {
        let base = base_context(bindings);
        let iterated = iterated_names(template);
        let mut sentinels = serde_json::Map::new();
        let mut undefined = BTreeSet::new();

        for _ in 0..=MAX_UNDEFINED_RETRIES {
            let mut context = base.clone();
            for (name, value) in &sentinels {
                context.insert(name.as_str(), value);
            }

            let helpers = Arc::new(
                HelperContext::new(bindings.variant.clone(), bindings.target_platform)
                    .with_subpackages(bindings.subpackages.clone()),
            );
            // Fresh Tera instance per render; helpers capture this render's bindings
            let mut tera = Tera::default();
            register_helpers(&mut tera, &helpers);

            match tera.render_str(template, &context) {
                Ok(text) => {
                    return Ok(TextRender {
                        text,
                        undefined,
                        trace: helpers.take_trace(),
                    });
                }
                Err(error) => {
                    let Some(name) = undefined_lookup(&error) else {
                        return Err(parse_tera_error(&error, template, &context, bindings.recipe));
                    };
                    if iterated.contains(&name) && !base.contains_key(&name) && !sentinels.contains_key(&name) {
                        // Loops over unbound names iterate nothing
                        sentinels.insert(name.clone(), serde_json::Value::Array(Vec::new()));
                    } else if undefined.contains(&name) || !bind_sentinel(&mut sentinels, &base, &name) {
                        return Err(variable_not_found(&error, &name, template, &context, bindings.recipe));
                    }
                    trace!("Bound undefined '{name}' to its sentinel");
                    undefined.insert(name);
                }
            }
        }

        Err(TemplateError::EvaluationError {
            message: format!("too many undefined names (more than {MAX_UNDEFINED_RETRIES})"),
            location: Box::new(build_error_location(bindings.recipe, None, None)),
        })
    }
}

/// Names iterated by `{% for ... in name %}`.
fn iterated_names(template: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for region in template_regions(template) {
        if region.kind != RegionKind::Statement {
            continue;
        }
        let tokens = lex(&template[region.start..region.end]);
        if tokens.first().is_none_or(|t| t.text != "for") {
            continue;
        }
        if let Some(pos) = tokens.iter().position(|t| t.kind == TokenKind::Ident && t.text == "in") {
            if let [target] = &tokens[pos + 1..] {
                if target.kind == TokenKind::Ident {
                    names.insert(target.text.to_string());
                }
            }
        }
    }
    names
}

fn base_context(bindings: &TemplateBindings<'_>) -> TeraContext {
    let mut context = TeraContext::new();
    for (name, value) in bindings.namespace.flags() {
        match value {
            SelectorValue::Bool(b) => context.insert(name, b),
            SelectorValue::Int(i) => context.insert(name, i),
            SelectorValue::Str(s) => context.insert(name, s),
            SelectorValue::Undefined => {}
        }
    }
    for (name, value) in bindings.variant.iter() {
        context.insert(name.as_str(), &value.to_json());
    }
    if !context.contains_key("environ") {
        context.insert("environ", &serde_json::Map::new());
    }
    context
}

/// Bind `name` (possibly dotted) to its sentinel. Fails when the root is a real value.
fn bind_sentinel(sentinels: &mut serde_json::Map<String, serde_json::Value>, base: &TeraContext, name: &str) -> bool {
    if name.contains('[') {
        return false;
    }
    let mut parts = name.split('.');
    let Some(root) = parts.next() else {
        return false;
    };
    if base.contains_key(root) {
        return false;
    }
    let rest: Vec<&str> = parts.collect();
    let marker = serde_json::Value::String(sentinel(name));

    if rest.is_empty() {
        if sentinels.contains_key(root) {
            return false;
        }
        sentinels.insert(root.to_string(), marker);
        return true;
    }

    let mut slot = sentinels.entry(root.to_string()).or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    for (idx, part) in rest.iter().enumerate() {
        let serde_json::Value::Object(map) = slot else {
            return false;
        };
        if idx + 1 == rest.len() {
            if map.contains_key(*part) {
                return false;
            }
            map.insert((*part).to_string(), marker);
            return true;
        }
        slot = map.entry((*part).to_string()).or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    false
}

/// Every message in a Tera error chain.
fn error_chain(error: &tera::Error) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(err) = current {
        messages.push(err.to_string());
        current = err.source();
    }
    messages
}

fn undefined_lookup(error: &tera::Error) -> Option<String> {
    error_chain(error)
        .iter()
        .find_map(|msg| VARIABLE_NOT_FOUND.captures(msg).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

/// Parse a Tera error into a structured TemplateError
fn parse_tera_error(error: &tera::Error, template: &str, context: &TeraContext, recipe: &RecipeInfo) -> TemplateError {
    let line_number = extract_line_from_tera_error(error);
    let context_lines = line_number.map(|line| extract_context_lines(template, line, 3)).filter(|l| !l.is_empty());
    let location = Box::new(build_error_location(recipe, line_number, context_lines));
    let chain = error_chain(error);

    if let Some(name) = chain.iter().find_map(|m| FUNCTION_NOT_FOUND.captures(m).and_then(|c| c.get(1))) {
        return TemplateError::UnknownFunction {
            name: name.as_str().to_string(),
            location,
        };
    }
    if let Some(helper) = chain.iter().find_map(|m| FUNCTION_FAILED.captures(m).and_then(|c| c.get(1))) {
        return TemplateError::HelperFailed {
            helper: helper.as_str().to_string(),
            message: chain.last().cloned().unwrap_or_default(),
            location,
        };
    }
    if let Some(name) = undefined_lookup(error) {
        return variable_not_found(error, &name, template, context, recipe);
    }

    // Tera reports parse failures with `Failed to parse` and evaluation failures
    // with `Failed to render`
    if chain.first().is_some_and(|msg| msg.starts_with("Failed to render")) {
        return TemplateError::EvaluationError {
            message: chain.last().cloned().unwrap_or_default(),
            location,
        };
    }
    TemplateError::SyntaxError {
        message: format_tera_error(error),
        location,
    }
}

fn variable_not_found(
    error: &tera::Error,
    name: &str,
    template: &str,
    context: &TeraContext,
    recipe: &RecipeInfo,
) -> TemplateError {
    let line_number = extract_line_from_tera_error(error);
    let context_lines = line_number.map(|line| extract_context_lines(template, line, 3)).filter(|l| !l.is_empty());
    let available = available_variables(context);
    TemplateError::VariableNotFound {
        variable: name.to_string(),
        suggestions: find_similar_variables(name, &available),
        location: Box::new(build_error_location(recipe, line_number, context_lines)),
    }
}

fn available_variables(context: &TeraContext) -> Vec<String> {
    match context.clone().into_json() {
        serde_json::Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Find similar variable names using Levenshtein distance
fn find_similar_variables(target: &str, available: &[String]) -> Vec<String> {
    let mut scored: Vec<_> = available.iter().map(|var| (var.clone(), levenshtein(target, var))).collect();
    scored.sort_by_key(|(_, dist)| *dist);
    scored
        .into_iter()
        .filter(|(_, dist)| *dist <= target.len() * SIMILARITY_THRESHOLD_PERCENT / 100)
        .take(3)
        .map(|(var, _)| var)
        .collect()
}

/// Up to `context_size` lines around `error_line` (1-indexed) with their numbers.
fn extract_context_lines(content: &str, error_line: usize, context_size: usize) -> Vec<(usize, String)> {
    let lines: Vec<&str> = content.lines().collect();
    if error_line == 0 || error_line > lines.len() {
        return Vec::new();
    }
    let start = error_line.saturating_sub(context_size + 1);
    let end = (error_line + context_size).min(lines.len());
    lines[start..end].iter().enumerate().map(|(idx, line)| (start + idx + 1, (*line).to_string())).collect()
}

/// Tera parse errors carry `line:column`.
fn extract_line_from_tera_error(error: &tera::Error) -> Option<usize> {
    let message = format!("{error:?}");
    LINE_COLUMN.captures(&message).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok())
}

fn build_error_location(
    recipe: &RecipeInfo,
    line_number: Option<usize>,
    context_lines: Option<Vec<(usize, String)>>,
) -> ErrorLocation {
    ErrorLocation {
        recipe: recipe.name.clone(),
        file_path: recipe.path.clone(),
        line_number,
        context_lines,
    }
}

/// Format a Tera error chain without Tera's internal template name.
pub fn format_tera_error(error: &tera::Error) -> String {
    let messages: Vec<String> = error_chain(error)
        .into_iter()
        .map(|msg| {
            msg.replace("while rendering '__tera_one_off'", "")
                .replace("Failed to render '__tera_one_off'", "Template rendering failed")
                .replace("Failed to parse '__tera_one_off'", "Template syntax error")
                .replace("'__tera_one_off'", "template")
                .trim()
                .to_string()
        })
        .filter(|msg| !msg.is_empty() && msg != "Template rendering failed" && msg != "Template syntax error")
        .collect();

    if messages.is_empty() {
        "Template syntax error (see details above)".to_string()
    } else {
        messages.join("\n  → ")
    }
}

/// A rendered recipe document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    /// The parsed document; always a mapping
    pub document: Value,
    /// Rendered text after selectors were applied
    pub text: String,
    /// Names bound to the undefined sentinel during this render
    pub undefined: BTreeSet<String>,
    pub needs_download: bool,
    pub needs_reparse: bool,
}

/// The outcome of rendering one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Every referenced name was bound
    Complete(RenderedDocument),
    /// Some names were unbound; the document contains their sentinels
    NeedsMoreVariables {
        names: BTreeSet<String>,
        partial: RenderedDocument,
    },
}

impl RenderOutcome {
    pub fn document(&self) -> &RenderedDocument {
        match self {
            Self::Complete(doc)
            | Self::NeedsMoreVariables {
                partial: doc,
                ..
            } => doc,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Renders one recipe template under any number of variants.
///
/// The renderer holds no per-variant state, so one instance can be shared by
/// parallel renders.
#[derive(Clone)]
pub struct VariantRenderer {
    engine: Arc<dyn TemplateEngine>,
    template: String,
    recipe: RecipeInfo,
    target_platform: String,
}

impl std::fmt::Debug for VariantRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantRenderer")
            .field("recipe", &self.recipe)
            .field("target_platform", &self.target_platform)
            .finish_non_exhaustive()
    }
}

impl VariantRenderer {
    /// Create a renderer for `template` using the Tera engine.
    pub fn new(recipe: RecipeInfo, template: &str, target_platform: impl Into<String>) -> Self {
        Self::with_engine(Arc::new(TeraEngine), recipe, template, target_platform)
    }

    pub fn with_engine(
        engine: Arc<dyn TemplateEngine>,
        recipe: RecipeInfo,
        template: &str,
        target_platform: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            template: normalize_template(template),
            recipe,
            target_platform: target_platform.into(),
        }
    }

    /// Render the template under one variant.
    ///
    /// # Errors
    ///
    /// Template syntax errors, unknown functions, failing helpers, invalid
    /// selectors and YAML that does not parse are fatal.
    pub fn render(&self, variant: &Variant) -> Result<RenderOutcome, VariaError> {
        let mut bound = variant.clone();
        if !bound.contains("target_platform") {
            bound.insert("target_platform", self.target_platform.as_str().into());
        }
        let namespace = Namespace::for_variant(&bound);

        let mut subpackages = BTreeMap::new();
        let mut rendered = self.render_pass(&bound, &namespace, &subpackages)?;

        if !rendered.0.trace.missed_subpackages.is_empty() {
            subpackages = package_versions(&rendered.1);
            if rendered.0.trace.missed_subpackages.iter().any(|name| subpackages.contains_key(name)) {
                debug!("Re-rendering {} with {} known subpackage version(s)", self.recipe.name, subpackages.len());
                rendered = self.render_pass(&bound, &namespace, &subpackages)?;
            }
        }

        let (text_render, document, text) = (rendered.0, rendered.1, rendered.2);
        let doc = RenderedDocument {
            document,
            text,
            undefined: text_render.undefined.clone(),
            needs_download: text_render.trace.needs_download,
            needs_reparse: text_render.trace.needs_reparse || !text_render.trace.missed_subpackages.is_empty(),
        };

        if text_render.undefined.is_empty() {
            Ok(RenderOutcome::Complete(doc))
        } else {
            Ok(RenderOutcome::NeedsMoreVariables {
                names: text_render.undefined,
                partial: doc,
            })
        }
    }

    fn render_pass(
        &self,
        bound: &Variant,
        namespace: &Namespace,
        subpackages: &BTreeMap<String, String>,
    ) -> Result<(TextRender, Value, String), VariaError> {
        let bindings = TemplateBindings {
            variant: bound,
            namespace,
            target_platform: &self.target_platform,
            subpackages,
            recipe: &self.recipe,
        };
        let text_render = self.engine.render_text(&self.template, &bindings)?;
        let selected = select_lines(&text_render.text, namespace)?;
        let prepared = stringify_scalars(&selected)?;
        let document: Value = serde_yaml::from_str(&prepared).map_err(|e| VariaError::RecipeParseError {
            recipe: self.recipe.name.clone(),
            reason: e.to_string(),
        })?;
        let document = match document {
            Value::Null => Value::Mapping(Default::default()),
            Value::Mapping(map) => Value::Mapping(map),
            _ => {
                return Err(VariaError::RecipeParseError {
                    recipe: self.recipe.name.clone(),
                    reason: "the recipe must be a mapping".to_string(),
                });
            }
        };
        Ok((text_render, document, selected))
    }
}

/// `name → version` of the top-level package and every named output.
pub fn package_versions(document: &Value) -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    let top_version = document["package"]["version"].as_str().map(str::to_string);
    if let (Some(name), Some(version)) = (document["package"]["name"].as_str(), &top_version) {
        versions.insert(name.to_string(), version.clone());
    }
    if let Value::Sequence(outputs) = &document["outputs"] {
        for output in outputs {
            let Some(name) = output["name"].as_str() else {
                continue;
            };
            if let Some(version) = output["version"].as_str().map(str::to_string).or_else(|| top_version.clone()) {
                versions.insert(name.to_string(), version);
            }
        }
    }
    versions
}
