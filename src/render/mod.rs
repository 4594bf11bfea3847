//! Render orchestration.
//!
//! [`render_recipe`] drives the fixed-point loop that turns one recipe and one
//! combined specification into the list of distinct rendered metadata:
//!
//! 1. **Seed**: the used set starts empty, so the first render binds nothing
//! 2. **Analyze**: usage is collected from the scope text and from every rendered
//!    variant's document; the union is closed over predicate dependencies
//! 3. **Transition**: a grown set is re-expanded and every variant re-rendered;
//!    an unchanged set is the fixed point
//! 4. **Finalize**: one metadata per converged variant and per output, each output
//!    converging on its own subset of the recipe's variables
//! 5. **Dedupe**: metadata sharing an identity collapse to the first one
//!
//! The loop runs per scope. The whole recipe converges over every specification
//! variable; its result is the universe for the top-level part and for each
//! output, which start from an empty set again. An output therefore never
//! enumerates axes it does not read.
//!
//! Variants of one iteration and the outputs of one recipe are rendered in
//! parallel when [`RenderOptions::parallel`] is set. Results are gathered in
//! input order, so parallel and serial renders emit the same list.

mod cache;
pub mod recipe;

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use serde_yaml::Value;
use tracing::{debug, info, trace, warn};

use crate::core::VariaError;
use crate::metadata::outputs::{RecipeSections, find_output, output_document, output_name, rendered_outputs, without_outputs};
use crate::metadata::{DEFAULT_HASH_LENGTH, OutputDescriptor, RenderedMetadata, loop_vars};
use crate::templating::{RenderOutcome, VariantRenderer};
use crate::usage::{UsageAnalyzer, script_usage};
use crate::variants::{UsedVariableSet, Variant, VariantSpec, expand_variants};

use cache::{CachedRender, RenderCache};
pub use recipe::{RECIPE_CONFIG_FILE, RECIPE_FILES, RecipeSource, locate_recipe};

/// Cancellation flag shared between a render and its caller.
///
/// The orchestrator checks it between fixed-point iterations and before
/// emitting; an aborted render returns [`VariaError::Aborted`] and no metadata.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Behaviour switches of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Drop failing variants with a warning instead of failing the render
    pub best_effort: bool,
    /// Render variants and outputs on the rayon thread pool
    pub parallel: bool,
    /// Hex digits kept from the variant hash
    pub hash_length: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            best_effort: false,
            parallel: true,
            hash_length: DEFAULT_HASH_LENGTH,
        }
    }
}

/// Everything one render needs. Built fresh per call; nothing is shared between renders.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub recipe: RecipeSource,
    pub spec: VariantSpec,
    pub target_platform: String,
    pub options: RenderOptions,
    pub abort: AbortSignal,
}

impl RenderContext {
    pub fn new(recipe: RecipeSource, spec: VariantSpec, target_platform: impl Into<String>) -> Self {
        Self {
            recipe,
            spec,
            target_platform: target_platform.into(),
            options: RenderOptions::default(),
            abort: AbortSignal::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

/// The result of a successful render.
#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    /// One metadata per distinct identity: the top-level recipe first, then each output
    pub metadata: Vec<RenderedMetadata>,
    /// Variants dropped in best-effort mode
    pub warnings: Vec<String>,
    /// Variables used anywhere in the recipe
    pub used_vars: UsedVariableSet,
    /// Fixed-point iterations over all scopes
    pub iterations: usize,
}

impl RenderReport {
    /// `(metadata, needs_download, needs_reparse)` for the build driver.
    pub fn entries(&self) -> impl Iterator<Item = (&RenderedMetadata, bool, bool)> {
        self.metadata.iter().map(|m| (m, m.needs_download(), m.needs_reparse()))
    }

    /// Used variables whose value differs across the emitted metadata.
    pub fn loop_vars(&self) -> UsedVariableSet {
        loop_vars(&self.metadata)
    }
}

/// Render a recipe under every variant it uses.
///
/// # Errors
///
/// Configuration, template and usage errors abort the render; in best-effort
/// mode a failing variant is dropped instead, and the render fails only when
/// nothing survives. [`VariaError::Unsatisfiable`] is returned when predicates
/// reject every variant, [`VariaError::UnresolvedVariable`] when a reference
/// stays unbound after convergence, [`VariaError::IdentityConflict`] when two
/// metadata share an identity but differ in content, and
/// [`VariaError::Aborted`] when the abort signal was raised.
pub fn render_recipe(ctx: &RenderContext) -> Result<RenderReport, VariaError> {
    let renderer = VariantRenderer::new(ctx.recipe.info.clone(), &ctx.recipe.template, ctx.target_platform.as_str());
    render_with(ctx, renderer)
}

/// Render with a specific [`VariantRenderer`], e.g. one built on another
/// [`TemplateEngine`](crate::templating::TemplateEngine).
///
/// # Errors
///
/// See [`render_recipe`].
pub fn render_with(ctx: &RenderContext, renderer: VariantRenderer) -> Result<RenderReport, VariaError> {
    let orchestrator = Orchestrator::new(ctx, renderer);
    let report = orchestrator.run();
    let (hits, misses, rate) = orchestrator.cache_stats();
    debug!("Render cache for {}: {hits} hit(s), {misses} miss(es), {rate:.1}% hit rate", ctx.recipe.name());
    report
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeKind {
    Recipe,
    TopLevel,
    Output {
        name: Option<String>,
        index: usize,
    },
}

/// A part of the recipe with its own used-variable set.
#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    label: String,
    text: String,
}

impl Scope {
    fn recipe(text: &str) -> Self {
        Self {
            kind: ScopeKind::Recipe,
            label: "recipe".to_string(),
            text: text.to_string(),
        }
    }

    fn top_level(text: &str) -> Self {
        Self {
            kind: ScopeKind::TopLevel,
            label: "top-level".to_string(),
            text: text.to_string(),
        }
    }

    fn output(name: Option<String>, index: usize, text: &str) -> Self {
        let label = match &name {
            Some(name) if index == 0 => format!("output '{name}'"),
            Some(name) => format!("output '{name}' #{index}"),
            None => format!("output #{index}"),
        };
        Self {
            kind: ScopeKind::Output {
                name,
                index,
            },
            label,
            text: text.to_string(),
        }
    }

    /// The part of a rendered recipe this scope owns; `None` when an output is absent.
    fn document(&self, rendered: &Value) -> Option<Value> {
        match &self.kind {
            ScopeKind::Recipe => Some(rendered.clone()),
            ScopeKind::TopLevel => Some(without_outputs(rendered)),
            ScopeKind::Output {
                name,
                index,
            } => find_output(rendered, name.as_deref(), *index).map(|output| output_document(rendered, output)),
        }
    }
}

/// A scope at its fixed point.
#[derive(Debug)]
struct Converged {
    used: UsedVariableSet,
    /// Variants of the final iteration that rendered, in expansion order
    renders: Vec<(Variant, RenderOutcome)>,
    warnings: Vec<String>,
    iterations: usize,
}

struct Orchestrator<'a> {
    ctx: &'a RenderContext,
    renderer: VariantRenderer,
    cache: Mutex<RenderCache>,
}

impl<'a> Orchestrator<'a> {
    fn new(ctx: &'a RenderContext, renderer: VariantRenderer) -> Self {
        Self {
            ctx,
            renderer,
            cache: Mutex::new(RenderCache::new()),
        }
    }

    fn recipe_name(&self) -> &str {
        self.ctx.recipe.name()
    }

    /// `(hits, misses, hit rate in percent)`
    fn cache_stats(&self) -> (usize, usize, f64) {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let (hits, misses) = cache.stats();
        (hits, misses, cache.hit_rate())
    }

    fn check_abort(&self) -> Result<(), VariaError> {
        if self.ctx.abort.is_aborted() {
            info!("Render of {} aborted", self.recipe_name());
            return Err(VariaError::Aborted);
        }
        Ok(())
    }

    fn run(&self) -> Result<RenderReport, VariaError> {
        let ctx = self.ctx;
        let sections = RecipeSections::split(&ctx.recipe.template);
        let universe = ctx.spec.key_set();
        let whole = Scope::recipe(&ctx.recipe.template);

        let mut spec = Cow::Borrowed(&ctx.spec);
        let mut recipe = self.converge(&whole, &spec, &universe, &[])?;
        if is_noarch_python(&recipe) && spec.get("python").is_some_and(|python| python.len() > 1) {
            info!("{} is noarch python; conforming python to its first value", self.recipe_name());
            spec = Cow::Owned(spec.conform_to_first("python"));
            recipe = self.converge(&whole, &spec, &universe, &[])?;
        }
        let parent_used = recipe.used.clone();
        debug!("{} uses {:?}", self.recipe_name(), parent_used);
        let base: Vec<Variant> = recipe.renders.iter().map(|(variant, _)| variant.clone()).collect();

        let top_scope = Scope::top_level(&sections.top);
        let top = self.converge(&top_scope, &spec, &parent_used, &base)?;

        let output_scopes = discover_outputs(&sections, &recipe);
        let outputs: Vec<Converged> = self
            .map_ordered(&output_scopes, |scope| self.converge(scope, &spec, &parent_used, &base))
            .into_iter()
            .collect::<Result<_, _>>()?;

        self.check_abort()?;

        let mut warnings = Vec::new();
        let mut first_error = None;
        for converged in std::iter::once(&recipe).chain(std::iter::once(&top)).chain(&outputs) {
            for warning in &converged.warnings {
                if !warnings.contains(warning) {
                    warnings.push(warning.clone());
                }
            }
        }

        let mut output_metadata = Vec::with_capacity(outputs.len());
        for (scope, converged) in output_scopes.iter().zip(&outputs) {
            let emitted = self.emit(scope, converged, &spec, &mut warnings, &mut first_error)?;
            output_metadata.push(emitted);
        }

        let output_names: BTreeSet<&str> = output_scopes
            .iter()
            .filter_map(|scope| match &scope.kind {
                ScopeKind::Output {
                    name: Some(name),
                    ..
                } => Some(name.as_str()),
                _ => None,
            })
            .collect();

        let mut candidates = Vec::new();
        for meta in self.emit(&top_scope, &top, &spec, &mut warnings, &mut first_error)? {
            if sections.has_outputs() && (meta.name().is_empty() || output_names.contains(meta.name())) {
                trace!("Top-level {} is represented by its outputs", meta.name());
                continue;
            }
            let descriptors = describe_outputs(&meta, &output_scopes, &outputs, &output_metadata);
            candidates.push(meta.with_outputs(descriptors));
        }
        candidates.extend(output_metadata.into_iter().flatten());

        self.check_abort()?;

        if candidates.is_empty() {
            return Err(first_error.unwrap_or_else(|| VariaError::Unsatisfiable {
                recipe: self.recipe_name().to_string(),
                scope: "recipe".to_string(),
                details: "no variant produced metadata".to_string(),
            }));
        }

        let metadata = self.dedupe(candidates)?;
        let iterations = recipe.iterations + top.iterations + outputs.iter().map(|o| o.iterations).sum::<usize>();
        info!("Rendered {} metadata for {} in {iterations} iteration(s)", metadata.len(), self.recipe_name());

        Ok(RenderReport {
            metadata,
            warnings,
            used_vars: parent_used,
            iterations,
        })
    }

    /// Grow the used set of one scope until it stops changing.
    ///
    /// A scope still renders the whole recipe, so each of its variants is laid
    /// over the first agreeing variant of `base`. Variables read only elsewhere in
    /// the recipe are then bound to real values instead of sentinels.
    fn converge(
        &self,
        scope: &Scope,
        spec: &VariantSpec,
        universe: &UsedVariableSet,
        base: &[Variant],
    ) -> Result<Converged, VariaError> {
        let analyzer = UsageAnalyzer::new(spec, self.recipe_name(), &self.ctx.target_platform);
        let mut text_used = analyzer.text_usage(&scope.text, universe)?;
        if !matches!(scope.kind, ScopeKind::Output { .. }) {
            if let Some(script) = self.ctx.recipe.build_script(&self.ctx.target_platform) {
                text_used.extend(script_usage(script, universe, self.windows()));
            }
        }

        let mut used = UsedVariableSet::new();
        let mut warnings = Vec::new();
        let limit = universe.len() + 1;

        for iteration in 1..=limit {
            self.check_abort()?;

            let variants = expand_variants(spec, &used);
            if variants.is_empty() {
                return Err(VariaError::Unsatisfiable {
                    recipe: self.recipe_name().to_string(),
                    scope: scope.label.clone(),
                    details: format!(
                        "no combination of [{}] satisfies the value predicates",
                        used.iter().cloned().collect::<Vec<_>>().join(", ")
                    ),
                });
            }

            // Until every variable the text names is bound, failures may be caused
            // by sentinels and do not count.
            let settled = text_used.is_subset(&used);
            let outcomes = self.map_ordered(&variants, |variant| self.render(&bind_over(variant, base)));

            let mut discovered = text_used.clone();
            let mut renders = Vec::with_capacity(variants.len());
            let mut first_error = None;
            for (variant, outcome) in variants.into_iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) => {
                        let rendered = outcome.document();
                        if let Some(document) = scope.document(&rendered.document) {
                            discovered.extend(analyzer.document_usage(&document, universe));
                            discovered.extend(self.document_script_usage(&document, universe));
                        }
                        discovered.extend(analyzer.lookup_usage(&rendered.undefined, &scope.text, universe));
                        renders.push((variant, outcome));
                    }
                    Err(err) if !settled => {
                        trace!("Ignoring failure of {variant} in {} before settling: {err}", scope.label);
                    }
                    Err(err) if self.ctx.options.best_effort => {
                        let warning = format!("Dropped variant {variant} of {} in {}: {err}", scope.label, self.recipe_name());
                        warn!("{warning}");
                        if !warnings.contains(&warning) {
                            warnings.push(warning);
                        }
                        first_error.get_or_insert(err);
                    }
                    Err(err) => return Err(err),
                }
            }

            let next = spec.close_over_dependencies(&used.union(&discovered).cloned().collect());
            debug!("{} of {}: iteration {iteration} uses {:?}", scope.label, self.recipe_name(), next);

            if next == used {
                if renders.is_empty() {
                    return Err(first_error.unwrap_or_else(|| VariaError::Unsatisfiable {
                        recipe: self.recipe_name().to_string(),
                        scope: scope.label.clone(),
                        details: "every variant failed to render".to_string(),
                    }));
                }
                return Ok(Converged {
                    used,
                    renders,
                    warnings,
                    iterations: iteration,
                });
            }
            used = next;
        }

        Err(VariaError::NoConvergence {
            recipe: self.recipe_name().to_string(),
            scope: scope.label.clone(),
            iterations: limit,
        })
    }

    /// Metadata for each converged variant of a scope.
    fn emit(
        &self,
        scope: &Scope,
        converged: &Converged,
        spec: &VariantSpec,
        warnings: &mut Vec<String>,
        first_error: &mut Option<VariaError>,
    ) -> Result<Vec<RenderedMetadata>, VariaError> {
        let analyzer = UsageAnalyzer::new(spec, self.recipe_name(), &self.ctx.target_platform);
        let mut emitted = Vec::new();

        for (variant, outcome) in &converged.renders {
            let rendered = outcome.document();
            let Some(document) = scope.document(&rendered.document) else {
                trace!("{} is absent under {variant}", scope.label);
                continue;
            };

            let unresolved = analyzer.unresolved_names(&scope.text, &document, &rendered.undefined);
            if !unresolved.is_empty() {
                let err = VariaError::UnresolvedVariable {
                    recipe: self.recipe_name().to_string(),
                    scope: scope.label.clone(),
                    variables: unresolved,
                };
                if !self.ctx.options.best_effort {
                    return Err(err);
                }
                let warning = format!("Dropped variant {variant} of {} in {}: {err}", scope.label, self.recipe_name());
                warn!("{warning}");
                warnings.push(warning);
                first_error.get_or_insert(err);
                continue;
            }

            let meta = RenderedMetadata::assemble(
                document,
                variant.clone(),
                converged.used.clone(),
                self.ctx.options.hash_length,
            )
            .with_flags(rendered.needs_download, rendered.needs_reparse)
            .finalize(spec);
            emitted.push(meta);
        }
        Ok(emitted)
    }

    /// Keep the first metadata of each identity.
    fn dedupe(&self, candidates: Vec<RenderedMetadata>) -> Result<Vec<RenderedMetadata>, VariaError> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<RenderedMetadata> = Vec::new();
        for meta in candidates {
            let identity = meta.identity();
            match positions.get(&identity) {
                Some(&pos) if kept[pos].document() != meta.document() => {
                    return Err(VariaError::IdentityConflict {
                        identity,
                        recipe: self.recipe_name().to_string(),
                    });
                }
                Some(_) => trace!("Dropping duplicate {identity}"),
                None => {
                    positions.insert(identity, kept.len());
                    kept.push(meta);
                }
            }
        }
        Ok(kept)
    }

    fn render(&self, variant: &Variant) -> CachedRender {
        if let Some(hit) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(variant) {
            return hit;
        }
        let outcome = self.renderer.render(variant);
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).insert(variant.clone(), outcome.clone());
        outcome
    }

    fn map_ordered<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.ctx.options.parallel && items.len() > 1 {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }

    fn windows(&self) -> bool {
        self.ctx.target_platform.starts_with("win")
    }

    /// Usage from `build/script`: a script file next to the recipe, or inline commands.
    fn document_script_usage(&self, document: &Value, universe: &UsedVariableSet) -> UsedVariableSet {
        let scripts: Vec<&str> = match &document["build"]["script"] {
            Value::String(script) => vec![script.as_str()],
            Value::Sequence(lines) => lines.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        scripts
            .into_iter()
            .flat_map(|script| {
                let text = self.ctx.recipe.scripts.get(script.trim()).map_or(script, String::as_str);
                script_usage(text, universe, self.windows())
            })
            .collect()
    }
}

/// `variant` laid over the first base variant it agrees with; itself when none does.
fn bind_over(variant: &Variant, base: &[Variant]) -> Variant {
    base.iter()
        .find(|candidate| variant.agrees_with(candidate))
        .map_or_else(|| variant.clone(), |candidate| variant.overlay_on(candidate))
}

/// Whether any converged render declares `noarch: python`.
fn is_noarch_python(converged: &Converged) -> bool {
    converged.renders.iter().any(|(_, outcome)| {
        let build = &outcome.document().document["build"];
        build["noarch"].as_str() == Some("python")
            || build["noarch_python"].as_str().is_some_and(|flag| flag.eq_ignore_ascii_case("true"))
    })
}

/// Output scopes in first-seen order across the recipe's converged renders.
///
/// Named outputs are keyed by name and occurrence, unnamed ones by position.
fn discover_outputs(sections: &RecipeSections, recipe: &Converged) -> Vec<Scope> {
    let mut seen: Vec<(Option<String>, usize)> = Vec::new();
    let mut scopes = Vec::new();
    for (_, outcome) in &recipe.renders {
        let outputs = rendered_outputs(&outcome.document().document);
        let count = outputs.len();
        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for (position, output) in outputs.into_iter().enumerate() {
            let name = output_name(output);
            let index = match name {
                Some(name) => {
                    let occurrence = occurrences.entry(name).or_insert(0);
                    *occurrence += 1;
                    *occurrence - 1
                }
                None => position,
            };
            let key = (name.map(str::to_string), index);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            let text = sections.output_text(position, name, count);
            scopes.push(Scope::output(name.map(str::to_string), index, text));
        }
    }
    scopes
}

/// Descriptors of the outputs emitted alongside a top-level metadata.
///
/// Each output contributes its first metadata whose variant agrees with the
/// parent's on every shared variable.
fn describe_outputs(
    parent: &RenderedMetadata,
    scopes: &[Scope],
    converged: &[Converged],
    emitted: &[Vec<RenderedMetadata>],
) -> Vec<OutputDescriptor> {
    let compatible = |output: &RenderedMetadata| {
        output.variant().iter().all(|(name, value)| parent.variant().get(name).is_none_or(|v| v == value))
    };
    scopes
        .iter()
        .zip(converged)
        .zip(emitted)
        .filter_map(|((scope, converged), metas)| {
            let meta = metas.iter().find(|m| compatible(m))?;
            Some(OutputDescriptor {
                name: match &scope.kind {
                    ScopeKind::Output {
                        name: Some(name),
                        ..
                    } => name.clone(),
                    _ => meta.name().to_string(),
                },
                identity: meta.identity(),
                document: meta.document().clone(),
                used_vars: converged.used.clone(),
            })
        })
        .collect()
}
