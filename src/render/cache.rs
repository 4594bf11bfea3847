//! Render cache for one recipe render.
//!
//! The orchestrator renders the same variant several times: once while the
//! whole recipe converges, again for the top-level scope and for each output.
//! The cache keeps one outcome per variant so each is rendered once. It lives for
//! a single [`super::render_recipe`] call and is dropped with it.

use std::collections::HashMap;

use crate::core::VariaError;
use crate::templating::RenderOutcome;
use crate::variants::Variant;

/// Outcome of rendering one variant, failures included.
pub(crate) type CachedRender = Result<RenderOutcome, VariaError>;

#[derive(Debug, Default)]
pub(crate) struct RenderCache {
    cache: HashMap<Variant, CachedRender>,
    hits: usize,
    misses: usize,
}

impl RenderCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&mut self, variant: &Variant) -> Option<CachedRender> {
        if let Some(outcome) = self.cache.get(variant) {
            self.hits += 1;
            Some(outcome.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    pub(crate) fn insert(&mut self, variant: Variant, outcome: CachedRender) {
        self.cache.insert(variant, outcome);
    }

    /// `(hits, misses)`
    pub(crate) fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// Hit rate as a percentage.
    pub(crate) fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { (self.hits as f64 / total as f64) * 100.0 }
    }
}
