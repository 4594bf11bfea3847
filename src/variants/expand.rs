//! Cartesian expansion of a specification over a used-variable set.
//!
//! Only variables in the used set become axes. A zip group forms a single axis
//! whose positions advance together, placed where its first member was declared.
//! The last axis varies fastest, so the output order is a pure function of
//! declaration order. Candidates whose predicate rejects the assignment are
//! dropped, and duplicates left after restricting to the used set are removed.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::types::{CandidateValue, UsedVariableSet, Variant, VariantSpec};
use crate::selectors::Namespace;

/// One position on an axis: the values it assigns.
type Position<'a> = Vec<(&'a str, &'a CandidateValue)>;

/// Expand `spec` over `used`, in deterministic order.
///
/// Returns one empty variant when nothing is used, and an empty list when every
/// combination is rejected by applicability predicates.
pub fn expand_variants(spec: &VariantSpec, used: &UsedVariableSet) -> Vec<Variant> {
    let axes = build_axes(spec, used);
    let total: usize = axes.iter().map(Vec::len).product();
    debug!("Expanding {} axis(es) into at most {total} combination(s)", axes.len());

    let mut seen = BTreeSet::new();
    let mut variants = Vec::new();
    let mut cursor = vec![0usize; axes.len()];

    if axes.iter().any(Vec::is_empty) {
        return variants;
    }

    loop {
        let mut full = Variant::new();
        let mut candidates = Vec::new();
        for (axis, &pos) in axes.iter().zip(&cursor) {
            for (name, candidate) in &axis[pos] {
                full.insert(*name, candidate.value.clone());
                candidates.push(*candidate);
            }
        }

        let ns = Namespace::for_variant(&full);
        if candidates.iter().all(|c| c.applies(&ns)) {
            let variant = full.restrict(used);
            if seen.insert(variant.clone()) {
                variants.push(variant);
            }
        } else {
            trace!("Rejected combination {full}");
        }

        if !advance(&mut cursor, &axes) {
            break;
        }
    }

    debug!("Expansion produced {} variant(s)", variants.len());
    variants
}

fn build_axes<'a>(spec: &'a VariantSpec, used: &UsedVariableSet) -> Vec<Vec<Position<'a>>> {
    let mut axes = Vec::new();
    let mut placed_groups = BTreeSet::new();

    for var in spec.variables() {
        if !used.contains(&var.name) {
            continue;
        }
        match var.zip_group {
            Some(idx) => {
                if !placed_groups.insert(idx) {
                    continue;
                }
                let members: Vec<_> =
                    spec.zip_groups()[idx].iter().filter_map(|name| spec.get(name)).collect();
                let len = members.iter().map(|m| m.len()).min().unwrap_or(0);
                let axis = (0..len)
                    .map(|pos| members.iter().map(|m| (m.name.as_str(), &m.values[pos])).collect())
                    .collect();
                axes.push(axis);
            }
            None => {
                axes.push(var.values.iter().map(|c| vec![(var.name.as_str(), c)]).collect());
            }
        }
    }
    axes
}

/// Odometer increment with the last axis fastest. Returns false once exhausted.
fn advance(cursor: &mut [usize], axes: &[Vec<Position<'_>>]) -> bool {
    for idx in (0..cursor.len()).rev() {
        cursor[idx] += 1;
        if cursor[idx] < axes[idx].len() {
            return true;
        }
        cursor[idx] = 0;
    }
    false
}
