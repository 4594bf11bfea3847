//! Layered combination of variant specification sources.
//!
//! Sources are supplied lowest precedence first: built-in defaults, user and
//! working-directory config, recipe-local config, extra config files, and finally
//! command-line overrides. For ordinary keys the highest-precedence source that
//! declares a key replaces its whole value sequence. Keys listed in `extend_keys`
//! (by default `pin_run_as_build`, `ignore_version` and `ignore_build_only_deps`)
//! are merged instead: mappings are updated entry by entry and lists are unioned.
//!
//! A source that overrides only part of a zip group with a sequence of a different
//! length acts as a filter over the existing group: only the positions whose value
//! it lists survive, for every member of the group.
//!
//! Every problem found is collected and reported together in one
//! [`VariaError::VariantConfigError`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::types::{
    CandidateValue, ConfigVariable, DEFAULT_EXTEND_KEYS, SourceValue, SpecSource, VariableValue,
    VariantSpec,
};
use crate::core::{ConfigProblem, VariaError};

const ZIP_KEYS: &str = "zip_keys";
const EXTEND_KEYS: &str = "extend_keys";
const COMBINED_ORIGIN: &str = "combined specification";

/// Combine sources into one specification.
///
/// # Errors
///
/// Returns [`VariaError::VariantConfigError`] listing every invalid key, malformed
/// `zip_keys`, zip length mismatch and bad subspace filter.
pub fn combine_specs(sources: &[SpecSource]) -> Result<VariantSpec, VariaError> {
    let mut problems = Vec::new();

    let extend_keys = collect_extend_keys(sources);
    let zip_groups = collect_zip_groups(sources, &mut problems);

    for group in &zip_groups {
        for key in group {
            if extend_keys.contains(key) {
                problems.push(ConfigProblem::ZipAndExtend {
                    key: key.clone(),
                });
            }
        }
    }

    let mut variables: Vec<ConfigVariable> = Vec::new();
    let mut extended: BTreeMap<String, VariableValue> = BTreeMap::new();

    for source in sources {
        check_source_zip_lengths(source, &zip_groups, &mut problems);

        for (key, value) in &source.entries {
            if key == ZIP_KEYS || key == EXTEND_KEYS {
                continue;
            }
            if key.contains('-') {
                problems.push(ConfigProblem::InvalidKeyName {
                    origin: source.origin.clone(),
                    key: key.clone(),
                });
                continue;
            }

            if extend_keys.contains(key) {
                merge_extended(&mut extended, key, value, &source.origin, &mut problems);
                continue;
            }

            let candidates = match value {
                SourceValue::Candidates(values) if values.is_empty() => continue,
                SourceValue::Candidates(values) => values.clone(),
                SourceValue::Mapping(map) => vec![CandidateValue::new(VariableValue::Map(map.clone()))],
            };

            let group = zip_groups.iter().find(|g| g.contains(key));
            let partial_override = group.is_some_and(|g| g.iter().any(|member| source.get(member).is_none()));
            let existing_len = variables.iter().find(|v| &v.name == key).map(ConfigVariable::len);

            match (group, existing_len) {
                (Some(group), Some(len)) if partial_override && len != candidates.len() => {
                    apply_subspace_filter(&mut variables, group, key, &candidates, &source.origin, &mut problems);
                }
                _ => {
                    if let Some(existing) = variables.iter_mut().find(|v| &v.name == key) {
                        existing.values = candidates;
                        existing.origin = source.origin.clone();
                    } else {
                        variables.push(ConfigVariable::new(key.clone(), candidates, source.origin.clone()));
                    }
                }
            }
        }
    }

    for (idx, group) in zip_groups.iter().enumerate() {
        let mut lengths = Vec::new();
        for key in group {
            match variables.iter_mut().find(|v| &v.name == key) {
                Some(var) => {
                    var.zip_group = Some(idx);
                    lengths.push((key.clone(), var.len()));
                }
                None => problems.push(ConfigProblem::UndefinedZipKey {
                    group: group.clone(),
                    key: key.clone(),
                }),
            }
        }
        if lengths.windows(2).any(|w| w[0].1 != w[1].1) {
            problems.push(ConfigProblem::ZipLengthMismatch {
                origin: COMBINED_ORIGIN.to_string(),
                lengths,
            });
        }
    }

    if !problems.is_empty() {
        return Err(VariaError::VariantConfigError {
            problems,
        });
    }

    debug!(
        "Combined {} source(s) into {} variable(s), {} zip group(s), {} extend key(s)",
        sources.len(),
        variables.len(),
        zip_groups.len(),
        extended.len()
    );

    Ok(VariantSpec {
        variables,
        zip_groups,
        extended,
    })
}

/// Validate one source on its own.
pub fn validate_source(source: &SpecSource) -> Result<VariantSpec, VariaError> {
    combine_specs(std::slice::from_ref(source))
}

fn collect_extend_keys(sources: &[SpecSource]) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = DEFAULT_EXTEND_KEYS.iter().map(|k| (*k).to_string()).collect();
    for source in sources {
        if let Some(SourceValue::Candidates(values)) = source.get(EXTEND_KEYS) {
            keys.extend(values.iter().filter_map(|c| c.value.as_str()).map(str::to_string));
        }
    }
    keys
}

fn collect_zip_groups(sources: &[SpecSource], problems: &mut Vec<ConfigProblem>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    for source in sources {
        let Some(value) = source.get(ZIP_KEYS) else {
            continue;
        };
        match parse_zip_keys(value) {
            Ok(parsed) => {
                for group in parsed {
                    if !groups.contains(&group) {
                        groups.push(group);
                    }
                }
            }
            Err(reason) => problems.push(ConfigProblem::MalformedZipKeys {
                origin: source.origin.clone(),
                reason,
            }),
        }
    }

    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for group in &groups {
        for key in group {
            if !seen.insert(key.clone()) && reported.insert(key.clone()) {
                problems.push(ConfigProblem::KeyInMultipleZipGroups {
                    key: key.clone(),
                });
            }
        }
    }
    groups
}

/// `zip_keys` is either one group (a list of strings) or a list of groups.
fn parse_zip_keys(value: &SourceValue) -> Result<Vec<Vec<String>>, String> {
    let SourceValue::Candidates(items) = value else {
        return Err("expected a list".to_string());
    };
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let as_group = |value: &VariableValue| -> Result<Vec<String>, String> {
        match value {
            VariableValue::List(keys) => keys
                .iter()
                .map(|k| k.as_str().map(str::to_string).ok_or_else(|| "zip groups must contain strings".to_string()))
                .collect(),
            _ => Err("mixed strings and lists".to_string()),
        }
    };

    if items.iter().all(|c| c.value.as_str().is_some()) {
        let group: Vec<String> = items.iter().filter_map(|c| c.value.as_str()).map(str::to_string).collect();
        validate_group(&group)?;
        return Ok(vec![group]);
    }

    let mut groups = Vec::new();
    for item in items {
        let group = as_group(&item.value)?;
        validate_group(&group)?;
        groups.push(group);
    }
    Ok(groups)
}

fn validate_group(group: &[String]) -> Result<(), String> {
    if group.len() < 2 {
        return Err(format!("zip group [{}] needs at least two keys", group.join(", ")));
    }
    let unique: BTreeSet<&String> = group.iter().collect();
    if unique.len() != group.len() {
        return Err(format!("zip group [{}] repeats a key", group.join(", ")));
    }
    Ok(())
}

/// A source that defines a whole zip group must give every member the same length.
fn check_source_zip_lengths(source: &SpecSource, groups: &[Vec<String>], problems: &mut Vec<ConfigProblem>) {
    for group in groups {
        let lengths: Option<Vec<(String, usize)>> = group
            .iter()
            .map(|key| match source.get(key) {
                Some(SourceValue::Candidates(values)) => Some((key.clone(), values.len())),
                Some(SourceValue::Mapping(_)) => Some((key.clone(), 1)),
                None => None,
            })
            .collect();
        if let Some(lengths) = lengths {
            if lengths.windows(2).any(|w| w[0].1 != w[1].1) {
                problems.push(ConfigProblem::ZipLengthMismatch {
                    origin: source.origin.clone(),
                    lengths,
                });
            }
        }
    }
}

fn merge_extended(
    extended: &mut BTreeMap<String, VariableValue>,
    key: &str,
    value: &SourceValue,
    origin: &str,
    problems: &mut Vec<ConfigProblem>,
) {
    match (extended.get_mut(key), value) {
        (None, value) => {
            extended.insert(key.to_string(), value.to_value());
        }
        (Some(VariableValue::Map(existing)), SourceValue::Mapping(update)) => {
            for (k, v) in update {
                existing.insert(k.clone(), v.clone());
            }
        }
        (Some(VariableValue::List(existing)), SourceValue::Candidates(items)) => {
            for item in items {
                if !existing.contains(&item.value) {
                    existing.push(item.value.clone());
                }
            }
        }
        (Some(_), _) => problems.push(ConfigProblem::InvalidValue {
            origin: origin.to_string(),
            key: key.to_string(),
            reason: "cannot merge a list with a mapping".to_string(),
        }),
    }
}

fn apply_subspace_filter(
    variables: &mut [ConfigVariable],
    group: &[String],
    key: &str,
    wanted: &[CandidateValue],
    origin: &str,
    problems: &mut Vec<ConfigProblem>,
) {
    let Some(existing) = variables.iter().find(|v| v.name == key) else {
        return;
    };

    let mut positions = Vec::new();
    for candidate in wanted {
        match existing.values.iter().position(|c| c.value == candidate.value) {
            Some(pos) => positions.push(pos),
            None => problems.push(ConfigProblem::MissingSubspaceValue {
                origin: origin.to_string(),
                key: key.to_string(),
                value: candidate.value.to_string(),
            }),
        }
    }
    if positions.is_empty() {
        warn!("{origin}: subspace filter on '{key}' keeps no values");
    }

    debug!("{origin}: filtering zip group [{}] to positions {positions:?}", group.join(", "));
    for var in variables.iter_mut().filter(|v| group.contains(&v.name)) {
        var.values = positions.iter().filter_map(|&p| var.values.get(p).cloned()).collect();
        var.origin = origin.to_string();
    }
}
