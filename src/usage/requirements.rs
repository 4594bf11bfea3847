//! Bare requirement scanning.

use serde_yaml::Value;

use crate::metadata::pins::{bare_requirement, variable_name};
use crate::variants::UsedVariableSet;

/// Variables named by bare requirements of a document and of each of its outputs.
///
/// A requirement listed in `ignore_build_only` that appears only in the `build`
/// section does not count.
pub fn requirement_usage(document: &Value, universe: &UsedVariableSet, ignore_build_only: &[String]) -> UsedVariableSet {
    let mut used = UsedVariableSet::new();
    scan_requirements(&document["requirements"], universe, ignore_build_only, &mut used);
    if let Value::Sequence(outputs) = &document["outputs"] {
        for output in outputs {
            scan_requirements(&output["requirements"], universe, ignore_build_only, &mut used);
        }
    }
    used
}

fn scan_requirements(requirements: &Value, universe: &UsedVariableSet, ignore_build_only: &[String], used: &mut UsedVariableSet) {
    let sections: Vec<(&str, &Value)> = match requirements {
        Value::Mapping(map) => map.iter().filter_map(|(k, v)| k.as_str().map(|k| (k, v))).collect(),
        // An output may list its run requirements directly
        Value::Sequence(_) => vec![("run", requirements)],
        _ => return,
    };

    let names = |section: &Value| -> Vec<String> {
        match section {
            Value::Sequence(entries) => entries
                .iter()
                .filter_map(Value::as_str)
                .filter_map(bare_requirement)
                .map(variable_name)
                .collect(),
            _ => Vec::new(),
        }
    };

    let mut outside_build = Vec::new();
    let mut in_build = Vec::new();
    for (section, entries) in &sections {
        if matches!(*section, "build" | "host" | "run" | "run_constrained") {
            if *section == "build" {
                in_build.extend(names(entries));
            } else {
                outside_build.extend(names(entries));
            }
        }
    }

    for name in outside_build.iter().chain(&in_build) {
        if !universe.contains(name) {
            continue;
        }
        let build_only = !outside_build.contains(name);
        if build_only && ignore_build_only.iter().any(|ignored| variable_name(ignored) == *name) {
            continue;
        }
        used.insert(name.clone());
    }
}
