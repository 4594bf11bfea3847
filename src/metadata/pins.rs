//! Pin expressions and implicit requirement pinning.
//!
//! A pin expression such as `x.x` says how many version components a pin keeps.
//! `apply_pin_expressions("1.11.3", "x.x.x", "x.x")` keeps three components for
//! the lower bound and bumps the second for the upper bound: `>=1.11.3,<1.12a0`.

use serde_yaml::Value;
use tracing::trace;

use crate::variants::{UsedVariableSet, Variant, VariantSpec};

/// Turn a version and two pin expressions into a constraint.
///
/// An empty expression drops that bound. An upper pin longer than the version is
/// clamped to the version's length.
pub fn apply_pin_expressions(version: &str, min_pin: &str, max_pin: &str) -> String {
    let components: Vec<&str> = version.split('.').filter(|c| !c.is_empty()).collect();
    let places = |pin: &str| if pin.trim().is_empty() { 0 } else { pin.split('.').count() };

    let mut bounds = Vec::new();

    let lower = places(min_pin).min(components.len());
    if lower > 0 {
        bounds.push(format!(">={}", components[..lower].join(".")));
    }

    let upper = places(max_pin).min(components.len());
    if upper > 0 {
        let mut kept: Vec<String> = components[..upper].iter().map(|c| (*c).to_string()).collect();
        if let Some(last) = kept.last_mut() {
            *last = bump_component(last);
        }
        bounds.push(format!("<{}a0", kept.join(".")));
    }

    bounds.join(",")
}

/// Increment a version component: `8` → `9`, `2k` → `3`, `k` → `l`.
fn bump_component(component: &str) -> String {
    let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return match digits.parse::<u64>().ok().and_then(|number| number.checked_add(1)) {
            Some(number) => number.to_string(),
            None => increment_decimal(&digits),
        };
    }
    let mut chars: Vec<char> = component.chars().collect();
    if let Some(last) = chars.last_mut() {
        if let Some(next) = char::from_u32(u32::from(*last) + 1) {
            *last = next;
        }
    }
    chars.into_iter().collect()
}

/// Add one to a decimal string of any length.
fn increment_decimal(digits: &str) -> String {
    let mut bytes = digits.as_bytes().to_vec();
    for byte in bytes.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            return String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    format!("1{}", String::from_utf8_lossy(&bytes))
}

/// The package name of a requirement entry that carries no version.
pub fn bare_requirement(entry: &str) -> Option<&str> {
    let entry = entry.trim();
    (!entry.is_empty() && !entry.contains(char::is_whitespace)).then_some(entry)
}

/// Variable name for a package name (`r-base` → `r_base`).
pub fn variable_name(package: &str) -> String {
    package.replace('-', "_")
}

/// Pin bare requirements of one `requirements` mapping in place.
///
/// Build and host entries that name a used variable get the variant value.
/// Run entries listed in `pin_run_as_build` get the configured pin expressions.
/// Names in `ignore_version` are left alone.
pub fn pin_requirements(requirements: &mut Value, variant: &Variant, used: &UsedVariableSet, spec: &VariantSpec) {
    let Value::Mapping(map) = requirements else {
        return;
    };
    let ignored: Vec<String> = spec.ignore_version().iter().map(|n| variable_name(n)).collect();
    let run_pins = spec.pin_run_as_build();

    for (section, entries) in map.iter_mut() {
        let Some(section) = section.as_str() else {
            continue;
        };
        let Value::Sequence(entries) = entries else {
            continue;
        };
        for entry in entries.iter_mut() {
            let Some(package) = entry.as_str().and_then(bare_requirement).map(str::to_string) else {
                continue;
            };
            let var = variable_name(&package);
            if ignored.contains(&var) || !used.contains(&var) {
                continue;
            }
            let Some(value) = variant.get_str(&var) else {
                continue;
            };
            let pinned = match section {
                "build" | "host" => format!("{package} {value}"),
                "run" => {
                    let Some(pin) = run_pins.iter().find(|(name, _)| variable_name(name) == var).map(|(_, p)| p)
                    else {
                        continue;
                    };
                    let constraint = apply_pin_expressions(
                        value,
                        pin.min_pin.as_deref().unwrap_or(""),
                        pin.max_pin.as_deref().unwrap_or(""),
                    );
                    if constraint.is_empty() {
                        continue;
                    }
                    format!("{package} {constraint}")
                }
                _ => continue,
            };
            trace!("Pinned {section} requirement '{package}' to '{pinned}'");
            *entry = Value::String(pinned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::{SourceValue, SpecSource, VariableValue, combine_specs, default_source};
    use std::collections::BTreeMap;

    #[test]
    fn test_bump_component_past_u64() {
        assert_eq!(bump_component("18446744073709551615"), "18446744073709551616");
        assert_eq!(bump_component("99999999999999999999"), "100000000000000000000");
        assert_eq!(bump_component("2k"), "3");
        assert_eq!(bump_component("k"), "l");
        assert_eq!(apply_pin_expressions("1.18446744073709551615", "x.x", "x.x"), ">=1.18446744073709551615,<1.18446744073709551616a0");
    }

    #[test]
    fn test_apply_pin_expressions() {
        assert_eq!(apply_pin_expressions("3.8", "x.x", "x.x"), ">=3.8,<3.9a0");
        assert_eq!(apply_pin_expressions("1.11.3", "x.x.x.x.x.x", "x"), ">=1.11.3,<2a0");
        assert_eq!(apply_pin_expressions("1.2", "x.x.x", "x.x.x.x"), ">=1.2,<1.3a0");
        assert_eq!(apply_pin_expressions("1.0.2k", "x.x.x", "x.x.x"), ">=1.0.2k,<1.0.3a0");
        assert_eq!(apply_pin_expressions("9", "", "x"), "<10a0");
        assert_eq!(apply_pin_expressions("9", "x", ""), ">=9");
    }

    #[test]
    fn test_bump_alphabetic_component() {
        assert_eq!(bump_component("b"), "c");
        assert_eq!(bump_component("10"), "11");
    }

    #[test]
    fn test_bare_requirement() {
        assert_eq!(bare_requirement("zlib"), Some("zlib"));
        assert_eq!(bare_requirement(" zlib "), Some("zlib"));
        assert_eq!(bare_requirement("zlib 1.2"), None);
        assert_eq!(bare_requirement(""), None);
    }

    #[test]
    fn test_pin_requirements() {
        let spec = combine_specs(&[
            default_source("linux-64", None),
            SpecSource::new("cfg")
                .with("python", ["3.8"])
                .with("zlib", ["1.2.11"])
                .with("r_base", ["4.1.2"])
                .with("jpeg", ["9"])
                .with("ignore_version", ["jpeg"]),
        ])
        .unwrap();
        let variant: Variant = [("python", "3.8"), ("zlib", "1.2.11"), ("r_base", "4.1.2"), ("jpeg", "9")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), VariableValue::from(v)))
            .collect();
        let used: UsedVariableSet = variant.keys().map(str::to_string).collect();

        let mut requirements: Value = serde_yaml::from_str(
            "build: [zlib, cmake]\nhost: [python, jpeg, r-base]\nrun: [python, zlib, 'numpy >=1.10', r-base]\n",
        )
        .unwrap();
        pin_requirements(&mut requirements, &variant, &used, &spec);

        assert_eq!(requirements["build"][0], Value::from("zlib 1.2.11"));
        assert_eq!(requirements["build"][1], Value::from("cmake"));
        assert_eq!(requirements["host"][0], Value::from("python 3.8"));
        assert_eq!(requirements["host"][1], Value::from("jpeg"));
        assert_eq!(requirements["host"][2], Value::from("r-base 4.1.2"));
        assert_eq!(requirements["run"][0], Value::from("python >=3.8,<3.9a0"));
        assert_eq!(requirements["run"][1], Value::from("zlib"));
        assert_eq!(requirements["run"][2], Value::from("numpy >=1.10"));
        assert_eq!(requirements["run"][3], Value::from("r-base >=4.1,<4.2a0"));
    }

    #[test]
    fn test_unused_variables_are_not_pinned() {
        let mut pins = BTreeMap::new();
        pins.insert("zlib".to_string(), VariableValue::Map(BTreeMap::new()));
        let spec = combine_specs(&[SpecSource::new("cfg")
            .with("zlib", ["1.2"])
            .with_value("pin_run_as_build", SourceValue::Mapping(pins))])
        .unwrap();
        let variant: Variant = [("zlib".to_string(), VariableValue::from("1.2"))].into_iter().collect();
        let mut requirements: Value = serde_yaml::from_str("host: [zlib]\nrun: [zlib]\n").unwrap();
        pin_requirements(&mut requirements, &variant, &UsedVariableSet::new(), &spec);
        assert_eq!(requirements["host"][0], Value::from("zlib"));

        let used: UsedVariableSet = ["zlib".to_string()].into_iter().collect();
        pin_requirements(&mut requirements, &variant, &used, &spec);
        assert_eq!(requirements["host"][0], Value::from("zlib 1.2"));
        assert_eq!(requirements["run"][0], Value::from("zlib"));
    }
}
