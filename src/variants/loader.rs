//! Reading variant configuration files into [`SpecSource`]s.
//!
//! Config files are YAML with two extensions: every scalar is a string (no type
//! inference, so `1.10` is not `1.1`), and lines may carry selector comments.
//! A selector on a list item becomes a predicate on that candidate value and is
//! evaluated during expansion. A selector on any other line filters the line at
//! load time against the target platform.
//!
//! Both extensions are handled by a textual pre-pass that quotes plain scalars and
//! rewrites selected list items to `!when [value, 'expression']` before the
//! document reaches the YAML parser.

use std::path::Path;

use serde_yaml::Value;
use serde_yaml::value::Tag;
use tracing::debug;

use super::types::{CandidateValue, SourceValue, SpecSource, VariableValue};
use crate::core::VariaError;
use crate::selectors::{Namespace, Selector, split_selector};

/// Origin label for `--variant` overrides.
pub const CLI_ORIGIN: &str = "command line";

const WHEN_TAG: &str = "when";

/// Load a config file from disk.
pub fn load_variant_file(path: &Path, target_platform: &str) -> Result<SpecSource, VariaError> {
    let text = std::fs::read_to_string(path).map_err(|e| VariaError::ConfigError {
        message: format!("Failed to read variant config {}: {e}", path.display()),
    })?;
    debug!("Loaded variant config {}", path.display());
    parse_variant_config(&text, &path.display().to_string(), target_platform)
}

/// Parse config text into a source labelled `origin`.
pub fn parse_variant_config(text: &str, origin: &str, target_platform: &str) -> Result<SpecSource, VariaError> {
    let prepared = prepare_config_text(text, &Namespace::for_platform(target_platform))?;
    let document: Value = serde_yaml::from_str(&prepared).map_err(|e| VariaError::ConfigError {
        message: format!("Invalid variant config {origin}: {e}"),
    })?;

    let mut source = SpecSource::new(origin);
    let map = match document {
        Value::Null => return Ok(source),
        Value::Mapping(map) => map,
        _ => {
            return Err(VariaError::ConfigError {
                message: format!("Variant config {origin} must be a mapping of variable names to values"),
            });
        }
    };

    for (key, value) in map {
        let Some(key) = key.as_str().map(str::to_string) else {
            return Err(VariaError::ConfigError {
                message: format!("Variant config {origin} has a non-string key"),
            });
        };
        let value = match value {
            Value::Null => continue,
            Value::Sequence(items) => SourceValue::Candidates(
                items.iter().map(candidate_from_yaml).collect::<Result<Vec<_>, _>>()?.into_iter().flatten().collect(),
            ),
            Value::Mapping(_) => match VariableValue::from_yaml(&value) {
                Some(VariableValue::Map(map)) => SourceValue::Mapping(map),
                _ => continue,
            },
            scalar => match candidate_from_yaml(&scalar)? {
                Some(candidate) => SourceValue::Candidates(vec![candidate]),
                None => continue,
            },
        };
        source.set(&key, value);
    }
    Ok(source)
}

/// Parse `name=v1,v2` overrides, in command-line order.
pub fn parse_overrides(overrides: &[String]) -> Result<SpecSource, VariaError> {
    let mut source = SpecSource::new(CLI_ORIGIN);
    for entry in overrides {
        let Some((key, values)) = entry.split_once('=') else {
            return Err(VariaError::ConfigError {
                message: format!("Invalid variant override '{entry}': expected NAME=VALUE[,VALUE...]"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(VariaError::ConfigError {
                message: format!("Invalid variant override '{entry}': empty variable name"),
            });
        }
        let values: Vec<CandidateValue> = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(CandidateValue::new)
            .collect();
        source.set(key, SourceValue::Candidates(values));
    }
    Ok(source)
}

fn candidate_from_yaml(item: &Value) -> Result<Option<CandidateValue>, VariaError> {
    if let Value::Tagged(tagged) = item {
        if tagged.tag == Tag::new(WHEN_TAG) {
            let Value::Sequence(pair) = &tagged.value else {
                return Ok(VariableValue::from_yaml(&tagged.value).map(CandidateValue::new));
            };
            let (Some(value), Some(Value::String(expr))) = (pair.first(), pair.get(1)) else {
                return Ok(None);
            };
            let predicate = Selector::parse(expr)?;
            return Ok(VariableValue::from_yaml(value).map(|v| CandidateValue::new(v).with_predicate(predicate)));
        }
    }
    Ok(VariableValue::from_yaml(item).map(CandidateValue::new))
}

/// Quote plain scalars and translate selector comments.
pub(crate) fn prepare_config_text(text: &str, platform: &Namespace) -> Result<String, VariaError> {
    rewrite_scalars(text, Some(platform))
}

/// Quote plain scalars of an already rendered recipe so that no value is type inferred.
///
/// Unquoted `true`, `false` and `null` keep their YAML meaning.
pub(crate) fn stringify_scalars(text: &str) -> Result<String, VariaError> {
    rewrite_scalars(text, None)
}

/// Line-wise scalar quoting. With a platform namespace, selector comments are
/// translated as well; without one they are left to the caller.
fn rewrite_scalars(text: &str, platform: Option<&Namespace>) -> Result<String, VariaError> {
    let mut out = Vec::new();
    // Key column of a block scalar copied raw, and indentation of a dropped block.
    let mut raw_block: Option<usize> = None;
    let mut dropped_block: Option<usize> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();

        if let Some(block) = raw_block {
            if trimmed.is_empty() || indent > block {
                out.push(line.to_string());
                continue;
            }
            raw_block = None;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            if dropped_block.is_none() {
                out.push(line.to_string());
            }
            continue;
        }
        if let Some(block) = dropped_block {
            if indent > block {
                continue;
            }
            dropped_block = None;
        }

        let (body, selector) = match platform.and_then(|_| split_selector(line)) {
            Some((body, expr)) => (body, Some(expr)),
            None => (line, None),
        };
        let body_trimmed = body.trim_start();
        let pad = &line[..indent];

        if let Some(item) = body_trimmed.strip_prefix("- ").or_else(|| (body_trimmed == "-").then_some("")) {
            let item = item.trim();
            if let Some((key, value)) = split_key(item) {
                if let (Some(expr), Some(platform)) = (selector, platform) {
                    if !Selector::parse(expr.trim())?.evaluate(platform) {
                        dropped_block = Some(indent);
                        continue;
                    }
                }
                out.push(format!("{pad}- {}", rewrite_entry(key, value, indent + 2, &mut raw_block)));
                continue;
            }
            let quoted = quote_value(strip_comment(item));
            match selector {
                Some(expr) => out.push(format!("{pad}- !{WHEN_TAG} [{quoted}, {}]", single_quote(expr.trim()))),
                None => out.push(format!("{pad}- {quoted}").trim_end().to_string()),
            }
            continue;
        }

        if let (Some(expr), Some(platform)) = (selector, platform) {
            let selector = Selector::parse(expr.trim())?;
            if !selector.evaluate(platform) {
                debug!("Dropping config line '{}' for [{}]", body.trim(), expr.trim());
                dropped_block = Some(indent);
                continue;
            }
        }

        match split_key(body_trimmed) {
            Some((key, value)) => out.push(format!("{pad}{}", rewrite_entry(key, value, indent, &mut raw_block))),
            None => out.push(body.to_string()),
        }
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    Ok(joined)
}

fn rewrite_entry(key: &str, value: &str, key_column: usize, raw_block: &mut Option<usize>) -> String {
    let value = strip_comment(value.trim());
    if is_block_indicator(value) {
        *raw_block = Some(key_column);
        format!("{key}: {value}")
    } else if value.is_empty() {
        format!("{key}:")
    } else {
        format!("{key}: {}", quote_value(value))
    }
}

/// Split `key: value` at the first `: ` (or a trailing `:`) outside quotes.
fn split_key(line: &str) -> Option<(&str, &str)> {
    if line.starts_with('[') || line.starts_with('{') || line.starts_with('"') || line.starts_with('\'') {
        return None;
    }
    if let Some(key) = line.strip_suffix(':') {
        if !key.contains(": ") {
            return Some((key, ""));
        }
    }
    line.split_once(": ")
}

fn is_block_indicator(value: &str) -> bool {
    matches!(value, "|" | ">" | "|-" | ">-" | "|+" | ">+")
}

/// Drop a trailing ` # comment` from an unquoted value.
fn strip_comment(value: &str) -> &str {
    if value.starts_with('\'') || value.starts_with('"') {
        return value;
    }
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end(),
        None if value.starts_with('#') => "",
        None => value,
    }
}

fn quote_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.starts_with('\'') || value.starts_with('"') || value.starts_with('{') || value.starts_with('!') {
        return value.to_string();
    }
    if matches!(value, "true" | "false" | "null" | "~" | "|" | ">") {
        return value.to_string();
    }
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        if inner.contains('[') || inner.contains('{') {
            return value.to_string();
        }
        let items: Vec<String> =
            inner.split(',').map(str::trim).filter(|i| !i.is_empty()).map(quote_value).collect();
        return format!("[{}]", items.join(", "));
    }
    single_quote(value)
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
