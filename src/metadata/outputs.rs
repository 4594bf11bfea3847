//! Output splitting for multi-output recipes.
//!
//! The template text is split into the part outside the column-0 `outputs:` key
//! and one text block per output list item. The rendered document is split the
//! same way: the document without `outputs`, and one mapping per output. Each
//! output's document inherits the parent's version and build number when it
//! declares none.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

static TOP_LEVEL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*\s*:").expect("key pattern is valid"));
static OUTPUTS_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^outputs\s*:").expect("outputs pattern is valid"));

/// Template text of a recipe split around its `outputs:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeSections {
    /// Everything outside the `outputs:` section
    pub top: String,
    /// The whole `outputs:` section, empty when the recipe has none
    pub outputs_block: String,
    /// The text of each output list item, in order
    pub items: Vec<String>,
}

impl RecipeSections {
    /// Split `text` at its column-0 `outputs:` key.
    pub fn split(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let Some(start) = lines.iter().position(|line| OUTPUTS_KEY.is_match(line)) else {
            return Self {
                top: text.to_string(),
                ..Self::default()
            };
        };
        let end = lines[start + 1..]
            .iter()
            .position(|line| TOP_LEVEL_KEY.is_match(line))
            .map_or(lines.len(), |offset| start + 1 + offset);

        let mut top: Vec<&str> = lines[..start].to_vec();
        top.extend_from_slice(&lines[end..]);

        Self {
            top: join_lines(&top),
            outputs_block: join_lines(&lines[start..end]),
            items: split_items(&lines[start + 1..end]),
        }
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs_block.is_empty()
    }

    /// The template text that belongs to one rendered output.
    ///
    /// Items are matched by position when the rendered outputs line up with the
    /// text items, otherwise by the name they declare. Outputs generated by a
    /// template loop fall back to the whole section.
    pub fn output_text(&self, index: usize, name: Option<&str>, rendered_count: usize) -> &str {
        if self.items.len() == rendered_count {
            if let Some(item) = self.items.get(index) {
                return item;
            }
        }
        if let Some(name) = name {
            let pattern = format!(r#"(?m)^\s*-?\s*name\s*:\s*['"]?{}['"]?\s*(#.*)?$"#, regex::escape(name));
            if let Ok(declares) = Regex::new(&pattern) {
                if let Some(item) = self.items.iter().find(|item| declares.is_match(item)) {
                    return item;
                }
            }
        }
        &self.outputs_block
    }
}

fn join_lines(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_item_start(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed == "-" || trimmed.starts_with("- ")
}

fn split_items(lines: &[&str]) -> Vec<String> {
    let Some(item_indent) = lines.iter().filter(|l| is_item_start(l)).map(|l| indent_of(l)).min() else {
        return Vec::new();
    };
    let mut items: Vec<Vec<&str>> = Vec::new();
    for line in lines {
        if is_item_start(line) && indent_of(line) == item_indent {
            items.push(vec![line]);
        } else if let Some(current) = items.last_mut() {
            current.push(line);
        }
    }
    items.iter().map(|item| join_lines(item)).collect()
}

/// The rendered output mappings of a document.
pub fn rendered_outputs(document: &Value) -> Vec<&Value> {
    match &document["outputs"] {
        Value::Sequence(outputs) => outputs.iter().filter(|o| o.is_mapping()).collect(),
        _ => Vec::new(),
    }
}

/// The name declared by an output mapping.
pub fn output_name(output: &Value) -> Option<&str> {
    output["name"].as_str()
}

/// Locate an output in a document.
///
/// A named output is the `index`-th output declaring that name; an unnamed
/// output is the one at position `index`.
pub fn find_output<'v>(document: &'v Value, name: Option<&str>, index: usize) -> Option<&'v Value> {
    let outputs = rendered_outputs(document);
    match name {
        Some(name) => outputs.into_iter().filter(|o| output_name(o) == Some(name)).nth(index),
        None => outputs.get(index).copied().filter(|o| output_name(o).is_none()),
    }
}

/// The document with its `outputs` key removed.
pub fn without_outputs(document: &Value) -> Value {
    match document {
        Value::Mapping(map) => {
            let mut map = map.clone();
            map.remove("outputs");
            Value::Mapping(map)
        }
        other => other.clone(),
    }
}

/// A recipe-shaped document for one output.
///
/// `name` and `version` move under `package`; a plain requirements list becomes
/// the `run` section; `script` moves under `build`. The parent's version and
/// build number fill in what the output leaves out.
pub fn output_document(parent: &Value, output: &Value) -> Value {
    let mut package = Mapping::new();
    if let Some(name) = output.get("name") {
        package.insert("name".into(), name.clone());
    }
    let version = output.get("version").or_else(|| parent["package"].get("version"));
    if let Some(version) = version {
        package.insert("version".into(), version.clone());
    }

    let mut build = match output.get("build") {
        Some(Value::Mapping(build)) => build.clone(),
        _ => Mapping::new(),
    };
    if !build.contains_key("number") {
        if let Some(number) = parent["build"].get("number") {
            build.insert("number".into(), number.clone());
        }
    }
    if let Some(script) = output.get("script") {
        build.insert("script".into(), script.clone());
    }

    let mut doc = Mapping::new();
    doc.insert("package".into(), Value::Mapping(package));
    if !build.is_empty() {
        doc.insert("build".into(), Value::Mapping(build));
    }
    match output.get("requirements") {
        Some(Value::Sequence(run)) => {
            let mut requirements = Mapping::new();
            requirements.insert("run".into(), Value::Sequence(run.clone()));
            doc.insert("requirements".into(), Value::Mapping(requirements));
        }
        Some(requirements) => {
            doc.insert("requirements".into(), requirements.clone());
        }
        None => {}
    }
    if let Value::Mapping(map) = output {
        for (key, value) in map {
            let Some(key) = key.as_str() else {
                continue;
            };
            if !matches!(key, "name" | "version" | "build" | "script" | "requirements") {
                doc.insert(key.into(), value.clone());
            }
        }
    }
    Value::Mapping(doc)
}
