//! Rendered recipe metadata.
//!
//! [`RenderedMetadata`] wraps one rendered document together with the variant it
//! was rendered under and the variables it uses. Its identity hashes only the
//! used part of the variant, so variants that differ in variables the recipe never
//! reads collapse to the same identity.
//!
//! # Identity
//!
//! ```text
//! identity = {name}-{version}-h{hash}
//! hash     = sha256(canonical JSON of the sorted used (name, value) pairs)[..hash_length]
//! dist     = {name}-{version}-{build/string | h{hash}_{build/number} | {build/number}}
//! ```
//!
//! # Examples
//!
//! ```
//! use serde_yaml::Value;
//! use varia_cli::metadata::RenderedMetadata;
//! use varia_cli::variants::{UsedVariableSet, VariableValue, Variant};
//!
//! let document: Value = serde_yaml::from_str("package: {name: foo, version: '1.0'}").unwrap();
//! let used: UsedVariableSet = ["python".to_string()].into_iter().collect();
//! let mut py38 = Variant::new();
//! py38.insert("python", VariableValue::from("3.8"));
//! let mut py38_numpy = py38.clone();
//! py38_numpy.insert("numpy", VariableValue::from("1.21"));
//!
//! let a = RenderedMetadata::assemble(document.clone(), py38, used.clone(), 7);
//! let b = RenderedMetadata::assemble(document, py38_numpy, used, 7);
//! assert_eq!(a.identity(), b.identity());
//! assert!(a.identity().starts_with("foo-1.0-h"));
//! ```

pub mod outputs;
pub mod pins;

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::core::VariaError;
use crate::variants::{UsedVariableSet, Variant, VariantSpec};

pub use outputs::{RecipeSections, output_document, without_outputs};
pub use pins::apply_pin_expressions;

/// Default number of hex digits kept from the variant hash.
pub const DEFAULT_HASH_LENGTH: usize = 7;

/// Top-level keys of a snapshot, in output order.
const SNAPSHOT_ORDER: &[&str] = &["package", "source", "build", "requirements", "test", "outputs", "about", "extra"];

/// One output of a multi-output recipe, as seen from its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    pub name: String,
    /// Identity of the emitted output metadata compatible with the parent's variant
    pub identity: String,
    /// That output's recipe-shaped document
    pub document: Value,
    /// Variables the output uses after its own convergence
    pub used_vars: UsedVariableSet,
}

impl OutputDescriptor {
    pub fn requirements(&self) -> &Value {
        &self.document["requirements"]
    }
}

/// A rendered recipe or output under one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMetadata {
    document: Value,
    variant: Variant,
    used_vars: UsedVariableSet,
    hash: String,
    finalized: bool,
    needs_download: bool,
    needs_reparse: bool,
    outputs: Vec<OutputDescriptor>,
}

impl RenderedMetadata {
    /// Wrap a rendered document and compute its identity.
    pub fn assemble(document: Value, variant: Variant, used_vars: UsedVariableSet, hash_length: usize) -> Self {
        let hash = variant_hash(&variant.restrict(&used_vars), hash_length);
        Self {
            document,
            variant,
            used_vars,
            hash,
            finalized: false,
            needs_download: false,
            needs_reparse: false,
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, needs_download: bool, needs_reparse: bool) -> Self {
        self.needs_download = needs_download;
        self.needs_reparse = needs_reparse;
        self
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<OutputDescriptor>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Apply implicit requirement pinning and mark the metadata final.
    ///
    /// Metadata that still needs a download or a re-parse stays unfinalized.
    /// Finalizing twice changes nothing.
    #[must_use]
    pub fn finalize(mut self, spec: &VariantSpec) -> Self {
        if self.finalized || self.needs_download || self.needs_reparse {
            return self;
        }
        if let Value::Mapping(map) = &mut self.document {
            if let Some(requirements) = map.get_mut("requirements") {
                pins::pin_requirements(requirements, &self.variant, &self.used_vars, spec);
            }
        }
        self.finalized = true;
        self
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn used_vars(&self) -> &UsedVariableSet {
        &self.used_vars
    }

    pub fn outputs(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn needs_download(&self) -> bool {
        self.needs_download
    }

    pub fn needs_reparse(&self) -> bool {
        self.needs_reparse
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Look up a `/`-separated path such as `package/version` or `outputs/0/name`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.document;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = match current {
                Value::Mapping(map) => map.get(part)?,
                Value::Sequence(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Like [`Self::get`], falling back to `default` when the path is missing or null.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        match self.get(path) {
            Some(Value::Null) | None => default,
            Some(value) => value.clone(),
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn name(&self) -> &str {
        self.get_str("package/name").unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.get_str("package/version").unwrap_or("")
    }

    pub fn build_number(&self) -> String {
        match self.get("build/number") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "0".to_string(),
        }
    }

    /// `build/string` when set, else `h{hash}_{number}`, or just the number when no variable is used.
    pub fn build_string(&self) -> String {
        if let Some(string) = self.get_str("build/string").filter(|s| !s.is_empty()) {
            return string.to_string();
        }
        if self.used_vars.is_empty() {
            self.build_number()
        } else {
            format!("h{}_{}", self.hash, self.build_number())
        }
    }

    /// The de-duplication key: `{name}-{version}-h{hash}`.
    pub fn identity(&self) -> String {
        format!("{}-{}-h{}", self.name(), self.version(), self.hash)
    }

    pub fn dist(&self) -> String {
        format!("{}-{}-{}", self.name(), self.version(), self.build_string())
    }

    /// Serialize the document as a recipe snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be serialized.
    pub fn to_yaml(&self) -> Result<String, VariaError> {
        Ok(serde_yaml::to_string(&snapshot(&self.document))?)
    }
}

/// Order the top-level keys and drop empty sections.
fn snapshot(document: &Value) -> Value {
    let Value::Mapping(map) = document else {
        return document.clone();
    };
    let mut ordered = Mapping::new();
    let known = SNAPSHOT_ORDER.iter().filter_map(|key| map.get(*key).map(|v| (Value::from(*key), v)));
    let others = map
        .iter()
        .filter(|(k, _)| k.as_str().is_none_or(|k| !SNAPSHOT_ORDER.contains(&k)))
        .map(|(k, v)| (k.clone(), v));
    for (key, value) in known.chain(others) {
        if !is_empty_section(value) {
            ordered.insert(key, value.clone());
        }
    }
    Value::Mapping(ordered)
}

fn is_empty_section(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(map) => map.values().all(is_empty_section),
        Value::Sequence(items) => items.is_empty(),
        _ => false,
    }
}

/// First `length` hex digits of the SHA-256 of the variant's canonical JSON.
fn variant_hash(variant: &Variant, length: usize) -> String {
    let pairs: BTreeMap<&str, serde_json::Value> = variant.iter().map(|(k, v)| (k.as_str(), v.to_json())).collect();
    let canonical = serde_json::to_string(&pairs).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..length.clamp(1, digest.len())].to_string()
}

/// Used variables whose value differs across a set of metadata.
pub fn loop_vars(metadata: &[RenderedMetadata]) -> UsedVariableSet {
    let Some(first) = metadata.first() else {
        return UsedVariableSet::new();
    };
    let candidates: UsedVariableSet = metadata.iter().flat_map(|m| m.used_vars.iter().cloned()).collect();
    candidates
        .into_iter()
        .filter(|name| metadata[1..].iter().any(|m| m.variant.get(name) != first.variant.get(name)))
        .collect()
}
