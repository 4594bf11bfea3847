//! Variant data model: values, candidates, variables, specifications and variants.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selectors::{Namespace, Selector};

/// The set of variable names a recipe or output actually references.
pub type UsedVariableSet = BTreeSet<String>;

/// Keys whose values merge across sources instead of replacing.
pub const DEFAULT_EXTEND_KEYS: &[&str] = &["pin_run_as_build", "ignore_version", "ignore_build_only_deps"];

/// Keys with special meaning that never explode into variants.
pub const SPECIAL_KEYS: &[&str] = &["zip_keys", "extend_keys"];

/// A single configuration value: a string or a structured value.
///
/// Variant files are loaded without type inference, so scalars are always strings
/// (`1.10` stays `1.10`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Str(String),
    List(Vec<VariableValue>),
    Map(BTreeMap<String, VariableValue>),
}

impl VariableValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, VariableValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a YAML value, stringifying scalars.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        use serde_yaml::Value;
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Str(b.to_string())),
            Value::Number(n) => Some(Self::Str(n.to_string())),
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Sequence(items) => Some(Self::List(items.iter().filter_map(Self::from_yaml).collect())),
            Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => continue,
                    };
                    if let Some(v) = Self::from_yaml(v) {
                        out.insert(key, v);
                    }
                }
                Some(Self::Map(out))
            }
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// One candidate value of a variable, optionally restricted by a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateValue {
    pub value: VariableValue,
    pub predicate: Option<Selector>,
}

impl CandidateValue {
    pub fn new(value: impl Into<VariableValue>) -> Self {
        Self {
            value: value.into(),
            predicate: None,
        }
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: Selector) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Whether this value may be chosen under the given namespace.
    pub fn applies(&self, ns: &Namespace) -> bool {
        self.predicate.as_ref().is_none_or(|p| p.evaluate(ns))
    }
}

/// A named configuration axis with its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigVariable {
    pub name: String,
    pub values: Vec<CandidateValue>,
    /// Index into [`VariantSpec::zip_groups`] when the variable is zipped.
    pub zip_group: Option<usize>,
    /// The source that provided the winning value sequence.
    pub origin: String,
}

impl ConfigVariable {
    pub fn new(name: impl Into<String>, values: Vec<CandidateValue>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values,
            zip_group: None,
            origin: origin.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Variables read by the predicates attached to this variable's values.
    pub fn predicate_variables(&self) -> BTreeSet<String> {
        self.values
            .iter()
            .filter_map(|c| c.predicate.as_ref())
            .flat_map(Selector::variables)
            .collect()
    }
}

/// Pin expression for `pin_run_as_build` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinExpression {
    pub min_pin: Option<String>,
    pub max_pin: Option<String>,
}

/// The combined, ordered variant specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSpec {
    pub(crate) variables: Vec<ConfigVariable>,
    pub(crate) zip_groups: Vec<Vec<String>>,
    pub(crate) extended: BTreeMap<String, VariableValue>,
}

impl VariantSpec {
    pub fn get(&self, name: &str) -> Option<&ConfigVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Variables in first-declaration order.
    pub fn variables(&self) -> &[ConfigVariable] {
        &self.variables
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.keys().map(str::to_string).collect()
    }

    pub fn zip_groups(&self) -> &[Vec<String>] {
        &self.zip_groups
    }

    pub fn zip_group_of(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(|v| v.zip_group).map(|idx| self.zip_groups[idx].as_slice())
    }

    /// Merged value of an extend key such as `pin_run_as_build`.
    pub fn extended(&self, key: &str) -> Option<&VariableValue> {
        self.extended.get(key)
    }

    pub fn extended_keys(&self) -> impl Iterator<Item = &str> {
        self.extended.keys().map(String::as_str)
    }

    /// Parsed `pin_run_as_build` table.
    pub fn pin_run_as_build(&self) -> BTreeMap<String, PinExpression> {
        let Some(VariableValue::Map(map)) = self.extended("pin_run_as_build") else {
            return BTreeMap::new();
        };
        map.iter()
            .map(|(name, expr)| {
                let field = |key: &str| {
                    expr.as_map().and_then(|m| m.get(key)).and_then(VariableValue::as_str).map(str::to_string)
                };
                (
                    name.clone(),
                    PinExpression {
                        min_pin: field("min_pin"),
                        max_pin: field("max_pin"),
                    },
                )
            })
            .collect()
    }

    /// Package names that are never pinned implicitly.
    pub fn ignore_version(&self) -> Vec<String> {
        self.extended_list("ignore_version")
    }

    pub fn ignore_build_only_deps(&self) -> Vec<String> {
        self.extended_list("ignore_build_only_deps")
    }

    fn extended_list(&self, key: &str) -> Vec<String> {
        match self.extended(key) {
            Some(VariableValue::List(items)) => {
                items.iter().filter_map(VariableValue::as_str).map(str::to_string).collect()
            }
            Some(VariableValue::Str(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Close a used set over the variables read by its values' predicates.
    ///
    /// A predicate on a used variable makes the choice of that variable depend on
    /// whatever the predicate reads, so those variables are used too.
    pub fn close_over_dependencies(&self, used: &UsedVariableSet) -> UsedVariableSet {
        let mut closed = used.clone();
        let mut frontier: Vec<String> = used.iter().cloned().collect();
        while let Some(name) = frontier.pop() {
            let Some(var) = self.get(&name) else {
                continue;
            };
            for dep in var.predicate_variables() {
                if self.contains(&dep) && closed.insert(dep.clone()) {
                    frontier.push(dep);
                }
            }
        }
        closed
    }

    /// A copy with `name` reduced to its first value.
    ///
    /// Zip partners keep their first position too, so alignment holds.
    #[must_use]
    pub fn conform_to_first(&self, name: &str) -> Self {
        let mut conformed = self.clone();
        let members: Vec<String> = match self.zip_group_of(name) {
            Some(group) => group.to_vec(),
            None => vec![name.to_string()],
        };
        for var in conformed.variables.iter_mut().filter(|v| members.contains(&v.name)) {
            var.values.truncate(1);
        }
        conformed
    }
}

/// One concrete assignment of values to variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variant(BTreeMap<String, VariableValue>);

impl Variant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: VariableValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(VariableValue::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The assignment restricted to the given names.
    #[must_use]
    pub fn restrict(&self, names: &UsedVariableSet) -> Self {
        Self(self.0.iter().filter(|(k, _)| names.contains(*k)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Whether every variable bound here has the same value in `other`, or is absent there.
    pub fn agrees_with(&self, other: &Variant) -> bool {
        self.0.iter().all(|(name, value)| other.get(name).is_none_or(|v| v == value))
    }

    /// `base` with every value of this variant laid over it.
    #[must_use]
    pub fn overlay_on(&self, base: &Variant) -> Self {
        let mut bound = base.clone();
        bound.0.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        bound
    }

    /// Legacy language environment variables (`CONDA_PY`, `CONDA_NPY`, ...).
    ///
    /// `CONDA_PY` keeps only major and minor joined without a dot (`3.10` → `310`).
    pub fn language_env_vars(&self) -> BTreeMap<String, String> {
        const SUFFIXES: &[(&str, &str)] =
            &[("python", "PY"), ("numpy", "NPY"), ("lua", "LUA"), ("perl", "PERL"), ("r_base", "R")];
        let mut env = BTreeMap::new();
        for (variable, suffix) in SUFFIXES {
            if let Some(value) = self.get(variable) {
                let mut value = value.to_string();
                if *suffix == "PY" {
                    value = value.split('.').take(2).collect::<Vec<_>>().concat();
                }
                env.insert(format!("CONDA_{suffix}"), value);
            }
        }
        env
    }
}

impl FromIterator<(String, VariableValue)> for Variant {
    fn from_iter<I: IntoIterator<Item = (String, VariableValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// One raw value in a specification source, before combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceValue {
    /// A scalar (one candidate) or a sequence of candidates.
    Candidates(Vec<CandidateValue>),
    /// A mapping, as used by `pin_run_as_build`.
    Mapping(BTreeMap<String, VariableValue>),
}

impl SourceValue {
    /// The raw value with predicates dropped.
    pub fn to_value(&self) -> VariableValue {
        match self {
            Self::Candidates(items) => VariableValue::List(items.iter().map(|c| c.value.clone()).collect()),
            Self::Mapping(map) => VariableValue::Map(map.clone()),
        }
    }
}

/// One layered specification source: built-in defaults, a config file, or CLI overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSource {
    /// Label used in error messages (usually a file path)
    pub origin: String,
    /// Keys in declaration order
    pub entries: Vec<(String, SourceValue)>,
}

impl SpecSource {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: Vec::new(),
        }
    }

    /// Builder form of [`SpecSource::set`] for plain string values.
    #[must_use]
    pub fn with<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<VariableValue>,
    {
        let values = values.into_iter().map(CandidateValue::new).collect();
        self.set(key, SourceValue::Candidates(values));
        self
    }

    /// Builder form of [`SpecSource::set`].
    #[must_use]
    pub fn with_value(mut self, key: &str, value: SourceValue) -> Self {
        self.set(key, value);
        self
    }

    /// Set a key, keeping its original position when it already exists.
    pub fn set(&mut self, key: &str, value: SourceValue) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&SourceValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_keeps_own_values() {
        let own: Variant = [("python".to_string(), VariableValue::from("3.9"))].into_iter().collect();
        let base: Variant = [
            ("python".to_string(), VariableValue::from("3.9")),
            ("zlib".to_string(), VariableValue::from("1.3")),
        ]
        .into_iter()
        .collect();
        let other: Variant = [("python".to_string(), VariableValue::from("3.7"))].into_iter().collect();

        assert!(own.agrees_with(&base));
        assert!(!own.agrees_with(&other));
        assert!(Variant::new().agrees_with(&other));

        let bound = own.overlay_on(&other);
        assert_eq!(bound.get_str("python"), Some("3.9"));
        assert_eq!(own.overlay_on(&base).get_str("zlib"), Some("1.3"));
    }

    #[test]
    fn test_from_yaml_stringifies_scalars() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("[1.5, true, abc, {a: 1}]").unwrap();
        let value = VariableValue::from_yaml(&yaml).unwrap();
        let VariableValue::List(items) = value else {
            panic!("expected list");
        };
        assert_eq!(items[0], VariableValue::from("1.5"));
        assert_eq!(items[1], VariableValue::from("true"));
        assert_eq!(items[2], VariableValue::from("abc"));
        assert_eq!(items[3].as_map().unwrap()["a"], VariableValue::from("1"));
    }

    #[test]
    fn test_language_env_vars() {
        let mut v = Variant::new();
        v.insert("python", VariableValue::from("3.10.4"));
        v.insert("numpy", VariableValue::from("1.21"));
        v.insert("zlib", VariableValue::from("1.2"));
        let env = v.language_env_vars();
        assert_eq!(env["CONDA_PY"], "310");
        assert_eq!(env["CONDA_NPY"], "1.21");
        assert!(!env.contains_key("CONDA_LUA"));
    }

    #[test]
    fn test_restrict() {
        let mut v = Variant::new();
        v.insert("python", VariableValue::from("3.8"));
        v.insert("numpy", VariableValue::from("1.11"));
        let used: UsedVariableSet = ["python".to_string()].into_iter().collect();
        let restricted = v.restrict(&used);
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted.get_str("python"), Some("3.8"));
        assert_eq!(restricted.to_string(), "{python=3.8}");
    }

    #[test]
    fn test_conform_to_first_keeps_zip_alignment() {
        let spec = crate::variants::combine_specs(&[SpecSource::new("cfg")
            .with("python", ["3.8", "3.9"])
            .with("numpy", ["1.16", "1.19"])
            .with("zlib", ["1.2", "1.3"])
            .with("zip_keys", ["python", "numpy"])])
        .unwrap();
        let conformed = spec.conform_to_first("python");
        assert_eq!(conformed.get("python").unwrap().len(), 1);
        assert_eq!(conformed.get("numpy").unwrap().values[0].value, VariableValue::from("1.16"));
        assert_eq!(conformed.get("zlib").unwrap().len(), 2);
    }
}
