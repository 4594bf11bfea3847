//! Selector expressions
//!
//! Recipe and variant-config lines may end with a selector comment such as
//! `- vs2015  # [win and py >= 35]`. A selector is a small boolean expression over
//! variant values and platform flags derived from them. In recipes a false selector
//! drops its line; on a variant value it makes that value inapplicable.
//!
//! Supported syntax: `and`, `or`, `not`, parentheses, the comparisons
//! `== != < <= > >= in`, `not in`, string and integer literals, `True`/`False`, and
//! the string methods `startswith(...)`/`endswith(...)`.
//!
//! Names that are not bound evaluate as undefined: undefined is falsy and every
//! comparison against it is false.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::VariaError;
use crate::variants::{VariableValue, Variant};

static SELECTOR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*#[^\[\]\n]*\[([^\[\]]+)\]\s*$").expect("selector pattern is valid")
});

static PY_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^py\d+$").expect("python flag pattern is valid"));

/// Platform flag names computed from `target_platform`.
pub const PLATFORM_FLAGS: &[&str] = &[
    "linux", "linux32", "linux64", "osx", "osx64", "win", "win32", "win64", "unix", "x86",
    "x86_64", "arm64", "aarch64", "ppc64le", "s390x", "armv6l", "armv7l",
];

/// Value of a name inside a selector namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Undefined,
}

impl SelectorValue {
    fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Undefined => false,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.parse().ok(),
            Self::Undefined => None,
        }
    }
}

/// Names available to selector evaluation.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    values: BTreeMap<String, SelectorValue>,
}

impl Namespace {
    /// Namespace for one variant: every string value plus the derived flags.
    pub fn for_variant(variant: &Variant) -> Self {
        let mut ns = Self::default();
        for (name, value) in variant.iter() {
            if let VariableValue::Str(s) = value {
                ns.values.insert(name.clone(), SelectorValue::Str(s.clone()));
            }
        }
        if let Some(platform) = variant.get_str("target_platform") {
            ns.add_platform_flags(platform);
        }
        if let Some(python) = variant.get_str("python") {
            ns.add_python_flags(python);
        }
        if let Some(numpy) = variant.get_str("numpy") {
            if let Some(np) = version_as_int(numpy) {
                ns.values.insert("np".to_string(), SelectorValue::Int(np));
            }
        }
        ns
    }

    /// Namespace holding only `target_platform` and its platform flags.
    pub fn for_platform(subdir: &str) -> Self {
        let mut ns = Self::default();
        ns.values.insert("target_platform".to_string(), SelectorValue::Str(subdir.to_string()));
        ns.add_platform_flags(subdir);
        ns
    }

    /// Bind a name, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: SelectorValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> SelectorValue {
        self.values.get(name).cloned().unwrap_or(SelectorValue::Undefined)
    }

    /// All bound flags as booleans, for exposing to templates.
    pub fn flags(&self) -> impl Iterator<Item = (&str, &SelectorValue)> {
        self.values
            .iter()
            .filter(|(name, _)| derived_source(name).is_some())
            .map(|(name, value)| (name.as_str(), value))
    }

    fn add_platform_flags(&mut self, subdir: &str) {
        let (platform, arch) = subdir.split_once('-').unwrap_or((subdir, ""));
        let flags = [
            ("linux", platform == "linux"),
            ("linux32", subdir == "linux-32"),
            ("linux64", subdir == "linux-64"),
            ("osx", platform == "osx"),
            ("osx64", subdir == "osx-64"),
            ("win", platform == "win"),
            ("win32", subdir == "win-32"),
            ("win64", subdir == "win-64"),
            ("unix", platform == "linux" || platform == "osx"),
            ("x86", arch == "32" || arch == "64"),
            ("x86_64", arch == "64"),
            ("arm64", arch == "arm64"),
            ("aarch64", arch == "aarch64"),
            ("ppc64le", arch == "ppc64le"),
            ("s390x", arch == "s390x"),
            ("armv6l", arch == "armv6l"),
            ("armv7l", arch == "armv7l"),
        ];
        for (name, value) in flags {
            self.values.insert(name.to_string(), SelectorValue::Bool(value));
        }
    }

    fn add_python_flags(&mut self, python: &str) {
        let Some(py) = version_as_int(python) else {
            return;
        };
        self.values.insert("py".to_string(), SelectorValue::Int(py));
        self.values.insert("py2k".to_string(), SelectorValue::Bool((20..30).contains(&py)));
        self.values.insert("py3k".to_string(), SelectorValue::Bool((30..40).contains(&py) || py >= 300));
        self.values.insert(format!("py{py}"), SelectorValue::Bool(true));
    }
}

/// Collapse a dotted version to the integer form used by `py` and `np` (`3.8` → 38).
fn version_as_int(version: &str) -> Option<i64> {
    let mut parts = version.split('.');
    let major = parts.next()?.trim();
    let minor = parts.next().unwrap_or("").trim();
    let digits: String = minor.chars().take_while(char::is_ascii_digit).collect();
    format!("{major}{digits}").parse().ok()
}

/// The variant variable a derived selector name is computed from.
///
/// ```
/// use varia_cli::selectors::derived_source;
///
/// assert_eq!(derived_source("win"), Some("target_platform"));
/// assert_eq!(derived_source("py27"), Some("python"));
/// assert_eq!(derived_source("zlib"), None);
/// ```
pub fn derived_source(name: &str) -> Option<&'static str> {
    if PLATFORM_FLAGS.contains(&name) {
        Some("target_platform")
    } else if name == "py" || name == "py2k" || name == "py3k" || PY_FLAG.is_match(name) {
        Some("python")
    } else if name == "np" {
        Some("numpy")
    } else {
        None
    }
}

/// Split a line into its content and trailing selector expression, if any.
pub fn split_selector(line: &str) -> Option<(&str, &str)> {
    let caps = SELECTOR_LINE.captures(line)?;
    let content = caps.get(1).map_or("", |m| m.as_str());
    let expr = caps.get(2)?.as_str();
    Some((content, expr))
}

/// Drop every line whose selector is false; strip selectors from the lines kept.
pub fn select_lines(text: &str, ns: &Namespace) -> Result<String, VariaError> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_end();
        match split_selector(line) {
            Some((content, expr)) => {
                if Selector::parse(expr)?.evaluate(ns) {
                    out.push_str(content);
                    out.push('\n');
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

/// A parsed selector expression.
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Selector {}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, VariaError> {
        let tokens = tokenize(source).map_err(|reason| VariaError::SelectorError {
            expression: source.to_string(),
            reason,
        })?;
        let mut parser = Parser {
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or().and_then(|expr| {
            if parser.pos == parser.tokens.len() {
                Ok(expr)
            } else {
                Err(format!("unexpected token {:?}", parser.tokens[parser.pos]))
            }
        });
        let expr = expr.map_err(|reason| VariaError::SelectorError {
            expression: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ns: &Namespace) -> bool {
        self.expr.eval(ns).truthy()
    }

    /// Every identifier the expression reads.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.expr.collect_identifiers(&mut out);
        out
    }

    /// Identifiers plus the variables derived flags are computed from.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for ident in self.identifiers() {
            if let Some(source) = derived_source(&ident) {
                out.insert(source.to_string());
            }
            out.insert(ident);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(&'static str),
    LParen,
    RParen,
    Dot,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    _ => return Err(format!("unexpected character '{c}'")),
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse().map_err(|_| format!("invalid integer '{text}'"))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, &'static str, Box<Expr>),
    Method(Box<Expr>, String, Box<Expr>),
    Ident(String),
    Literal(SelectorValue),
}

impl Expr {
    fn eval(&self, ns: &Namespace) -> SelectorValue {
        match self {
            Self::Or(a, b) => SelectorValue::Bool(a.eval(ns).truthy() || b.eval(ns).truthy()),
            Self::And(a, b) => SelectorValue::Bool(a.eval(ns).truthy() && b.eval(ns).truthy()),
            Self::Not(a) => SelectorValue::Bool(!a.eval(ns).truthy()),
            Self::Compare(a, op, b) => SelectorValue::Bool(compare(&a.eval(ns), op, &b.eval(ns))),
            Self::Method(target, method, arg) => {
                let (SelectorValue::Str(s), SelectorValue::Str(arg)) = (target.eval(ns), arg.eval(ns))
                else {
                    return SelectorValue::Bool(false);
                };
                SelectorValue::Bool(match method.as_str() {
                    "startswith" => s.starts_with(&arg),
                    "endswith" => s.ends_with(&arg),
                    _ => false,
                })
            }
            Self::Ident(name) => ns.get(name),
            Self::Literal(value) => value.clone(),
        }
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Or(a, b) | Self::And(a, b) | Self::Compare(a, _, b) | Self::Method(a, _, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
            Self::Not(a) => a.collect_identifiers(out),
            Self::Ident(name) => {
                out.insert(name.clone());
            }
            Self::Literal(_) => {}
        }
    }
}

fn compare(a: &SelectorValue, op: &str, b: &SelectorValue) -> bool {
    if matches!(a, SelectorValue::Undefined) || matches!(b, SelectorValue::Undefined) {
        return false;
    }
    match op {
        "in" | "not in" => {
            let (SelectorValue::Str(needle), SelectorValue::Str(hay)) = (a, b) else {
                return false;
            };
            hay.contains(needle.as_str()) == (op == "in")
        }
        _ => {
            let ordering = match (a, b) {
                (SelectorValue::Str(x), SelectorValue::Str(y)) => x.cmp(y),
                _ => match (a.as_int(), b.as_int()) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => return false,
                },
            };
            match op {
                "==" => ordering.is_eq(),
                "!=" => ordering.is_ne(),
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                ">=" => ordering.is_ge(),
                _ => false,
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let first = self.parse_primary()?;
        let mut result: Option<Expr> = None;
        let mut left = first;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                Some(Token::Ident(word)) if word == "in" => "in",
                Some(Token::Ident(word))
                    if word == "not"
                        && matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(w)) if w == "in") =>
                {
                    self.pos += 1;
                    "not in"
                }
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_primary()?;
            // Chained comparisons: a < b < c means a < b and b < c
            let cmp = Expr::Compare(Box::new(left), op, Box::new(right.clone()));
            result = Some(match result {
                Some(prev) => Expr::And(Box::new(prev), Box::new(cmp)),
                None => cmp,
            });
            left = right;
        }
        Ok(result.unwrap_or(left))
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let expr = match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => inner,
                    _ => return Err("missing ')'".to_string()),
                }
            }
            Some(Token::Str(s)) => Expr::Literal(SelectorValue::Str(s)),
            Some(Token::Int(i)) => Expr::Literal(SelectorValue::Int(i)),
            Some(Token::Ident(name)) if name == "True" => Expr::Literal(SelectorValue::Bool(true)),
            Some(Token::Ident(name)) if name == "False" => Expr::Literal(SelectorValue::Bool(false)),
            Some(Token::Ident(name)) if matches!(name.as_str(), "and" | "or" | "in") => {
                return Err(format!("unexpected keyword '{name}'"));
            }
            Some(Token::Ident(name)) => Expr::Ident(name),
            Some(other) => return Err(format!("unexpected token {other:?}")),
            None => return Err("unexpected end of expression".to_string()),
        };
        self.parse_method_suffix(expr)
    }

    fn parse_method_suffix(&mut self, expr: Expr) -> Result<Expr, String> {
        if self.peek() != Some(&Token::Dot) {
            return Ok(expr);
        }
        self.pos += 1;
        let Some(Token::Ident(method)) = self.next() else {
            return Err("expected method name after '.'".to_string());
        };
        if self.next() != Some(Token::LParen) {
            return Err(format!("expected '(' after '{method}'"));
        }
        let arg = self.parse_or()?;
        if self.peek() == Some(&Token::Comma) {
            return Err(format!("{method}() takes one argument"));
        }
        if self.next() != Some(Token::RParen) {
            return Err(format!("missing ')' after {method}("));
        }
        Ok(Expr::Method(Box::new(expr), method, Box::new(arg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(pairs: &[(&str, &str)]) -> Variant {
        let mut v = Variant::default();
        for (k, val) in pairs {
            v.insert(*k, VariableValue::from(*val));
        }
        v
    }

    fn eval(expr: &str, ns: &Namespace) -> bool {
        Selector::parse(expr).unwrap().evaluate(ns)
    }

    #[test]
    fn test_platform_flags() {
        let ns = Namespace::for_platform("win-64");
        assert!(eval("win", &ns));
        assert!(eval("win64 and x86_64", &ns));
        assert!(!eval("linux or osx", &ns));
        assert!(eval("not unix", &ns));
        assert!(eval("target_platform == 'win-64'", &ns));
        assert!(eval("target_platform.startswith('win')", &ns));

        let ns = Namespace::for_platform("osx-arm64");
        assert!(eval("osx and arm64", &ns));
        assert!(!eval("x86", &ns));
    }

    #[test]
    fn test_python_flags_and_comparisons() {
        let ns = Namespace::for_variant(&variant(&[("python", "3.10"), ("numpy", "1.21")]));
        assert!(eval("py >= 38", &ns));
        assert!(eval("py == 310", &ns));
        assert!(eval("py3k and not py2k", &ns));
        assert!(eval("py310", &ns));
        assert!(!eval("py27", &ns));
        assert!(eval("np > 120", &ns));
        assert!(eval("36 <= py < 400", &ns));
        assert!(eval("python == '3.10'", &ns));
    }

    #[test]
    fn test_undefined_names_are_false() {
        let ns = Namespace::default();
        assert!(!eval("win", &ns));
        assert!(!eval("py >= 30", &ns));
        assert!(!eval("py < 30", &ns));
        assert!(eval("not win", &ns));
    }

    #[test]
    fn test_in_operator() {
        let ns = Namespace::for_platform("linux-aarch64");
        assert!(eval("'aarch64' in target_platform", &ns));
        assert!(eval("'ppc' not in target_platform", &ns));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Selector::parse("win and").is_err());
        assert!(Selector::parse("(win").is_err());
        assert!(Selector::parse("py = 3").is_err());
        assert!(Selector::parse("'open").is_err());
    }

    #[test]
    fn test_variables_include_derived_sources() {
        let selector = Selector::parse("win and py >= 35 or vc == '14'").unwrap();
        let vars = selector.variables();
        assert!(vars.contains("target_platform"));
        assert!(vars.contains("python"));
        assert!(vars.contains("vc"));
        assert!(vars.contains("win"));
    }

    #[test]
    fn test_split_selector() {
        assert_eq!(split_selector("  - vs2015  # [win]"), Some(("  - vs2015", "win")));
        assert_eq!(
            split_selector("  - gcc  # native compiler [linux]"),
            Some(("  - gcc", "linux"))
        );
        assert_eq!(split_selector("  - [a, b]"), None);
        assert_eq!(split_selector("name: foo"), None);
    }

    #[test]
    fn test_select_lines() {
        let text = "requirements:\n  build:\n    - msvc  # [win]\n    - gcc  # [linux]\n    - make\n";
        let selected = select_lines(text, &Namespace::for_platform("linux-64")).unwrap();
        assert_eq!(selected, "requirements:\n  build:\n    - gcc\n    - make\n");
    }

    #[test]
    fn test_select_lines_rejects_bad_selector() {
        let result = select_lines("  - foo  # [win and]\n", &Namespace::default());
        assert!(matches!(result, Err(VariaError::SelectorError { .. })));
    }
}
