//! Lexing of template expressions and normalisation of recipe helper calls.
//!
//! Recipes call helpers with positional arguments (`compiler('c')`) and use a few
//! method-style idioms (`data.get('version', '')`). Tera functions and filters only
//! take named arguments, so before rendering every such call is rewritten into its
//! named form using the parameter lists from [`super::helpers::HELPERS`]. The
//! rewrite never adds or removes newlines, so error line numbers still point at
//! the recipe text.
//!
//! The same lexer feeds the usage analyzer, which needs identifiers and helper
//! calls with their literal arguments.

use super::helpers;

/// Kind of a template region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// `{{ ... }}`
    Expression,
    /// `{% ... %}`
    Statement,
}

/// The inside of one `{{ }}` or `{% %}` block, as byte offsets into the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Str,
    Number,
    Punct,
}

/// A lexed token with byte offsets relative to the lexed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl Token<'_> {
    fn is(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// One argument of a call, as raw expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Positional(String),
    Named(String, String),
}

impl CallArg {
    pub fn raw(&self) -> &str {
        match self {
            Self::Positional(raw) | Self::Named(_, raw) => raw,
        }
    }
}

/// A function call found in a template region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<CallArg>,
    /// Absolute offsets where each argument starts, parallel to `args`
    pub(crate) arg_starts: Vec<usize>,
    /// Absolute offset of the closing parenthesis
    pub(crate) close: usize,
}

impl FunctionCall {
    /// The argument bound to `param`, by name or by position in `params`.
    pub fn argument(&self, param: &str, params: &[&str]) -> Option<&str> {
        if let Some(CallArg::Named(_, raw)) =
            self.args.iter().find(|a| matches!(a, CallArg::Named(name, _) if name == param))
        {
            return Some(raw);
        }
        let position = params.iter().position(|p| *p == param)?;
        self.args
            .iter()
            .filter(|a| matches!(a, CallArg::Positional(_)))
            .nth(position)
            .map(CallArg::raw)
    }
}

/// The string value of a raw argument that is a single string literal.
pub fn string_literal(raw: &str) -> Option<String> {
    let tokens = lex(raw.trim());
    match tokens.as_slice() {
        [token] if token.kind == TokenKind::Str => Some(unquote(token.text)),
        _ => None,
    }
}

fn unquote(literal: &str) -> String {
    let inner = &literal[1..literal.len().saturating_sub(1).max(1)];
    inner.replace("\\'", "'").replace("\\\"", "\"")
}

/// Every `{{ }}` and `{% %}` region of a template, skipping comments and `raw` blocks.
pub fn template_regions(text: &str) -> Vec<Region> {
    let bytes = text.as_bytes();
    let mut regions = Vec::new();
    let mut pos = 0;
    let mut in_raw = false;

    while pos + 1 < bytes.len() {
        if bytes[pos] != b'{' {
            pos += 1;
            continue;
        }
        let (close, kind) = match bytes[pos + 1] {
            b'{' => ("}}", Some(RegionKind::Expression)),
            b'%' => ("%}", Some(RegionKind::Statement)),
            b'#' => ("#}", None),
            _ => {
                pos += 1;
                continue;
            }
        };
        let inner_start = pos + 2;
        let Some(inner_end) = find_close(text, inner_start, close) else {
            break;
        };
        pos = inner_end + 2;

        let Some(kind) = kind else {
            continue;
        };
        let start = inner_start + usize::from(bytes.get(inner_start) == Some(&b'-'));
        let end = if inner_end > start && bytes[inner_end - 1] == b'-' { inner_end - 1 } else { inner_end };
        let keyword = text[start..end].split_whitespace().next().unwrap_or("");

        if kind == RegionKind::Statement && keyword == "endraw" {
            in_raw = false;
            continue;
        }
        if in_raw {
            continue;
        }
        if kind == RegionKind::Statement && keyword == "raw" {
            in_raw = true;
            continue;
        }
        regions.push(Region {
            kind,
            start,
            end,
        });
    }
    regions
}

/// Offset of `close` after `from`, ignoring occurrences inside string literals.
fn find_close(text: &str, from: usize, close: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = from;
    let mut quote: Option<u8> = None;
    while pos < bytes.len() {
        let b = bytes[pos];
        match quote {
            Some(_) if b == b'\\' => pos += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' || b == b'`' => quote = Some(b),
            None if text[pos..].starts_with(close) => return Some(pos),
            None => {}
        }
        pos += 1;
    }
    None
}

/// Tokenize one expression.
pub fn lex(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let b = bytes[pos];
        let start = pos;
        let kind = if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        } else if b.is_ascii_alphabetic() || b == b'_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            TokenKind::Ident
        } else if b.is_ascii_digit() {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            TokenKind::Number
        } else if b == b'\'' || b == b'"' || b == b'`' {
            pos += 1;
            while pos < bytes.len() && bytes[pos] != b {
                if bytes[pos] == b'\\' {
                    pos += 1;
                }
                pos += 1;
            }
            pos = (pos + 1).min(bytes.len());
            TokenKind::Str
        } else {
            let two = text.get(pos..pos + 2).unwrap_or("");
            pos += if matches!(two, "==" | "!=" | "<=" | ">=" | "//" | "**") {
                2
            } else {
                text[pos..].chars().next().map_or(1, char::len_utf8)
            };
            TokenKind::Punct
        };
        tokens.push(Token {
            kind,
            text: &text[start..pos],
            start,
            end: pos,
        });
    }
    tokens
}

/// Function calls in one region, with absolute offsets. Method calls, filters and
/// tests (`x.f()`, `x | f()`, `x is f()`) are not function calls.
pub fn function_calls(text: &str, region: Region) -> Vec<FunctionCall> {
    let inner = &text[region.start..region.end];
    let tokens = lex(inner);
    let mut calls = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Ident || !tokens.get(idx + 1).is_some_and(|t| t.is("(")) {
            continue;
        }
        if idx > 0 {
            let prev = &tokens[idx - 1];
            if prev.is(".") || prev.is("|") || (prev.kind == TokenKind::Ident && prev.text == "is") {
                continue;
            }
        }
        if let Some(mut call) = parse_call(inner, &tokens, idx) {
            call.close += region.start;
            for start in &mut call.arg_starts {
                *start += region.start;
            }
            calls.push(call);
        }
    }
    calls
}

/// Filter calls (`x | name(args)`) in one region, with absolute offsets.
fn filter_calls(text: &str, region: Region) -> Vec<FunctionCall> {
    let inner = &text[region.start..region.end];
    let tokens = lex(inner);
    let mut calls = Vec::new();
    for idx in 1..tokens.len() {
        if tokens[idx].kind == TokenKind::Ident
            && tokens[idx - 1].is("|")
            && tokens.get(idx + 1).is_some_and(|t| t.is("("))
        {
            if let Some(mut call) = parse_call(inner, &tokens, idx) {
                call.close += region.start;
                for start in &mut call.arg_starts {
                    *start += region.start;
                }
                calls.push(call);
            }
        }
    }
    calls
}

/// Parse the call whose name token is `tokens[name_idx]`, offsets relative to `inner`.
fn parse_call(inner: &str, tokens: &[Token<'_>], name_idx: usize) -> Option<FunctionCall> {
    tokens.get(name_idx + 1)?;
    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut arg_starts = Vec::new();
    let mut arg_tokens: Vec<&Token<'_>> = Vec::new();

    let finish = |arg_tokens: &mut Vec<&Token<'_>>, args: &mut Vec<CallArg>, starts: &mut Vec<usize>| {
        if let (Some(first), Some(last)) = (arg_tokens.first(), arg_tokens.last()) {
            let raw = &inner[first.start..last.end];
            let named = arg_tokens.len() > 2 && arg_tokens[0].kind == TokenKind::Ident && arg_tokens[1].is("=");
            if named {
                let value = &inner[arg_tokens[2].start..last.end];
                args.push(CallArg::Named(first.text.to_string(), value.to_string()));
            } else {
                args.push(CallArg::Positional(raw.to_string()));
            }
            starts.push(first.start);
        }
        arg_tokens.clear();
    };

    for token in &tokens[name_idx + 2..] {
        if depth == 0 && token.is(")") {
            finish(&mut arg_tokens, &mut args, &mut arg_starts);
            return Some(FunctionCall {
                name: tokens[name_idx].text.to_string(),
                args,
                arg_starts,
                close: token.start,
            });
        }
        if depth == 0 && token.is(",") {
            finish(&mut arg_tokens, &mut args, &mut arg_starts);
            continue;
        }
        if token.is("(") || token.is("[") || token.is("{") {
            depth += 1;
        } else if token.is(")") || token.is("]") || token.is("}") {
            depth = depth.saturating_sub(1);
        }
        arg_tokens.push(token);
    }
    None
}

/// Parameter names of filters that recipes call positionally.
fn filter_params(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "replace" => Some(&["from", "to"]),
        "default" => Some(&["value"]),
        "join" => Some(&["sep"]),
        "split" => Some(&["pat"]),
        "round" => Some(&["method", "precision"]),
        "truncate" => Some(&["length"]),
        _ => None,
    }
}

/// Rewrite helper calls, positional filter calls, `.get(...)` and Python booleans
/// into the form Tera accepts.
pub fn normalize_template(text: &str) -> String {
    let mut edits: Vec<(usize, usize, String)> = Vec::new();

    for region in template_regions(text) {
        let mut named = |call: &FunctionCall, params: &[&str]| {
            let mut positional = 0;
            for (arg, &start) in call.args.iter().zip(&call.arg_starts) {
                if let CallArg::Positional(_) = arg {
                    if let Some(param) = params.get(positional) {
                        edits.push((start, start, format!("{param}=")));
                    }
                    positional += 1;
                }
            }
        };
        for call in function_calls(text, region) {
            if let Some(spec) = helpers::helper(&call.name) {
                named(&call, spec.params);
            }
        }
        for call in filter_calls(text, region) {
            if let Some(params) = filter_params(&call.name) {
                named(&call, params);
            }
        }

        let inner = &text[region.start..region.end];
        let tokens = lex(inner);
        for (idx, token) in tokens.iter().enumerate() {
            let abs = region.start + token.start;
            if token.kind == TokenKind::Ident && matches!(token.text, "True" | "False") {
                let prev_dot = idx > 0 && tokens[idx - 1].is(".");
                if !prev_dot {
                    edits.push((abs, abs + token.len(), token.text.to_lowercase()));
                }
            }
            if token.is(".")
                && tokens.get(idx + 1).is_some_and(|t| t.text == "get")
                && tokens.get(idx + 2).is_some_and(|t| t.is("("))
            {
                if let Some(call) = parse_call(inner, &tokens, idx + 1) {
                    if let Some(rewrite) = rewrite_get(&call) {
                        edits.push((abs, region.start + call.close + 1, rewrite));
                    }
                }
            }
        }
    }

    apply_edits(text, edits)
}

/// `.get('key', fallback)` → `.key | default(value=fallback)`.
fn rewrite_get(call: &FunctionCall) -> Option<String> {
    let key = call.args.first().map(CallArg::raw).and_then(string_literal)?;
    let fallback = call.args.get(1).map_or("\"\"", CallArg::raw);
    if key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !key.is_empty() {
        Some(format!(".{key} | default(value={fallback})"))
    } else {
        Some(format!("[\"{key}\"] | default(value={fallback})"))
    }
}

fn apply_edits(text: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    if edits.is_empty() {
        return text.to_string();
    }
    edits.sort_by_key(|(start, end, _)| (*start, *end));
    let mut out = String::with_capacity(text.len() + 64);
    let mut cursor = 0;
    for (start, end, replacement) in edits {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
