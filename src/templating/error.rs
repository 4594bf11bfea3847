//! Structured template errors for recipe rendering
//!
//! Tera errors are parsed into [`TemplateError`] values that carry the recipe, the line
//! and a few lines of surrounding template text so authors can find the fault.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Template errors with location context
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Invalid template text (unclosed delimiters, bad expressions)
    #[error("Template syntax error in {location}: {message}")]
    SyntaxError {
        message: String,
        location: Box<ErrorLocation>,
    },

    /// The template parsed but failed while being evaluated (math on a string,
    /// iterating a scalar, a failed test)
    #[error("Template evaluation error in {location}: {message}")]
    EvaluationError {
        message: String,
        location: Box<ErrorLocation>,
    },

    /// A lookup failed that could not be turned into an undefined marker
    ///
    /// Plain unbound names never produce this error; they are bound to the undefined
    /// sentinel and retried. This is raised for attribute lookups on bound values.
    #[error("Template variable not found in {location}: '{variable}'")]
    VariableNotFound {
        variable: String,
        suggestions: Vec<String>,
        location: Box<ErrorLocation>,
    },

    /// A recipe helper function rejected its arguments
    #[error("Helper {helper}() failed in {location}: {message}")]
    HelperFailed {
        helper: String,
        message: String,
        location: Box<ErrorLocation>,
    },

    /// A function that is not registered was called
    #[error("Unknown function '{name}' in {location}")]
    UnknownFunction {
        name: String,
        location: Box<ErrorLocation>,
    },
}

/// Location information for template errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Recipe name or path used in messages
    pub recipe: String,
    /// Recipe file if known
    pub file_path: Option<PathBuf>,
    /// Line number if available from Tera
    pub line_number: Option<usize>,
    /// Surrounding template lines as `(line number, text)`
    pub context_lines: Option<Vec<(usize, String)>>,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_path, self.line_number) {
            (Some(path), Some(line)) => write!(f, "{}:{}", path.display(), line),
            (Some(path), None) => write!(f, "{}", path.display()),
            (None, Some(line)) => write!(f, "{} (line {})", self.recipe, line),
            (None, None) => write!(f, "{}", self.recipe),
        }
    }
}

impl TemplateError {
    /// The location the error refers to.
    #[must_use]
    pub fn location(&self) -> &ErrorLocation {
        match self {
            Self::SyntaxError {
                location,
                ..
            }
            | Self::EvaluationError {
                location,
                ..
            }
            | Self::VariableNotFound {
                location,
                ..
            }
            | Self::HelperFailed {
                location,
                ..
            }
            | Self::UnknownFunction {
                location,
                ..
            } => location,
        }
    }

    /// Generate a multi-line, user-friendly message with context and suggestions
    pub fn format_with_context(&self) -> String {
        let mut msg = String::new();
        let location = self.location();

        match self {
            Self::SyntaxError {
                message,
                ..
            } => {
                msg.push_str("ERROR: Template Syntax Error\n\n");
                msg.push_str(&format!("Error: {message}\n"));
            }
            Self::EvaluationError {
                message,
                ..
            } => {
                msg.push_str("ERROR: Template Evaluation Error\n\n");
                msg.push_str(&format!("Error: {message}\n"));
            }
            Self::VariableNotFound {
                variable,
                ..
            } => {
                msg.push_str("ERROR: Template Variable Not Found\n\n");
                msg.push_str(&format!("Variable: {variable}\n"));
            }
            Self::HelperFailed {
                helper,
                message,
                ..
            } => {
                msg.push_str("ERROR: Helper Function Failed\n\n");
                msg.push_str(&format!("Helper: {helper}\n"));
                msg.push_str(&format!("Error: {message}\n"));
            }
            Self::UnknownFunction {
                name,
                ..
            } => {
                msg.push_str("ERROR: Unknown Function\n\n");
                msg.push_str(&format!("Function: {name}\n"));
            }
        }

        msg.push_str(&format!("Recipe: {}\n", location.recipe));
        if let Some(line) = location.line_number {
            msg.push_str(&format!("Line: {line}\n"));
        }

        if let Some(lines) = &location.context_lines {
            msg.push('\n');
            for (number, text) in lines {
                let marker = if Some(*number) == location.line_number {
                    ">"
                } else {
                    " "
                };
                msg.push_str(&format!("{marker} {number:>4} | {text}\n"));
            }
        }

        if let Self::VariableNotFound {
            suggestions,
            ..
        } = self
        {
            if !suggestions.is_empty() {
                msg.push_str("\nDid you mean one of these?\n");
                for suggestion in suggestions {
                    msg.push_str(&format!("  - {suggestion}\n"));
                }
            }
        }

        if matches!(self, Self::SyntaxError { .. }) {
            msg.push_str("\nSUGGESTION: Check template syntax for unclosed tags or invalid expressions.\n");
            msg.push_str("Common issues:\n");
            msg.push_str("  - Unclosed {{ }} or {% %} delimiters\n");
            msg.push_str("  - Filters called with positional arguments\n");
            msg.push_str("  - Missing quotes around string values\n");
        }

        msg
    }
}
