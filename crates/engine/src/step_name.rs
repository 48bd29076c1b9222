//! Step naming for inserted columns
//!
//! Turns a free-text prompt or column label into a short identifier that is
//! safe to embed in a quoted step name: `#"Added_<label>"`.

use std::fmt;

use crate::formula;

/// Prefix of every step this tool inserts.
pub const STEP_PREFIX: &str = "Added_";

/// Label used when the input has no alphanumeric characters at all.
pub const FALLBACK_LABEL: &str = "Column";

/// Characters of input considered before sanitizing.
const LABEL_SOURCE_CHARS: usize = 30;

/// Maximum length of a sanitized label.
const LABEL_MAX_CHARS: usize = 20;

/// A step identifier, stored unquoted.
///
/// Displays as the quoted form used inside formulas (`#"Added_Sales"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName {
    label: String,
}

impl StepName {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }

    /// Parse either a quoted (`#"Name"`) or a bare (`Name`) step name.
    ///
    /// Returns None for empty input or an unterminated quoted name.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text.starts_with("#\"") {
            return formula::parse_reference(text).map(Self::new);
        }
        Some(Self::new(text))
    }

    /// The unquoted name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The name as written in a formula.
    pub fn quoted(&self) -> String {
        formula::quote_identifier(&self.label)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

/// Names derived for one inserted column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedNames {
    /// Step identifier, `Added_<label>`
    pub step: StepName,
    /// Sanitized label (never empty)
    pub label: String,
    /// Header of the new column as shown to users
    pub column: String,
}

/// Sanitize free text into an identifier-safe label.
///
/// Takes the first 30 characters, replaces every run of characters outside
/// `[A-Za-z0-9]` with one underscore, keeps at most 20 characters and trims
/// underscores from both ends. May return an empty string.
pub fn sanitize_label(text: &str) -> String {
    let mut out = String::new();
    let mut in_run = false;
    for c in text.chars().take(LABEL_SOURCE_CHARS) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let truncated: String = out.chars().take(LABEL_MAX_CHARS).collect();
    truncated.trim_matches('_').to_string()
}

/// Derive the step name and column label for a new column.
///
/// The explicit `column_label` wins when present and non-blank; otherwise
/// the prompt supplies the label.
pub fn derive(prompt: &str, column_label: Option<&str>) -> DerivedNames {
    let explicit = column_label.map(str::trim).filter(|l| !l.is_empty());
    let source = explicit.unwrap_or(prompt);

    let mut label = sanitize_label(source);
    if label.is_empty() {
        label = FALLBACK_LABEL.to_string();
    }

    let column = match explicit {
        Some(l) => l.to_string(),
        None => label.replace('_', " "),
    };

    DerivedNames {
        step: StepName::new(format!("{}{}", STEP_PREFIX, label)),
        label,
        column,
    }
}
