//! Cleanup of model-produced fragments
//!
//! Language models wrap code in Markdown fences, add prose, or return only
//! the column expression instead of the whole `Table.AddColumn` call. This
//! module turns such output into the single-line step expression the patcher
//! expects. It never checks that the expression is valid M.

use once_cell::sync::Lazy;
use regex::Regex;

/// Call every usable fragment is expected to be.
const ADD_COLUMN_CALL: &str = "Table.AddColumn(";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex"));

/// Error normalizing a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Nothing usable was left after cleanup
    Empty,
}

impl std::fmt::Display for FragmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentError::Empty => write!(f, "Model returned no usable expression"),
        }
    }
}

impl std::error::Error for FragmentError {}

/// Normalize raw model output into a single-line step expression.
///
/// `previous_step` is the rendered reference the new column builds on and
/// `column` the header of the new column; both are only used when the model
/// returned a bare column expression that has to be wrapped.
pub fn normalize_fragment(raw: &str, previous_step: &str, column: &str) -> Result<String, FragmentError> {
    let text = strip_fences(raw);

    let expression = match text.find(ADD_COLUMN_CALL) {
        Some(start) => {
            let call = &text[start..];
            let end = matching_paren(call).map(|i| i + 1).unwrap_or(call.len());
            collapse(&call[..end])
        }
        None => collapse(text),
    };
    let expression = expression.trim_end_matches([',', ';']).trim_end().to_string();

    if expression.is_empty() {
        return Err(FragmentError::Empty);
    }
    if expression.starts_with("Table.") {
        return Ok(expression);
    }

    let body = match expression.strip_prefix("each") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => expression.as_str(),
    };
    if body.is_empty() {
        return Err(FragmentError::Empty);
    }
    Ok(format!(
        "Table.AddColumn({}, \"{}\", each {})",
        previous_step,
        column.replace('"', "\"\""),
        body
    ))
}

fn strip_fences(raw: &str) -> &str {
    match FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim().trim_matches('`').trim(),
    }
}

/// Join lines with single spaces, dropping blank ones.
fn collapse(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Byte index of the parenthesis closing the first `(` in `text`.
///
/// String literals (`"..."` with `""` escapes) are skipped.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if in_string {
            if c == '"' {
                if let Some(&(_, '"')) = chars.peek() {
                    chars.next();
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
