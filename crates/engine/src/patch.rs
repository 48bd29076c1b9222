//! Step insertion into a query formula
//!
//! Splices a new named step in front of the terminal `in` line, re-points
//! the terminal reference at it and repairs the comma separating it from
//! the step above. Works on lines, never on a syntax tree, so every line the
//! splice does not touch is returned unchanged.

use serde::{Deserialize, Serialize};

use crate::cleanup;
use crate::formula::{self, DEFAULT_INDENT, TERMINAL_KEYWORD};
use crate::step_name::StepName;

/// Successful outcome of a splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The formula with the new step in place
    Success(String),
    /// Nothing changed; the caller must not persist or report success
    NoOp,
}

/// Why a splice was refused. The input formula is never partially modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// No line begins with the terminal keyword
    MalformedFormula,
    /// The fragment is empty or whitespace
    EmptyFragment,
    /// The step name is already defined with a different expression
    StepNameCollision(StepName),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::MalformedFormula => write!(f, "Invalid formula: missing 'in' clause"),
            PatchError::EmptyFragment => write!(f, "Fragment is empty"),
            PatchError::StepNameCollision(step) => {
                write!(f, "Step {} already exists with a different expression", step)
            }
        }
    }
}

impl std::error::Error for PatchError {}

/// Insert `fragment` as step `step` ahead of the terminal reference.
///
/// Line breaks inside `fragment` are collapsed to single spaces. A trailing
/// newline and `\r\n` line endings in `old_formula` are preserved.
pub fn patch(old_formula: &str, step: &StepName, fragment: &str) -> Result<PatchOutcome, PatchError> {
    let fragment = single_line(fragment);
    if fragment.is_empty() {
        return Err(PatchError::EmptyFragment);
    }

    let mut lines: Vec<String> = old_formula.lines().map(str::to_string).collect();
    let in_index = formula::terminal_line_index(&lines).ok_or(PatchError::MalformedFormula)?;

    let indent = step_indentation(&lines, in_index);
    let step_line = format!("{}{} = {}", indent, step, fragment);

    if let Some(existing) = find_definition(&lines[..in_index], step) {
        let same_expression = existing.trim().trim_end_matches(',') == step_line.trim();
        let already_terminal =
            formula::terminal_reference_at(&lines, in_index).as_deref() == Some(step.label());
        return if same_expression && already_terminal {
            Ok(PatchOutcome::NoOp)
        } else {
            Err(PatchError::StepNameCollision(step.clone()))
        };
    }

    ensure_separator(&mut lines, in_index);

    let keyword_indent = formula::leading_whitespace(&lines[in_index]).to_string();
    lines.insert(in_index, step_line);
    let terminal = in_index + 1;
    lines[terminal] = format!("{}{}", keyword_indent, TERMINAL_KEYWORD);
    lines.insert(terminal + 1, format!("{}{}", indent, step));

    cleanup::remove_orphaned_reference(&mut lines, terminal + 1);

    let newline = if old_formula.contains("\r\n") { "\r\n" } else { "\n" };
    let mut patched = lines.join(newline);
    if old_formula.ends_with('\n') {
        patched.push_str(newline);
    }

    if patched.trim() == old_formula.trim() {
        return Ok(PatchOutcome::NoOp);
    }
    Ok(PatchOutcome::Success(patched))
}

fn single_line(fragment: &str) -> String {
    fragment
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_definition<'a>(step_lines: &'a [String], step: &StepName) -> Option<&'a String> {
    step_lines
        .iter()
        .find(|line| formula::step_name_at(line).as_deref() == Some(step.label()))
}

/// Indentation for the inserted step and the new terminal reference.
///
/// Copied from the nearest step line above the terminal line, else from the
/// old terminal reference, else the default.
fn step_indentation(lines: &[String], in_index: usize) -> String {
    if let Some(line) = lines[..in_index]
        .iter()
        .rev()
        .find(|line| formula::step_name_at(line).is_some())
    {
        let indent = formula::leading_whitespace(line);
        if !indent.is_empty() {
            return indent.to_string();
        }
    }
    let inline = lines[in_index].trim_start()[TERMINAL_KEYWORD.len()..].trim();
    if inline.is_empty() {
        if let Some(line) = lines[in_index + 1..].iter().find(|l| !l.trim().is_empty()) {
            let indent = formula::leading_whitespace(line);
            if !indent.is_empty() {
                return indent.to_string();
            }
        }
    }
    DEFAULT_INDENT.to_string()
}

/// Make sure the last step above the terminal line ends with a comma.
///
/// Skipped when there is no step above: the terminal line comes first, or
/// only a bare `let` precedes it. Comment-only lines are passed over and a
/// trailing `//` comment stays after the comma.
fn ensure_separator(lines: &mut [String], in_index: usize) {
    let Some(prev) = lines[..in_index]
        .iter()
        .rposition(|l| !l[..formula::code_len(l)].trim().is_empty())
    else {
        return;
    };
    let line = &lines[prev];
    let code = line[..formula::code_len(line)].trim_end();
    if formula::is_let_line(code) || code.ends_with(',') {
        return;
    }
    let comment = line[code.len()..].trim_end();
    let fixed = if comment.trim().is_empty() {
        format!("{},", code)
    } else {
        format!("{},{}", code, comment)
    };
    lines[prev] = fixed;
}

/// Status tag of a patch result, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Success,
    NoOp,
    MalformedFormula,
    StepNameCollision,
    EmptyFragment,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Success => "success",
            PatchStatus::NoOp => "no_op",
            PatchStatus::MalformedFormula => "malformed_formula",
            PatchStatus::StepNameCollision => "step_name_collision",
            PatchStatus::EmptyFragment => "empty_fragment",
        }
    }
}

/// Serializable `{status, formula?}` view of a patch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchReport {
    pub status: PatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl PatchReport {
    pub fn from_result(result: &Result<PatchOutcome, PatchError>) -> Self {
        let (status, formula) = match result {
            Ok(PatchOutcome::Success(text)) => (PatchStatus::Success, Some(text.clone())),
            Ok(PatchOutcome::NoOp) => (PatchStatus::NoOp, None),
            Err(PatchError::MalformedFormula) => (PatchStatus::MalformedFormula, None),
            Err(PatchError::EmptyFragment) => (PatchStatus::EmptyFragment, None),
            Err(PatchError::StepNameCollision(_)) => (PatchStatus::StepNameCollision, None),
        };
        Self { status, formula }
    }
}
