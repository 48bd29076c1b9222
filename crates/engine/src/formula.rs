//! Line-level view of a query formula
//!
//! A query formula is `let <steps> in <reference>` laid out over lines.
//! Nothing here parses the formula language: lines are classified by their
//! leading text only, so untouched lines survive byte-for-byte.

/// Keyword introducing the terminal reference.
pub const TERMINAL_KEYWORD: &str = "in";

/// Keyword opening the step list.
pub const LET_KEYWORD: &str = "let";

/// Indentation used when the formula gives no hint.
pub const DEFAULT_INDENT: &str = "    ";

/// Returns true if `line` opens the terminal reference.
///
/// The keyword is matched case-insensitively after leading whitespace and
/// must stand alone as a word: `in`, `in #"Step"` and `IN Source` match,
/// `Index = ...` and `Inserted = ...` do not.
pub fn is_terminal_line(line: &str) -> bool {
    starts_with_keyword(line, TERMINAL_KEYWORD)
}

/// Returns true if `line` is a bare `let` with nothing after it.
pub fn is_let_line(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(LET_KEYWORD)
}

fn starts_with_keyword(line: &str, keyword: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(head) = trimmed.get(..keyword.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(keyword) {
        return false;
    }
    match trimmed[keyword.len()..].chars().next() {
        None => true,
        Some(c) => c.is_whitespace(),
    }
}

/// Index of the first terminal-reference line, scanning from the top.
pub fn terminal_line_index<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
    lines.iter().position(|line| is_terminal_line(line.as_ref()))
}

/// Leading whitespace of a line.
pub fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Render a step name as it must appear in a formula.
///
/// Plain identifiers stay bare; anything else becomes a quoted identifier
/// with embedded quotes doubled.
pub fn render_reference(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        quote_identifier(name)
    }
}

/// Quote a name as `#"name"`.
pub fn quote_identifier(name: &str) -> String {
    format!("#\"{}\"", name.replace('"', "\"\""))
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn is_plain_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(is_identifier_char)
}

/// Read a quoted identifier at the start of `text`.
///
/// Returns the unquoted name and the remaining text after the closing quote.
fn read_quoted(text: &str) -> Option<(String, &str)> {
    let body = text.strip_prefix("#\"")?;
    let mut name = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '"' {
            if let Some(&(_, '"')) = chars.peek() {
                chars.next();
                name.push('"');
                continue;
            }
            return Some((name, &body[i + 1..]));
        }
        name.push(c);
    }
    None
}

/// Read a bare identifier at the start of `text`.
fn read_bare(text: &str) -> Option<(String, &str)> {
    let end = text
        .char_indices()
        .find(|&(_, c)| !is_identifier_char(c))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let name = &text[..end];
    if is_plain_identifier(name) {
        Some((name.to_string(), &text[end..]))
    } else {
        None
    }
}

fn read_name(text: &str) -> Option<(String, &str)> {
    if text.starts_with("#\"") {
        read_quoted(text)
    } else {
        read_bare(text)
    }
}

/// Parse a whole-text step reference (`Source`, `#"Changed Type"`).
///
/// A trailing `;` or `,` is tolerated. Returns None when anything other than
/// the reference is present.
pub fn parse_reference(text: &str) -> Option<String> {
    let text = text.trim().trim_end_matches([';', ',']).trim_end();
    let (name, rest) = read_name(text)?;
    if rest.is_empty() {
        Some(name)
    } else {
        None
    }
}

/// Name of the step defined on `line`, if the line is a step assignment.
///
/// Accepts `Name = ...`, `#"Quoted Name" = ...` and the single-line
/// `let Name = ...` form. `Name => ...` is not an assignment.
pub fn step_name_at(line: &str) -> Option<String> {
    let mut text = line.trim_start();
    if starts_with_keyword(text, LET_KEYWORD) {
        text = text[LET_KEYWORD.len()..].trim_start();
    }
    let (name, rest) = read_name(text)?;
    let rest = rest.trim_start().strip_prefix('=')?;
    if rest.starts_with('>') {
        return None;
    }
    Some(name)
}

/// Step named by the terminal reference, unquoted.
///
/// The reference may sit on the `in` line itself or on the next non-blank
/// line.
pub fn terminal_reference(formula: &str) -> Option<String> {
    let lines: Vec<&str> = formula.lines().collect();
    let index = terminal_line_index(&lines)?;
    terminal_reference_at(&lines, index)
}

pub(crate) fn terminal_reference_at<S: AsRef<str>>(lines: &[S], index: usize) -> Option<String> {
    let line = lines[index].as_ref().trim_start();
    let inline = line[TERMINAL_KEYWORD.len()..].trim();
    if !inline.is_empty() {
        return parse_reference(inline);
    }
    lines[index + 1..]
        .iter()
        .map(|l| l.as_ref())
        .find(|l| !l.trim().is_empty())
        .and_then(parse_reference)
}

/// Step names defined before the terminal line, in order.
///
/// Without a terminal line every line is considered.
pub fn defined_steps(formula: &str) -> Vec<String> {
    let lines: Vec<&str> = formula.lines().collect();
    let end = terminal_line_index(&lines).unwrap_or(lines.len());
    lines[..end].iter().filter_map(|line| step_name_at(line)).collect()
}

/// Number of step-assignment lines before the terminal line.
///
/// Blank lines and a bare `let` do not count.
pub fn step_line_count(formula: &str) -> usize {
    let lines: Vec<&str> = formula.lines().collect();
    let end = terminal_line_index(&lines).unwrap_or(lines.len());
    lines[..end]
        .iter()
        .filter(|line| !line.trim().is_empty() && !is_let_line(line))
        .count()
}

/// The step a new column should build on.
///
/// Prefers the terminal reference, then the last defined step, then
/// `Source`.
pub fn previous_step(formula: &str) -> String {
    terminal_reference(formula)
        .or_else(|| defined_steps(formula).pop())
        .unwrap_or_else(|| "Source".to_string())
}

/// Like [`previous_step`], but when the formula already ends in `step`
/// the new column builds on the step defined just before it.
pub fn previous_step_excluding(formula: &str, step: &str) -> String {
    if terminal_reference(formula).as_deref() != Some(step) {
        return previous_step(formula);
    }
    let steps = defined_steps(formula);
    match steps.iter().position(|name| name == step) {
        Some(i) if i > 0 => steps[i - 1].clone(),
        _ => "Source".to_string(),
    }
}

/// Byte length of `line` without a trailing `//` comment.
///
/// `//` inside a string literal (`"..."`, `""` escapes) or a quoted
/// identifier does not start a comment.
pub fn code_len(line: &str) -> usize {
    let mut in_string = false;
    let mut chars = line.char_indices().peekable();
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
            '/' if matches!(chars.peek(), Some(&(_, '/'))) => return i,
            _ => {}
        }
    }
    line.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMULA: &str = "let\n    Source = Csv.Document(File.Contents(\"sales.csv\")),\n    #\"Changed Type\" = Table.TransformColumnTypes(Source, {{\"Sales\", Int64.Type}})\nin\n    #\"Changed Type\"";

    #[test]
    fn test_terminal_keyword_is_word_bounded() {
        assert!(is_terminal_line("in"));
        assert!(is_terminal_line("  in"));
        assert!(is_terminal_line("IN #\"Step\""));
        assert!(is_terminal_line("in\tSource"));
        assert!(!is_terminal_line("    Index = Table.AddIndexColumn(Source, \"Index\", 1)"));
        assert!(!is_terminal_line("    Inserted = Source,"));
        assert!(!is_terminal_line("i"));
        assert!(!is_terminal_line(""));
    }

    #[test]
    fn test_terminal_line_index() {
        let lines: Vec<&str> = FORMULA.lines().collect();
        assert_eq!(terminal_line_index(&lines), Some(3));
        assert_eq!(terminal_line_index(&["let", "    Source = 1,"]), None);
    }

    #[test]
    fn test_step_name_at() {
        assert_eq!(step_name_at("    Source = Csv.Document(x),"), Some("Source".to_string()));
        assert_eq!(
            step_name_at("    #\"Changed Type\" = Table.TransformColumnTypes(Source, {})"),
            Some("Changed Type".to_string())
        );
        assert_eq!(step_name_at("let Source = 1,"), Some("Source".to_string()));
        assert_eq!(step_name_at("    fn = (x) => x + 1,"), Some("fn".to_string()));
        assert_eq!(step_name_at("    x => x + 1"), None);
        assert_eq!(step_name_at("    Table.AddColumn(Source)"), None);
        assert_eq!(step_name_at("let"), None);
    }

    #[test]
    fn test_quoted_names_with_escaped_quotes() {
        assert_eq!(
            step_name_at("  #\"Say \"\"hi\"\"\" = 1"),
            Some("Say \"hi\"".to_string())
        );
        assert_eq!(quote_identifier("Say \"hi\""), "#\"Say \"\"hi\"\"\"");
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(parse_reference("    #\"Changed Type\""), Some("Changed Type".to_string()));
        assert_eq!(parse_reference("Source;"), Some("Source".to_string()));
        assert_eq!(parse_reference("Source + 1"), None);
        assert_eq!(parse_reference("#\"unterminated"), None);
    }

    #[test]
    fn test_terminal_reference() {
        assert_eq!(terminal_reference(FORMULA), Some("Changed Type".to_string()));
        assert_eq!(
            terminal_reference("let\n    Source = 1\nin Source"),
            Some("Source".to_string())
        );
        assert_eq!(terminal_reference("let Source = 1"), None);
    }

    #[test]
    fn test_defined_steps_and_count() {
        assert_eq!(
            defined_steps(FORMULA),
            vec!["Source".to_string(), "Changed Type".to_string()]
        );
        assert_eq!(step_line_count(FORMULA), 2);
        assert_eq!(step_line_count("in\n    Source"), 0);
    }

    #[test]
    fn test_previous_step_fallbacks() {
        assert_eq!(previous_step(FORMULA), "Changed Type");
        assert_eq!(previous_step("let\n    Source = 1,\n    Next = 2"), "Next");
        assert_eq!(previous_step(""), "Source");
    }

    #[test]
    fn test_previous_step_skips_own_step() {
        let once = "let\n    Source = 1,\n    #\"Changed Type\" = Source,\n    #\"Added_X\" = 2\nin\n    #\"Added_X\"";
        assert_eq!(previous_step_excluding(once, "Added_X"), "Changed Type");
        assert_eq!(previous_step_excluding(once, "Added_Y"), "Added_X");
        assert_eq!(previous_step_excluding("let\n    Added_X = 1\nin\n    Added_X", "Added_X"), "Source");
    }

    #[test]
    fn test_unicode_identifiers() {
        assert_eq!(step_name_at("  é = 1"), Some("é".to_string()));
        assert_eq!(step_name_at("  Umsätze_2024 = Source,"), Some("Umsätze_2024".to_string()));
        assert_eq!(parse_reference("é"), Some("é".to_string()));
        assert_eq!(render_reference("Größe"), "Größe");
    }

    #[test]
    fn test_code_len_stops_at_comment() {
        assert_eq!(code_len("    Source = 1 // note"), "    Source = 1 ".len());
        assert_eq!(code_len("    Url = \"http://x\""), "    Url = \"http://x\"".len());
        assert_eq!(code_len("    #\"a//b\" = 1 // c"), "    #\"a//b\" = 1 ".len());
        assert_eq!(code_len("    Half = 1 / 2"), "    Half = 1 / 2".len());
    }

    #[test]
    fn test_render_reference() {
        assert_eq!(render_reference("Source"), "Source");
        assert_eq!(render_reference("Changed Type"), "#\"Changed Type\"");
        assert_eq!(render_reference("2024"), "#\"2024\"");
    }

    #[test]
    fn test_leading_whitespace() {
        assert_eq!(leading_whitespace("    x"), "    ");
        assert_eq!(leading_whitespace("\tx"), "\t");
        assert_eq!(leading_whitespace("x"), "");
    }
}
