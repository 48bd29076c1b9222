//! Section documents
//!
//! A Power Query export holds every query of a workbook as a `shared`
//! member of one section:
//!
//! ```text
//! section Section1;
//!
//! shared Table1 = let
//!     Source = Excel.CurrentWorkbook(){[Name="Table1"]}[Content]
//! in
//!     Source;
//!
//! shared #"Sales Data" = ...;
//! ```
//!
//! The document is kept as a list of raw text segments and members so that
//! rendering reproduces every untouched byte. Only the formula of a member
//! that was explicitly replaced changes.

use std::fmt;

/// Error parsing a section document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionParseError {
    /// 1-based line of the offending construct
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SectionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for SectionParseError {}

#[derive(Debug, Clone)]
enum Segment {
    Raw(String),
    Member(Member),
}

#[derive(Debug, Clone)]
struct Member {
    /// Unquoted query name
    name: String,
    /// `shared <name> =` plus the whitespace before the formula
    head: String,
    formula: String,
    /// Whitespace between the formula and its `;`
    gap: String,
}

/// A parsed section document.
#[derive(Debug, Clone, Default)]
pub struct SectionDocument {
    segments: Vec<Segment>,
}

impl SectionDocument {
    pub fn parse(text: &str) -> Result<Self, SectionParseError> {
        let mut scanner = Scanner::new(text);
        let mut segments = Vec::new();
        let mut raw_start = 0;

        while let Some(start) = scanner.next_shared_keyword() {
            if start > raw_start {
                segments.push(Segment::Raw(text[raw_start..start].to_string()));
            }
            let member = scanner.member(start)?;
            raw_start = scanner.pos;
            segments.push(Segment::Member(member));
        }
        if raw_start < text.len() {
            segments.push(Segment::Raw(text[raw_start..].to_string()));
        }

        Ok(Self { segments })
    }

    /// Query names in document order.
    pub fn query_names(&self) -> Vec<String> {
        self.members().map(|m| m.name.clone()).collect()
    }

    pub fn formula(&self, query: &str) -> Option<&str> {
        self.members().find(|m| m.name == query).map(|m| m.formula.as_str())
    }

    /// Replace a member's formula. Returns false if the query does not exist.
    pub fn set_formula(&mut self, query: &str, formula: &str) -> bool {
        let member = self.segments.iter_mut().find_map(|s| match s {
            Segment::Member(m) if m.name == query => Some(m),
            _ => None,
        });
        match member {
            Some(m) => {
                m.formula = formula.trim_end().to_string();
                true
            }
            None => false,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Raw(text) => out.push_str(text),
                Segment::Member(m) => {
                    out.push_str(&m.head);
                    out.push_str(&m.formula);
                    out.push_str(&m.gap);
                    out.push(';');
                }
            }
        }
        out
    }

    fn members(&self) -> impl Iterator<Item = &Member> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Member(m) => Some(m),
            Segment::Raw(_) => None,
        })
    }
}

const SHARED_KEYWORD: &str = "shared";

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

/// Byte scanner aware of string literals and comments.
///
/// Every structural character is ASCII, so byte positions always fall on
/// UTF-8 boundaries when slicing.
struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn line_at(&self, offset: usize) -> usize {
        self.bytes[..offset.min(self.bytes.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SectionParseError {
        SectionParseError {
            line: self.line_at(offset),
            message: message.into(),
        }
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.bytes[self.pos..].starts_with(pat.as_bytes())
    }

    /// Skip a string literal or comment at `pos`. Returns false if there is
    /// none. An unterminated literal runs to the end of the text.
    fn skip_literal(&mut self) -> bool {
        if self.starts_with("\"") {
            self.pos += 1;
            while self.pos < self.bytes.len() {
                if self.bytes[self.pos] == b'"' {
                    if self.bytes.get(self.pos + 1) == Some(&b'"') {
                        self.pos += 2;
                        continue;
                    }
                    self.pos += 1;
                    return true;
                }
                self.pos += 1;
            }
            return true;
        }
        if self.starts_with("//") {
            while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                self.pos += 1;
            }
            return true;
        }
        if self.starts_with("/*") {
            match self.text[self.pos + 2..].find("*/") {
                Some(end) => self.pos += end + 4,
                None => self.pos = self.bytes.len(),
            }
            return true;
        }
        false
    }

    /// Advance to the next top-level `shared` keyword and return its offset.
    fn next_shared_keyword(&mut self) -> Option<usize> {
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            if self.skip_literal() {
                continue;
            }
            let b = self.bytes[self.pos];
            match b {
                b'[' | b'(' | b'{' => depth += 1,
                b']' | b')' | b'}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            if depth == 0 && self.starts_with(SHARED_KEYWORD) {
                let before = self.pos.checked_sub(1).map(|i| self.bytes[i]);
                let after = self.bytes.get(self.pos + SHARED_KEYWORD.len()).copied();
                let bounded_before = before.map_or(true, |c| !is_identifier_byte(c));
                let bounded_after = after.map_or(false, |c| c.is_ascii_whitespace());
                if bounded_before && bounded_after {
                    return Some(self.pos);
                }
            }
            self.pos += 1;
        }
        None
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn member(&mut self, start: usize) -> Result<Member, SectionParseError> {
        self.pos = start + SHARED_KEYWORD.len();
        self.skip_whitespace();
        let name = self.member_name()?;
        self.skip_whitespace();
        if !self.starts_with("=") {
            return Err(self.error(self.pos, format!("expected '=' after member '{}'", name)));
        }
        self.pos += 1;
        self.skip_whitespace();
        let head = self.text[start..self.pos].to_string();

        let body_start = self.pos;
        let end = self
            .terminator()
            .ok_or_else(|| self.error(start, format!("member '{}' has no terminating ';'", name)))?;
        let body = &self.text[body_start..end];
        let formula = body.trim_end();
        let gap = &body[formula.len()..];
        self.pos = end + 1;

        Ok(Member {
            name,
            head,
            formula: formula.to_string(),
            gap: gap.to_string(),
        })
    }

    fn member_name(&mut self) -> Result<String, SectionParseError> {
        if self.starts_with("#\"") {
            let open = self.pos + 1;
            self.pos = open;
            self.skip_literal();
            let close = self.pos;
            if close <= open + 1 || self.bytes[close - 1] != b'"' {
                return Err(self.error(open, "unterminated quoted member name"));
            }
            return Ok(self.text[open + 1..close - 1].replace("\"\"", "\""));
        }

        let begin = self.pos;
        while self.pos < self.bytes.len() && is_identifier_byte(self.bytes[self.pos]) {
            self.pos += 1;
        }
        if self.pos == begin {
            return Err(self.error(begin, "expected member name after 'shared'"));
        }
        Ok(self.text[begin..self.pos].to_string())
    }

    /// Offset of the `;` ending the member body, starting at `pos`.
    fn terminator(&mut self) -> Option<usize> {
        while self.pos < self.bytes.len() {
            if self.skip_literal() {
                continue;
            }
            if self.bytes[self.pos] == b';' {
                return Some(self.pos);
            }
            self.pos += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "section Section1;\r\n\r\nshared Table1 = let\r\n    Source = Excel.CurrentWorkbook(){[Name=\"Table1\"]}[Content],\r\n    #\"Changed Type\" = Table.TransformColumnTypes(Source,{{\"Sales\", Int64.Type}})\r\nin\r\n    #\"Changed Type\";\r\n\r\n// lookup table\r\n[ Description = \"shared rates; do not edit\" ]\r\nshared #\"Rates \"\"2024\"\"\" = #table({\"Rate\"}, {{1}}) ;\r\n";

    #[test]
    fn test_query_names_in_order() {
        let doc = SectionDocument::parse(DOC).unwrap();
        assert_eq!(doc.query_names(), vec!["Table1", "Rates \"2024\""]);
    }

    #[test]
    fn test_formula_is_member_body() {
        let doc = SectionDocument::parse(DOC).unwrap();
        let formula = doc.formula("Table1").unwrap();
        assert!(formula.starts_with("let\r\n    Source"));
        assert!(formula.ends_with("in\r\n    #\"Changed Type\""));
        assert_eq!(doc.formula("Rates \"2024\""), Some("#table({\"Rate\"}, {{1}})"));
        assert_eq!(doc.formula("Missing"), None);
    }

    #[test]
    fn test_render_is_byte_identical() {
        let doc = SectionDocument::parse(DOC).unwrap();
        assert_eq!(doc.render(), DOC);
    }

    #[test]
    fn test_set_formula_touches_one_member() {
        let mut doc = SectionDocument::parse(DOC).unwrap();
        assert!(doc.set_formula("Table1", "let\n    Source = 1\nin\n    Source\n"));
        let out = doc.render();
        assert!(out.contains("shared Table1 = let\n    Source = 1\nin\n    Source;"));
        assert!(out.ends_with("shared #\"Rates \"\"2024\"\"\" = #table({\"Rate\"}, {{1}}) ;\r\n"));
        assert!(!doc.set_formula("Nope", "1"));
    }

    #[test]
    fn test_semicolons_in_strings_and_comments() {
        let text = "section S;\nshared Q = let\n    // a; b\n    A = \"x;y\",\n    /* ; */ B = A\nin\n    B;\n";
        let doc = SectionDocument::parse(text).unwrap();
        assert!(doc.formula("Q").unwrap().ends_with("in\n    B"));
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn test_shared_inside_identifier_ignored() {
        let text = "section S;\nshared Q = let\n    unshared = 1\nin\n    unshared;\n";
        let doc = SectionDocument::parse(text).unwrap();
        assert_eq!(doc.query_names(), vec!["Q"]);
    }

    #[test]
    fn test_missing_terminator() {
        let text = "section S;\n\nshared Q = let\n    A = 1\nin\n    A\n";
        let err = SectionDocument::parse(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("no terminating ';'"));
    }

    #[test]
    fn test_missing_equals() {
        let err = SectionDocument::parse("section S;\nshared Q let A = 1 in A;").unwrap_err();
        assert!(err.message.contains("expected '='"));
    }

    #[test]
    fn test_document_without_members() {
        let doc = SectionDocument::parse("section Section1;\n").unwrap();
        assert!(doc.query_names().is_empty());
        assert_eq!(doc.render(), "section Section1;\n");
    }
}
