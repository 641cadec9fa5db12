//! Pure content transforms.
//!
//! Nothing in here touches the filesystem. A transform takes the current
//! content of a file and returns the new content plus the number of spans it
//! replaced; write-back is the job of [`crate::rewrite`].

use regex::Regex;
use serde::Deserialize;
use std::ops::Range;

/// How many matches a replacement may touch.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every match in the file.
    All,
    /// Only the first match, in file order.
    First,
    /// Exactly one match must exist.
    #[default]
    Unique,
}

/// Locates the spans a patch rewrites.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Literal substring.
    Text(String),
    /// Whole line, compared without its `\n` / `\r\n` terminator.
    Line(String),
    Regex(Regex),
}

impl Matcher {
    /// Byte spans of every match, in file order and non-overlapping.
    pub fn find_spans(&self, content: &str) -> Vec<Range<usize>> {
        match self {
            Matcher::Text(search) => content
                .match_indices(search.as_str())
                .map(|(start, m)| start..start + m.len())
                .collect(),
            Matcher::Line(line) => line_spans(content)
                .filter(|span| &content[span.clone()] == line)
                .collect(),
            Matcher::Regex(re) => re.find_iter(content).map(|m| m.range()).collect(),
        }
    }

    /// Whether `replacement` already sits in `content` the way this matcher
    /// would have put it there.
    ///
    /// Occurrences that overlap a current match don't count: in
    /// `# call()` the text `call()` is still the commented form.
    pub fn already_contains(&self, content: &str, replacement: &str) -> bool {
        let spans = self.find_spans(content);
        if replacement.is_empty() {
            return spans.is_empty();
        }

        let occurrences: Vec<Range<usize>> = match self {
            Matcher::Line(_) => line_spans(content)
                .filter(|span| &content[span.clone()] == replacement)
                .collect(),
            Matcher::Text(_) | Matcher::Regex(_) => content
                .match_indices(replacement)
                .map(|(start, m)| start..start + m.len())
                .collect(),
        };

        occurrences.iter().any(|occurrence| {
            !spans
                .iter()
                .any(|span| occurrence.start < span.end && span.start < occurrence.end)
        })
    }

    /// The literal text this matcher looks for, if it has one.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Matcher::Text(s) | Matcher::Line(s) => Some(s.as_str()),
            Matcher::Regex(_) => None,
        }
    }
}

/// Outcome of a successful replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub content: String,
    /// Number of spans rewritten (may be non-zero even if `content` is unchanged).
    pub replaced: usize,
}

impl Replacement {
    pub fn changed(&self, original: &str) -> bool {
        self.content != original
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    NoMatch,
    Ambiguous { count: usize },
}

/// Replace the spans found by `matcher` with `replacement`, honoring `scope`.
pub fn replace(
    content: &str,
    matcher: &Matcher,
    replacement: &str,
    scope: Scope,
) -> Result<Replacement, TransformError> {
    let mut spans = matcher.find_spans(content);

    if spans.is_empty() {
        return Err(TransformError::NoMatch);
    }

    match scope {
        Scope::All => {}
        Scope::First => spans.truncate(1),
        Scope::Unique => {
            if spans.len() > 1 {
                return Err(TransformError::Ambiguous { count: spans.len() });
            }
        }
    }

    Ok(Replacement {
        content: splice(content, &spans, replacement),
        replaced: spans.len(),
    })
}

/// Splice `replacement` into every span. Spans must be sorted and disjoint.
fn splice(content: &str, spans: &[Range<usize>], replacement: &str) -> String {
    let mut out = String::with_capacity(content.len() + spans.len() * replacement.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&content[cursor..span.start]);
        out.push_str(replacement);
        cursor = span.end;
    }
    out.push_str(&content[cursor..]);
    out
}

/// Spans of every line body, excluding terminators.
fn line_spans(content: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut offset = 0;
    content.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let body = raw.strip_suffix('\n').unwrap_or(raw);
        let body = body.strip_suffix('\r').unwrap_or(body);
        start..start + body.len()
    })
}

/// A line that nearly matches an expected literal.
#[derive(Debug, Clone, PartialEq)]
pub struct LineHint {
    /// 1-based.
    pub line_number: usize,
    pub text: String,
    pub similarity: f64,
}

const HINT_THRESHOLD: f64 = 0.75;

/// Find the line most similar to `expected`, if any is close enough to be
/// worth reporting.
pub fn closest_line(content: &str, expected: &str) -> Option<LineHint> {
    let expected = expected.trim();
    if expected.is_empty() {
        return None;
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| LineHint {
            line_number: idx + 1,
            text: line.to_string(),
            similarity: strsim::normalized_levenshtein(line.trim(), expected),
        })
        .filter(|hint| hint.similarity >= HINT_THRESHOLD)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_spans() {
        let m = Matcher::Text("ab".to_string());
        assert_eq!(m.find_spans("ab-ab-a"), vec![0..2, 3..5]);
    }

    #[test]
    fn test_line_match_requires_full_line() {
        let m = Matcher::Line("    x = 1".to_string());
        let content = "    x = 1\n    x = 10\n  x = 1\n";
        assert_eq!(m.find_spans(content), vec![0..9]);
    }

    #[test]
    fn test_line_match_crlf_and_missing_final_newline() {
        let m = Matcher::Line("x".to_string());
        assert_eq!(m.find_spans("a\r\nx\r\nx"), vec![3..4, 6..7]);
    }

    #[test]
    fn test_regex_alternation_all() {
        let m = Matcher::Regex(Regex::new(r#""mode":\s*"(?:white|black)""#).unwrap());
        let content = r#"{"mode": "black"} {"mode":"white"} {"mode": "grey"}"#;
        let out = replace(content, &m, r#""mode": "white""#, Scope::All).unwrap();
        assert_eq!(out.replaced, 2);
        assert_eq!(
            out.content,
            r#"{"mode": "white"} {"mode": "white"} {"mode": "grey"}"#
        );
    }

    #[test]
    fn test_scope_first_touches_one() {
        let m = Matcher::Text("[]".to_string());
        let out = replace("a = []\nb = []\n", &m, "[1]", Scope::First).unwrap();
        assert_eq!(out.content, "a = [1]\nb = []\n");
        assert_eq!(out.replaced, 1);
    }

    #[test]
    fn test_scope_unique_rejects_many() {
        let m = Matcher::Text("x".to_string());
        assert_eq!(
            replace("x x", &m, "y", Scope::Unique),
            Err(TransformError::Ambiguous { count: 2 })
        );
    }

    #[test]
    fn test_no_match() {
        let m = Matcher::Line("missing".to_string());
        assert_eq!(
            replace("present\n", &m, "y", Scope::All),
            Err(TransformError::NoMatch)
        );
    }

    #[test]
    fn test_unchanged_replacement_is_reported() {
        let m = Matcher::Text("same".to_string());
        let out = replace("same", &m, "same", Scope::Unique).unwrap();
        assert_eq!(out.replaced, 1);
        assert!(!out.changed("same"));
    }

    #[test]
    fn test_already_contains_line_is_exact() {
        let m = Matcher::Line("# call()".to_string());
        assert!(m.already_contains("a\ncall()\n", "call()"));
        assert!(!m.already_contains("a\n  call()\n", "call()"));
    }

    #[test]
    fn test_already_contains_ignores_text_inside_matches() {
        let m = Matcher::Text("# call()".to_string());
        assert!(!m.already_contains("# call()\n", "call()"));
        assert!(m.already_contains("call()\n# call()\n", "call()"));
    }

    #[test]
    fn test_already_contains_alongside_remaining_placeholder() {
        let m = Matcher::Text("p = []".to_string());
        assert!(m.already_contains("p = [1]\nx\np = []\n", "p = [1]"));
        assert!(!m.already_contains("p = []\nx\np = []\n", "p = [1]"));
    }

    #[test]
    fn test_closest_line_hint() {
        let content = "import os\n    #policies = RBAChecker.run_testing()\nreturn x\n";
        let hint = closest_line(content, "    # policies = RBAChecker.run_testing()").unwrap();
        assert_eq!(hint.line_number, 2);
        assert!(hint.text.contains("#policies"));
    }

    #[test]
    fn test_closest_line_none_when_unrelated() {
        assert!(closest_line("alpha\nbeta\n", "    # policies = run()").is_none());
    }
}
