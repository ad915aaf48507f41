//! Lexical helpers shared by the rewrite passes
//!
//! - Comment stripping (`//` and `/* */`) that leaves string and char literals intact
//! - Collection of names imported through `using` directives
//! - Word tokenization used for token-boundary matching

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Lexer state while walking a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Str,
    VerbatimStr,
    Char,
    LineComment,
    BlockComment,
}

/// Remove line and block comments, returning the stripped text and the number
/// of comments removed.
///
/// Line comments are cut up to (not including) the newline. Comment markers
/// inside string or char literals are kept.
pub fn strip_comments(source: &str) -> (String, usize) {
    let mut result = String::with_capacity(source.len());
    let mut count = 0;
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    count += 1;
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    count += 1;
                    state = State::BlockComment;
                }
                '"' => {
                    state = if is_verbatim_prefix(&result) {
                        State::VerbatimStr
                    } else {
                        State::Str
                    };
                    result.push(c);
                }
                '\'' => {
                    state = State::Char;
                    result.push(c);
                }
                _ => result.push(c),
            },
            State::Str | State::Char => {
                result.push(c);
                let close = if state == State::Str { '"' } else { '\'' };
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        result.push(escaped);
                    }
                } else if c == close || c == '\n' {
                    // Unterminated literals end at the line break
                    state = State::Code;
                }
            }
            State::VerbatimStr => {
                result.push(c);
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        result.push('"');
                        chars.next();
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                // Keep CRLF line endings intact
                if c == '\r' && chars.peek() == Some(&'\n') {
                    result.push(c);
                } else if c == '\n' {
                    result.push(c);
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }

    (result, count)
}

/// `@"..."`, `@$"..."` and `$@"..."` are verbatim strings
fn is_verbatim_prefix(preceding: &str) -> bool {
    let mut tail = preceding.chars().rev();
    match (tail.next(), tail.next()) {
        (Some('@'), _) => true,
        (Some('$'), Some('@')) => true,
        _ => false,
    }
}

fn using_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?:global\s+)?using\s+(?:static\s+)?(?:[A-Za-z_]\w*\s*=\s*)?([A-Za-z_][\w.]*)\s*;",
        )
        .expect("using directive pattern")
    })
}

/// Add the last path segment of every `using` directive in `source` to `externals`
///
/// Returns how many new names were added.
pub fn collect_external_symbols(source: &str, externals: &mut HashSet<String>) -> usize {
    let mut added = 0;
    for caps in using_regex().captures_iter(source) {
        let path = &caps[1];
        if let Some(last) = path.rsplit('.').next().filter(|s| !s.is_empty()) {
            if externals.insert(last.to_string()) {
                added += 1;
            }
        }
    }
    added
}

pub(crate) fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("word pattern"))
}

/// Iterate over maximal runs of word characters
pub fn word_tokens(text: &str) -> impl Iterator<Item = &str> {
    word_regex().find_iter(text).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_comment() {
        let (result, count) = strip_comments("int x = 5; // set x\nint y = 6;");
        assert_eq!(result, "int x = 5; \nint y = 6;");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_line_comment_keeps_crlf() {
        let (result, _) = strip_comments("a; // note\r\nb;\r\n");
        assert_eq!(result, "a; \r\nb;\r\n");
    }

    #[test]
    fn test_strip_block_comment_across_lines() {
        let (result, count) = strip_comments("a /* one\n two */ b");
        assert_eq!(result, "a  b");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_preserve_comment_markers_in_strings() {
        let source = r#"var url = "http://example.com/*x*/"; // trailing"#;
        let (result, count) = strip_comments(source);
        assert_eq!(result, r#"var url = "http://example.com/*x*/"; "#);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let source = r#"s = "a \" // b"; // c"#;
        let (result, _) = strip_comments(source);
        assert_eq!(result, r#"s = "a \" // b"; "#);
    }

    #[test]
    fn test_verbatim_string_with_backslash() {
        let source = r#"p = @"C:\dir\"; // c"#;
        let (result, count) = strip_comments(source);
        assert_eq!(result, r#"p = @"C:\dir\"; "#);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_char_literal_quote() {
        let source = "c = '\"'; // q\nd = \"//\";";
        let (result, _) = strip_comments(source);
        assert_eq!(result, "c = '\"'; \nd = \"//\";");
    }

    #[test]
    fn test_collect_external_symbols() {
        let mut externals = HashSet::new();
        let source = "using System;\nusing System.Collections.Generic;\nusing static System.Math;\nusing Json = Newtonsoft.Json;\n";
        let added = collect_external_symbols(source, &mut externals);
        assert_eq!(added, 4);
        assert!(externals.contains("System"));
        assert!(externals.contains("Generic"));
        assert!(externals.contains("Math"));
        assert!(externals.contains("Json"));
        assert!(!externals.contains("Collections"));
    }

    #[test]
    fn test_using_statement_is_not_a_directive() {
        let mut externals = HashSet::new();
        collect_external_symbols("    using (var s = Open()) { s.Flush(); }", &mut externals);
        assert!(externals.is_empty());
    }

    #[test]
    fn test_word_tokens() {
        let tokens: Vec<_> = word_tokens("FooBar.Foo(x_1, 2)").collect();
        assert_eq!(tokens, vec!["FooBar", "Foo", "x_1", "2"]);
    }
}
