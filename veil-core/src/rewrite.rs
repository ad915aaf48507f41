//! Text rewrite passes
//!
//! Each pass is a single simultaneous substitution driven by an [`AliasMap`].
//! Running a pass with the inverted map undoes it, which is how deobfuscation
//! replays the forward transform in reverse.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::aliases::AliasMap;
use crate::declarations::DeclarationFinder;
use crate::lexer::word_regex;
use crate::session::AliasMaps;

/// Regular literals capture their payload in group 1. Verbatim, interpolated
/// and char literals are matched so their quotes cannot open a regular literal,
/// but they are never rewritten.
fn string_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:@\$?|\$@)"(?:[^"]|"")*"|\$"(?:[^"\\]|\\.)*"|'(?:\\.|[^'\\\r\n])*'|"([^"\\]*(?:\\.[^"\\]*)*)""#,
        )
        .expect("string literal pattern")
    })
}

/// Payloads of every regular double-quoted literal, in order
pub fn string_literals(source: &str) -> impl Iterator<Item = &str> {
    string_literal_regex()
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Replace the dotted name of every `namespace` header found in `map`
pub fn rename_namespace_headers(
    source: &str,
    finder: &dyn DeclarationFinder,
    map: &AliasMap,
) -> (String, usize) {
    let mut result = String::with_capacity(source.len());
    let mut count = 0;
    let mut last = 0;

    for header in finder.namespace_headers(source) {
        if let Some(alias) = map.get(header.name) {
            result.push_str(&source[last..header.name_range.start]);
            result.push_str(alias);
            last = header.name_range.end;
            count += 1;
        }
    }
    result.push_str(&source[last..]);

    (result, count)
}

/// Replace every whole word found in `map`
///
/// A word is a maximal run of word characters, so `Foo` never matches inside
/// `FooBar`.
pub fn replace_tokens(source: &str, map: &AliasMap) -> (String, usize) {
    if map.is_empty() {
        return (source.to_string(), 0);
    }
    let mut count = 0;
    let result = word_regex().replace_all(source, |caps: &Captures| {
        let word = &caps[0];
        match map.get(word) {
            Some(alias) => {
                count += 1;
                alias.to_string()
            }
            None => word.to_string(),
        }
    });
    (result.into_owned(), count)
}

/// Replace the payload of every string literal found in `map`
pub fn replace_string_literals(source: &str, map: &AliasMap) -> (String, usize) {
    if map.is_empty() {
        return (source.to_string(), 0);
    }
    let mut count = 0;
    let result = string_literal_regex().replace_all(source, |caps: &Captures| {
        match caps.get(1).and_then(|payload| map.get(payload.as_str())) {
            Some(alias) => {
                count += 1;
                format!("\"{}\"", alias)
            }
            None => caps[0].to_string(),
        }
    });
    (result.into_owned(), count)
}

/// Replace every word-bounded occurrence of a (possibly dotted) key of `map`,
/// longest key first
///
/// `Demo` matches in `Demo.Core` but not in `DemoApp`.
pub fn replace_qualified_names(source: &str, map: &AliasMap) -> (String, usize) {
    let Some(re) = alternation(map) else {
        return (source.to_string(), 0);
    };
    let mut count = 0;
    let result = re.replace_all(source, |caps: &Captures| {
        let found = &caps[0];
        count += 1;
        map.get(found).unwrap_or(found).to_string()
    });
    (result.into_owned(), count)
}

/// One word-bounded regex matching any key of `map`, preferring longer keys
fn alternation(map: &AliasMap) -> Option<Regex> {
    let mut keys: Vec<&str> = map.iter().map(|(k, _)| k).filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let pattern = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{})\b", pattern)).ok()
}

/// Namespace headers and identifiers, the part of the forward transform that
/// string aliases are keyed on
pub fn obfuscate_names(stripped: &str, maps: &AliasMaps, finder: &dyn DeclarationFinder) -> String {
    let (renamed, _) = rename_namespace_headers(stripped, finder, &maps.namespaces);
    let (renamed, _) = replace_tokens(&renamed, &maps.identifiers);
    renamed
}

/// Undo the source rewrite: strings, then identifiers, then namespaces
pub fn restore_source(obfuscated: &str, inverted: &AliasMaps) -> String {
    let (text, _) = replace_string_literals(obfuscated, &inverted.strings);
    let (text, _) = replace_tokens(&text, &inverted.identifiers);
    let (text, _) = replace_tokens(&text, &inverted.namespaces);
    text
}
