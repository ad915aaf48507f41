//! Declaration-site recognition
//!
//! Sites are found lexically. [`DeclarationFinder`] is the only contact point
//! between recognition and the rest of the engine, so the regex finder can be
//! swapped for a real parser without touching the maps or the manifests.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

/// Keywords that introduce a renameable declaration
pub const DECLARATION_KEYWORDS: &[&str] = &[
    "class", "struct", "enum", "interface", "void", "int", "string", "bool", "float", "double",
    "decimal", "char", "byte", "sbyte", "short", "ushort", "uint", "long", "ulong",
];

/// Reserved words that are never treated as declared names
const RESERVED: &[&str] = &[
    "abstract", "as", "base", "bool", "break", "byte", "case", "catch", "char", "checked",
    "class", "const", "continue", "decimal", "default", "delegate", "do", "double", "else",
    "enum", "event", "explicit", "extern", "false", "finally", "fixed", "float", "for",
    "foreach", "goto", "if", "implicit", "in", "int", "interface", "internal", "is", "lock",
    "long", "namespace", "new", "null", "object", "operator", "out", "override", "params",
    "private", "protected", "public", "readonly", "ref", "return", "sbyte", "sealed", "short",
    "sizeof", "stackalloc", "static", "string", "struct", "switch", "this", "throw", "true",
    "try", "typeof", "uint", "ulong", "unchecked", "unsafe", "ushort", "using", "virtual",
    "void", "volatile", "while",
];

/// A `namespace` header; `name_range` covers only the dotted name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHeader<'a> {
    pub name: &'a str,
    pub name_range: Range<usize>,
}

/// Finds namespace headers and declared identifiers in comment-free source
pub trait DeclarationFinder: Send + Sync {
    /// Every `namespace` header in order of appearance
    fn namespace_headers<'a>(&self, source: &'a str) -> Vec<NamespaceHeader<'a>>;

    /// Every declared identifier in order of appearance (may repeat)
    fn declared_identifiers<'a>(&self, source: &'a str) -> Vec<&'a str>;
}

/// Keyword-followed-by-name matcher
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexDeclarationFinder;

fn namespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bnamespace\s+([a-zA-Z_][\w.]*)").expect("namespace pattern")
    })
}

fn declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"\b(?:{})\s+([a-zA-Z_]\w*)", DECLARATION_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("declaration pattern")
    })
}

/// Whether `name` is a language keyword
pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

impl DeclarationFinder for RegexDeclarationFinder {
    fn namespace_headers<'a>(&self, source: &'a str) -> Vec<NamespaceHeader<'a>> {
        namespace_regex()
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            .map(|m| {
                // `namespace Demo.` is not a valid name; keep the dot outside
                let name = m.as_str().trim_end_matches('.');
                NamespaceHeader {
                    name,
                    name_range: m.start()..m.start() + name.len(),
                }
            })
            .filter(|header| !header.name.is_empty())
            .collect()
    }

    fn declared_identifiers<'a>(&self, source: &'a str) -> Vec<&'a str> {
        declaration_regex()
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|name| !is_reserved(name))
            .collect()
    }
}
