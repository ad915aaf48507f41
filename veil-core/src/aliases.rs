//! Alias maps and alias generation
//!
//! An [`AliasMap`] is a bidirectional table from original text to alias for one
//! category. Values are unique within a map, so every map can be inverted
//! without loss.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random draws before falling back to an exhaustive search on short lengths
const RANDOM_ATTEMPTS: usize = 1000;

/// Lengths whose whole alias space is small enough to enumerate
const EXHAUSTIVE_MAX_LENGTH: usize = 2;

/// Aliases that become identifiers or file names
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Aliases placed inside regular string literals: no quotes, backslash,
/// braces or literal prefixes
const LITERAL_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#%&()*+,-./:;<=>?[]^_|~";

/// The four alias categories of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasKind {
    Identifier,
    StringLiteral,
    FileName,
    Namespace,
}

impl AliasKind {
    pub fn name(self) -> &'static str {
        match self {
            AliasKind::Identifier => "identifier",
            AliasKind::StringLiteral => "string literal",
            AliasKind::FileName => "file name",
            AliasKind::Namespace => "namespace",
        }
    }

    /// Aliases that end up as word tokens and must not clash with any other
    /// token of the tree. String aliases only live inside literals.
    pub fn is_token(self) -> bool {
        !matches!(self, AliasKind::StringLiteral)
    }

    /// Characters aliases of this kind are drawn from
    pub fn alphabet(self) -> &'static [u8] {
        match self {
            AliasKind::StringLiteral => LITERAL_ALPHABET,
            _ => NAME_ALPHABET,
        }
    }
}

/// Original → alias table with a reverse index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from persisted pairs, rejecting duplicate aliases
    pub fn from_pairs(pairs: BTreeMap<String, String>) -> Result<Self, String> {
        let mut map = Self::new();
        for (original, alias) in pairs {
            if !map.insert(original.clone(), alias.clone()) {
                return Err(format!("alias '{}' is assigned twice", alias));
            }
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Alias assigned to `original`
    pub fn get(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    /// Original that `alias` stands for
    pub fn original_of(&self, alias: &str) -> Option<&str> {
        self.reverse.get(alias).map(String::as_str)
    }

    /// Whether `name` is used as either an original or an alias
    pub fn mentions(&self, name: &str) -> bool {
        self.forward.contains_key(name) || self.reverse.contains_key(name)
    }

    /// Insert a pair. Returns false and leaves the map untouched when either
    /// side is already present.
    pub fn insert(&mut self, original: String, alias: String) -> bool {
        if self.forward.contains_key(&original) || self.reverse.contains_key(&alias) {
            return false;
        }
        self.reverse.insert(alias.clone(), original.clone());
        self.forward.insert(original, alias);
        true
    }

    /// Swap originals and aliases
    pub fn inverted(&self) -> AliasMap {
        AliasMap {
            forward: self
                .reverse
                .iter()
                .map(|(alias, original)| (alias.clone(), original.clone()))
                .collect(),
            reverse: self.forward.clone().into_iter().collect(),
        }
    }

    /// Pairs in original order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        self.forward.clone()
    }
}

/// Source of random alphabetic aliases
pub struct AliasGenerator {
    rng: StdRng,
}

impl AliasGenerator {
    /// Deterministic when a seed is given
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// A random string of `length` characters from `alphabet`
    pub fn draw(&mut self, alphabet: &[u8], length: usize) -> String {
        (0..length)
            .map(|_| alphabet[self.rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    /// Draw from `alphabet` until `accept` approves a candidate
    ///
    /// Short lengths are searched exhaustively once random draws fail, so
    /// `None` means the alias space is really used up.
    pub fn draw_unique(
        &mut self,
        alphabet: &[u8],
        length: usize,
        mut accept: impl FnMut(&str) -> bool,
    ) -> Option<String> {
        for _ in 0..RANDOM_ATTEMPTS {
            let candidate = self.draw(alphabet, length);
            if accept(&candidate) {
                return Some(candidate);
            }
        }

        if length > EXHAUSTIVE_MAX_LENGTH {
            return None;
        }
        all_strings(alphabet, length).find(|candidate| accept(candidate))
    }
}

/// Every string of `length` characters from `alphabet`
fn all_strings(alphabet: &[u8], length: usize) -> impl Iterator<Item = String> + '_ {
    let total = alphabet.len().pow(length as u32);
    (0..total).map(move |mut index| {
        let mut out = vec![0u8; length];
        for slot in out.iter_mut().rev() {
            *slot = alphabet[index % alphabet.len()];
            index /= alphabet.len();
        }
        out.into_iter().map(char::from).collect()
    })
}
