//! Session state and the persisted obfuscation record
//!
//! A [`Session`] owns everything a forward run accumulates: the four alias maps,
//! the external symbol set and the set of names that aliases must avoid. It is
//! passed explicitly to each pass; nothing here is global.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aliases::{AliasGenerator, AliasKind, AliasMap};
use crate::declarations::DeclarationFinder;
use crate::error::{Error, Result};
use crate::lexer;

/// The four alias maps of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMaps {
    pub identifiers: AliasMap,
    pub strings: AliasMap,
    pub files: AliasMap,
    pub namespaces: AliasMap,
}

impl AliasMaps {
    fn get_mut(&mut self, kind: AliasKind) -> &mut AliasMap {
        match kind {
            AliasKind::Identifier => &mut self.identifiers,
            AliasKind::StringLiteral => &mut self.strings,
            AliasKind::FileName => &mut self.files,
            AliasKind::Namespace => &mut self.namespaces,
        }
    }

    /// Swap originals and aliases in all four maps
    pub fn inverted(&self) -> AliasMaps {
        AliasMaps {
            identifiers: self.identifiers.inverted(),
            strings: self.strings.inverted(),
            files: self.files.inverted(),
            namespaces: self.namespaces.inverted(),
        }
    }
}

/// Forward-run state
pub struct Session {
    maps: AliasMaps,
    externals: HashSet<String>,
    taken: HashSet<String>,
    generator: AliasGenerator,
    alias_length: usize,
}

impl Session {
    pub fn new(alias_length: usize, seed: Option<u64>) -> Self {
        Self {
            maps: AliasMaps::default(),
            externals: HashSet::new(),
            taken: HashSet::new(),
            generator: AliasGenerator::new(seed),
            alias_length,
        }
    }

    pub fn maps(&self) -> &AliasMaps {
        &self.maps
    }

    pub fn externals(&self) -> &HashSet<String> {
        &self.externals
    }

    /// Reserve every word token of `text` so no alias can equal it
    pub fn observe_tokens(&mut self, text: &str) {
        for token in lexer::word_tokens(text) {
            if !self.taken.contains(token) {
                self.taken.insert(token.to_string());
            }
        }
    }

    /// Collect `using` targets of a stripped source file
    pub fn protect_externals(&mut self, stripped: &str) -> usize {
        lexer::collect_external_symbols(stripped, &mut self.externals)
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.externals.contains(name)
    }

    /// Assign aliases for every namespace and declaration in a stripped file
    ///
    /// Must run after external symbols of the whole tree have been collected.
    pub fn register_declarations(&mut self, finder: &dyn DeclarationFinder, stripped: &str) -> Result<()> {
        for header in finder.namespace_headers(stripped) {
            self.namespace_alias(header.name)?;
        }
        for name in finder.declared_identifiers(stripped) {
            self.identifier_alias(name)?;
        }
        Ok(())
    }

    /// Alias for a namespace, or `None` when the namespace is external
    pub fn namespace_alias(&mut self, name: &str) -> Result<Option<String>> {
        let last = name.rsplit('.').next().unwrap_or(name);
        if self.is_external(name) || self.is_external(last) {
            return Ok(None);
        }
        let length = self.alias_length;
        self.obtain(AliasKind::Namespace, name, length).map(Some)
    }

    /// Alias for a declared identifier, or `None` when it is external
    pub fn identifier_alias(&mut self, name: &str) -> Result<Option<String>> {
        if self.is_external(name) {
            return Ok(None);
        }
        let length = self.alias_length;
        self.obtain(AliasKind::Identifier, name, length).map(Some)
    }

    /// Same-length alias for a string literal payload; empty payloads have none
    pub fn string_alias(&mut self, content: &str) -> Result<Option<String>> {
        if content.is_empty() {
            return Ok(None);
        }
        let length = content.chars().count();
        self.obtain(AliasKind::StringLiteral, content, length).map(Some)
    }

    /// Alias for a file stem
    pub fn file_alias(&mut self, stem: &str) -> Result<String> {
        let length = self.alias_length;
        self.obtain(AliasKind::FileName, stem, length)
    }

    fn obtain(&mut self, kind: AliasKind, original: &str, length: usize) -> Result<String> {
        let Session {
            maps,
            taken,
            generator,
            ..
        } = self;
        let map = maps.get_mut(kind);
        if let Some(alias) = map.get(original) {
            return Ok(alias.to_string());
        }

        let token = kind.is_token();
        let alias = generator
            .draw_unique(kind.alphabet(), length, |candidate| {
                !map.mentions(candidate) && !(token && taken.contains(candidate))
            })
            .ok_or(Error::MappingCollision {
                category: kind.name(),
                length,
            })?;

        map.insert(original.to_string(), alias.clone());
        if token {
            taken.insert(alias.clone());
        }
        tracing::trace!("{} alias {} -> {}", kind.name(), original, alias);
        Ok(alias)
    }

    pub fn record(&self) -> ObfuscationRecord {
        ObfuscationRecord::from_maps(&self.maps)
    }
}

/// Serialized alias maps, the only artifact needed to invert a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationRecord {
    /// Identifier map
    pub obfuscation_map: BTreeMap<String, String>,
    pub string_map: BTreeMap<String, String>,
    pub file_map: BTreeMap<String, String>,
    pub namespace_map: BTreeMap<String, String>,
    /// Source files (relative paths) written without aliasing
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped_files: BTreeSet<String>,
}

impl ObfuscationRecord {
    pub fn from_maps(maps: &AliasMaps) -> Self {
        Self {
            obfuscation_map: maps.identifiers.to_pairs(),
            string_map: maps.strings.to_pairs(),
            file_map: maps.files.to_pairs(),
            namespace_map: maps.namespaces.to_pairs(),
            skipped_files: BTreeSet::new(),
        }
    }

    /// Rebuild the maps, rejecting records whose aliases are not unique
    pub fn into_maps(self) -> std::result::Result<AliasMaps, String> {
        Ok(AliasMaps {
            identifiers: AliasMap::from_pairs(self.obfuscation_map)?,
            strings: AliasMap::from_pairs(self.string_map)?,
            files: AliasMap::from_pairs(self.file_map)?,
            namespaces: AliasMap::from_pairs(self.namespace_map)?,
        })
    }

    /// Write as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Read a record written by [`write`](Self::write)
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MapNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| Error::MapUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::MapUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
