//! Veil Core Library
//!
//! Reversible obfuscation of C# source trees:
//! - Comment stripping and external-symbol collection
//! - Identifier, namespace, string-literal and file-name aliasing
//! - Project manifest synchronization (.csproj, .sln, AssemblyInfo.cs)
//! - Deobfuscation from the persisted obfuscation map

pub mod aliases;
pub mod config;
pub mod declarations;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod manifest;
pub mod path_utils;
pub mod permissions;
pub mod rewrite;
pub mod session;
pub mod tree;

// Re-export commonly used types
pub use aliases::{AliasGenerator, AliasKind, AliasMap};
pub use config::EngineConfig;
pub use declarations::{DeclarationFinder, NamespaceHeader, RegexDeclarationFinder};
pub use engine::{AliasCounts, Engine, FileFailure, LoadedRecord, Mode, RenamedFile, Report};
pub use error::{Error, Result};
pub use lexer::{collect_external_symbols, strip_comments};
pub use manifest::{Manifest, ManifestKind};
pub use path_utils::{normalize_path, path_to_string};
pub use session::{AliasMaps, ObfuscationRecord, Session};
