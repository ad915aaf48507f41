//! Engine configuration
//!
//! Loaded from `veil.toml`. Every section is optional and falls back to the
//! defaults for C# projects.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// File name looked up in the working directory and the user config directory
pub const CONFIG_FILE_NAME: &str = "veil.toml";

/// Bounds of `aliases.length`
pub const MIN_ALIAS_LENGTH: usize = 1;
pub const MAX_ALIAS_LENGTH: usize = 64;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Which files count as source files
    #[serde(default)]
    pub sources: SourceConfig,
    /// Which files are build/project descriptors
    #[serde(default)]
    pub manifests: ManifestConfig,
    /// Alias generation
    #[serde(default)]
    pub aliases: AliasConfig,
    /// Output naming
    #[serde(default)]
    pub output: OutputConfig,
    /// Privilege escalation for unwritable output locations
    #[serde(default)]
    pub permissions: PermissionConfig,
}

/// Source file selection
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Extensions (without dot) of files that are scanned, rewritten and renamed
    #[serde(default = "default_source_extensions")]
    pub extensions: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            extensions: default_source_extensions(),
        }
    }
}

fn default_source_extensions() -> Vec<String> {
    vec!["cs".to_string()]
}

/// Manifest file selection
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    /// Extensions of XML project descriptors
    #[serde(default = "default_structured")]
    pub structured: Vec<String>,
    /// Extensions of free-text descriptors
    #[serde(default = "default_free_text")]
    pub free_text: Vec<String>,
    /// Exact file names of assembly metadata files
    #[serde(default = "default_metadata")]
    pub metadata: Vec<String>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            structured: default_structured(),
            free_text: default_free_text(),
            metadata: default_metadata(),
        }
    }
}

fn default_structured() -> Vec<String> {
    ["csproj", "vbproj", "fsproj", "projitems", "props", "targets"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_free_text() -> Vec<String> {
    vec!["sln".to_string()]
}

fn default_metadata() -> Vec<String> {
    vec!["AssemblyInfo.cs".to_string()]
}

/// Alias generation
#[derive(Debug, Clone, Deserialize)]
pub struct AliasConfig {
    /// Length of identifier, namespace and file name aliases
    #[serde(default = "default_alias_length")]
    pub length: usize,
    /// Fixed seed for reproducible output
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            length: default_alias_length(),
            seed: None,
        }
    }
}

fn default_alias_length() -> usize {
    10
}

/// Output naming
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Name of the mapping record written into the obfuscated root
    #[serde(default = "default_map_file")]
    pub map_file: String,
    /// Suffix appended to the project directory name on obfuscation
    #[serde(default = "default_obfuscated_suffix")]
    pub obfuscated_suffix: String,
    /// Suffix used for the restored directory
    #[serde(default = "default_deobfuscated_suffix")]
    pub deobfuscated_suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            map_file: default_map_file(),
            obfuscated_suffix: default_obfuscated_suffix(),
            deobfuscated_suffix: default_deobfuscated_suffix(),
        }
    }
}

fn default_map_file() -> String {
    "obfuscation_map.json".to_string()
}

fn default_obfuscated_suffix() -> String {
    "_Obfuscated".to_string()
}

fn default_deobfuscated_suffix() -> String {
    "_Deobfuscated".to_string()
}

/// Privilege escalation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionConfig {
    /// Try an elevated permission fix when the output location is not writable
    #[serde(default)]
    pub elevate: bool,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|reason| Error::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot drive a run
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_ALIAS_LENGTH..=MAX_ALIAS_LENGTH).contains(&self.aliases.length) {
            return Err(format!(
                "aliases.length must be between {} and {}, got {}",
                MIN_ALIAS_LENGTH, MAX_ALIAS_LENGTH, self.aliases.length
            ));
        }
        Ok(())
    }

    /// Resolve the configuration for a run
    ///
    /// An explicit path must exist. Otherwise `./veil.toml` and then
    /// `<config dir>/veil/veil.toml` are tried before falling back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = [Some(PathBuf::from(CONFIG_FILE_NAME)), user_config_path()];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                tracing::debug!("Using configuration from {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Whether `ext` (without dot) is a source extension
    pub fn is_source_extension(&self, ext: &str) -> bool {
        contains_ignore_case(&self.sources.extensions, ext)
    }
}

/// Per-user configuration file location
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("veil").join(CONFIG_FILE_NAME))
}

pub(crate) fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}
