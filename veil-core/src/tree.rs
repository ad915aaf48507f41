//! Project tree handling: duplication and file classification

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::manifest::ManifestKind;
use crate::path_utils::{relative_to, split_extension};

/// What the engine does with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Scanned, rewritten and renamed
    Source,
    /// Rewritten by the manifest synchronizer
    Manifest(ManifestKind),
    /// Copied verbatim, never read
    Opaque,
}

/// One file of the working tree
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Location on disk
    pub path: PathBuf,
    /// Path relative to the tree root, forward slashes
    pub relative: String,
    pub kind: UnitKind,
}

impl SourceUnit {
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }
}

/// Classify a file by name
pub fn classify(file_name: &str, config: &EngineConfig) -> UnitKind {
    if let Some(kind) = ManifestKind::detect(file_name, &config.manifests) {
        return UnitKind::Manifest(kind);
    }
    match split_extension(file_name) {
        (_, Some(ext)) if config.is_source_extension(ext) => UnitKind::Source,
        _ => UnitKind::Opaque,
    }
}

/// Every file below `root` in a stable order, classified
pub fn collect_units(root: &Path, config: &EngineConfig) -> Result<Vec<SourceUnit>> {
    let mut units = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let kind = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| classify(name, config))
            .unwrap_or(UnitKind::Opaque);
        units.push(SourceUnit {
            relative: relative_to(&path, root),
            path,
            kind,
        });
    }
    Ok(units)
}

/// Copy `source` to a fresh `destination`, replacing whatever was there
///
/// Either the whole tree is copied or `destination` is removed again.
pub fn duplicate_tree(source: &Path, destination: &Path) -> Result<usize> {
    if destination.exists() {
        fs::remove_dir_all(destination).map_err(|e| Error::io(destination, e))?;
    }

    match copy_entries(source, destination) {
        Ok(copied) => {
            tracing::debug!(
                "Copied {} files from {} to {}",
                copied,
                source.display(),
                destination.display()
            );
            Ok(copied)
        }
        Err(err) => {
            let _ = fs::remove_dir_all(destination);
            Err(err)
        }
    }
}

fn copy_entries(source: &Path, destination: &Path) -> Result<usize> {
    let mut copied = 0;
    // An output directory nested inside the source must not be copied into itself
    let walker = WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != destination);

    for entry in walker {
        let entry = entry.map_err(|e| walk_error(source, e))?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    Error::io(path, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let config = EngineConfig::default();
        assert_eq!(classify("widget.cs", &config), UnitKind::Source);
        assert_eq!(classify("AssemblyInfo.cs", &config), UnitKind::Manifest(ManifestKind::Metadata));
        assert_eq!(classify("App.csproj", &config), UnitKind::Manifest(ManifestKind::Structured));
        assert_eq!(classify("App.sln", &config), UnitKind::Manifest(ManifestKind::FreeText));
        assert_eq!(classify("logo.png", &config), UnitKind::Opaque);
        assert_eq!(classify(".cs", &config), UnitKind::Opaque);
    }

    #[test]
    fn test_duplicate_tree_replaces_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Demo");
        fs::create_dir_all(source.join("Sub")).unwrap();
        fs::write(source.join("a.cs"), "class A {}").unwrap();
        fs::write(source.join("Sub").join("b.bin"), [0u8, 159, 146, 150]).unwrap();

        let destination = temp_dir.path().join("Demo_Obfuscated");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("stale.txt"), "old").unwrap();

        let copied = duplicate_tree(&source, &destination).unwrap();
        assert_eq!(copied, 2);
        assert!(!destination.join("stale.txt").exists());
        assert_eq!(
            fs::read(destination.join("Sub").join("b.bin")).unwrap(),
            vec![0u8, 159, 146, 150]
        );
    }

    #[test]
    fn test_duplicate_tree_skips_nested_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Demo");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.cs"), "class A {}").unwrap();

        let destination = source.join("out");
        duplicate_tree(&source, &destination).unwrap();
        assert!(destination.join("a.cs").exists());
        assert!(!destination.join("out").exists());
    }

    #[test]
    fn test_collect_units_is_sorted_and_relative() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("Sub")).unwrap();
        fs::write(root.join("b.cs"), "").unwrap();
        fs::write(root.join("a.sln"), "").unwrap();
        fs::write(root.join("Sub").join("c.cs"), "").unwrap();

        let units = collect_units(root, &EngineConfig::default()).unwrap();
        let relative: Vec<_> = units.iter().map(|u| u.relative.as_str()).collect();
        assert_eq!(relative, vec!["Sub/c.cs", "a.sln", "b.cs"]);
        assert_eq!(units[1].kind, UnitKind::Manifest(ManifestKind::FreeText));
    }
}
