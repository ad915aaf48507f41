//! Obfuscation and deobfuscation drivers
//!
//! Forward run:
//! 1. Validate the project and copy it to the output directory
//! 2. Scan phase (single writer): strip comments, collect external symbols and
//!    reserved tokens for the whole tree, then assign every alias
//! 3. Rewrite phase (parallel, read-only session): rewrite and rename sources
//! 4. Synchronize manifests, write the obfuscation record
//!
//! Deobfuscation loads and inverts the record, copies the tree, replays the
//! passes in reverse and synchronizes manifests with the inverted maps.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::aliases::AliasMap;
use crate::config::EngineConfig;
use crate::declarations::{DeclarationFinder, RegexDeclarationFinder};
use crate::error::{Error, Result};
use crate::lexer::strip_comments;
use crate::manifest::synchronize_file;
use crate::path_utils::{
    deobfuscated_output_path, obfuscated_output_path, path_to_string, relative_to,
    split_extension,
};
use crate::permissions::{ensure_writable, nearest_existing};
use crate::rewrite::{obfuscate_names, replace_string_literals, restore_source, string_literals};
use crate::session::{AliasMaps, ObfuscationRecord, Session};
use crate::tree::{collect_units, duplicate_tree, SourceUnit, UnitKind};

/// Direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Obfuscate,
    Deobfuscate,
}

/// A source file that was moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamedFile {
    pub from: String,
    pub to: String,
}

/// A file that could not be processed; the run continued without it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub message: String,
}

/// Size of each alias map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AliasCounts {
    pub identifiers: usize,
    pub strings: usize,
    pub files: usize,
    pub namespaces: usize,
}

impl AliasCounts {
    fn of(maps: &AliasMaps) -> Self {
        Self {
            identifiers: maps.identifiers.len(),
            strings: maps.strings.len(),
            files: maps.files.len(),
            namespaces: maps.namespaces.len(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub mode: Mode,
    pub input: String,
    pub output: String,
    /// Source files rewritten, relative to the output root
    pub rewritten: Vec<String>,
    pub renamed: Vec<RenamedFile>,
    /// Manifests that changed
    pub manifests: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub aliases: AliasCounts,
    pub comments_removed: usize,
}

impl Report {
    fn new(mode: Mode, input: &Path, output: &Path) -> Self {
        Self {
            mode,
            input: path_to_string(input),
            output: path_to_string(output),
            rewritten: Vec::new(),
            renamed: Vec::new(),
            manifests: Vec::new(),
            failures: Vec::new(),
            aliases: AliasCounts::default(),
            comments_removed: 0,
        }
    }

    /// True when every file was processed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A source file between the scan and rewrite phases
struct PendingSource {
    unit: SourceUnit,
    stripped: String,
    named: String,
    /// Set when the file cannot be aliased; it is written stripped and left
    /// out of the record's rewrite set
    skipped: Option<String>,
}

/// Result of rewriting one file
struct Rewritten {
    relative: String,
    renamed: Option<RenamedFile>,
}

/// A record read from an obfuscated tree and inverted, ready to restore
pub struct LoadedRecord {
    source: PathBuf,
    inverted: AliasMaps,
    skipped: BTreeSet<String>,
}

impl LoadedRecord {
    /// The obfuscated tree the record belongs to
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Alias → original maps
    pub fn inverted(&self) -> &AliasMaps {
        &self.inverted
    }

    /// Source files the forward run left unaliased
    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skipped
    }
}

/// The obfuscation engine
pub struct Engine {
    config: EngineConfig,
    finder: Box<dyn DeclarationFinder>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_finder(config, Box::new(RegexDeclarationFinder))
    }

    /// Use a different declaration-site finder
    pub fn with_finder(config: EngineConfig, finder: Box<dyn DeclarationFinder>) -> Self {
        Self { config, finder }
    }

    /// Where an obfuscated copy of `project` goes by default
    pub fn default_obfuscated_path(&self, project: &Path) -> PathBuf {
        obfuscated_output_path(project, &self.config.output.obfuscated_suffix)
    }

    /// Where the restored copy of `obfuscated` goes by default
    pub fn default_deobfuscated_path(&self, obfuscated: &Path) -> PathBuf {
        deobfuscated_output_path(
            obfuscated,
            &self.config.output.obfuscated_suffix,
            &self.config.output.deobfuscated_suffix,
        )
    }

    /// Obfuscate `project` into `output` (default `<project>_Obfuscated`)
    pub fn obfuscate_project(&self, project: &Path, output: Option<&Path>) -> Result<Report> {
        self.config.validate().map_err(Error::InvalidConfig)?;
        let project = resolve_input(project)?;
        let output = match output {
            Some(path) => absolute(path)?,
            None => self.default_obfuscated_path(&project),
        };
        self.prepare_output(&project, &output)?;

        tracing::info!("Obfuscating {} -> {}", project.display(), output.display());
        let mut report = Report::new(Mode::Obfuscate, &project, &output);
        let units = collect_units(&output, &self.config)?;

        let mut session = Session::new(self.config.aliases.length, self.config.aliases.seed);
        let mut pending = self.scan(&units, &mut session, &mut report);
        self.assign_aliases(&mut pending, &mut session)?;

        let mut skipped: BTreeSet<String> = report.failures.iter().map(|f| f.path.clone()).collect();
        skipped.extend(
            pending
                .iter()
                .filter(|source| source.skipped.is_some())
                .map(|source| source.unit.relative.clone()),
        );

        let maps = session.maps();
        let results: Vec<_> = pending
            .par_iter()
            .map(|source| self.rewrite_forward(source, maps, &output))
            .collect();
        collect_results(results, &mut report);

        self.synchronize_manifests(&units, maps, &output, &mut report);

        let record_path = output.join(&self.config.output.map_file);
        let mut record = session.record();
        record.skipped_files = skipped;
        record.write(&record_path)?;
        tracing::info!("Obfuscation map written to {}", record_path.display());

        report.aliases = AliasCounts::of(maps);
        Ok(report)
    }

    /// Read and invert the record of an obfuscated tree
    pub fn load_record(&self, obfuscated: &Path) -> Result<LoadedRecord> {
        let source = resolve_input(obfuscated)?;
        let record_path = source.join(&self.config.output.map_file);
        let mut record = ObfuscationRecord::read(&record_path)?;
        let skipped = std::mem::take(&mut record.skipped_files);
        let maps = record.into_maps().map_err(|reason| Error::MapUnreadable {
            path: record_path.clone(),
            reason,
        })?;
        tracing::debug!("Loaded obfuscation map {}", record_path.display());
        Ok(LoadedRecord {
            source,
            inverted: maps.inverted(),
            skipped,
        })
    }

    /// Rebuild the original tree from a loaded record
    pub fn restore(&self, loaded: LoadedRecord, output: Option<&Path>) -> Result<Report> {
        let output = match output {
            Some(path) => absolute(path)?,
            None => self.default_deobfuscated_path(&loaded.source),
        };
        self.prepare_output(&loaded.source, &output)?;

        tracing::info!("Deobfuscating {} -> {}", loaded.source.display(), output.display());
        let mut report = Report::new(Mode::Deobfuscate, &loaded.source, &output);

        let copied_record = output.join(&self.config.output.map_file);
        fs::remove_file(&copied_record).map_err(|e| Error::io(&copied_record, e))?;

        let units = collect_units(&output, &self.config)?;
        let inverted = &loaded.inverted;
        let results: Vec<_> = units
            .par_iter()
            .filter(|unit| unit.kind == UnitKind::Source && !loaded.skipped.contains(&unit.relative))
            .map(|unit| self.rewrite_inverse(unit, inverted, &output))
            .collect();
        collect_results(results, &mut report);

        self.synchronize_manifests(&units, inverted, &output, &mut report);

        report.aliases = AliasCounts::of(inverted);
        Ok(report)
    }

    /// Restore `obfuscated` into `output` (default `*_Deobfuscated`)
    pub fn deobfuscate_project(&self, obfuscated: &Path, output: Option<&Path>) -> Result<Report> {
        let loaded = self.load_record(obfuscated)?;
        self.restore(loaded, output)
    }

    /// Check the output location and copy `input` there
    ///
    /// The output may neither contain the input nor be an existing directory
    /// inside it, since it is removed before copying. A nested output that does
    /// not exist yet is allowed; the copy skips it.
    fn prepare_output(&self, input: &Path, output: &Path) -> Result<()> {
        let resolved = resolve_output(output)?;
        let inside_input = resolved.starts_with(input) && output.exists();
        if input.starts_with(&resolved) || inside_input {
            return Err(Error::OutputOverlapsInput {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            });
        }
        ensure_writable(output, self.config.permissions.elevate)?;
        duplicate_tree(input, output)?;
        Ok(())
    }

    /// Strip sources and seed the session with externals and reserved names
    fn scan(&self, units: &[SourceUnit], session: &mut Session, report: &mut Report) -> Vec<PendingSource> {
        let mut pending = Vec::new();
        for unit in units {
            match unit.kind {
                UnitKind::Source => match fs::read_to_string(&unit.path) {
                    Ok(content) => {
                        let (stripped, comments) = strip_comments(&content);
                        report.comments_removed += comments;
                        session.observe_tokens(&stripped);
                        session.observe_tokens(unit.file_name());
                        session.protect_externals(&stripped);
                        pending.push(PendingSource {
                            unit: unit.clone(),
                            stripped,
                            named: String::new(),
                            skipped: None,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", unit.relative, e);
                        report.failures.push(FileFailure {
                            path: unit.relative.clone(),
                            destination: None,
                            message: format!("read failed: {}", e),
                        });
                    }
                },
                UnitKind::Manifest(_) => {
                    // Unreadable manifests are reported by the synchronizer
                    if let Ok(content) = fs::read_to_string(&unit.path) {
                        session.observe_tokens(&content);
                    }
                }
                UnitKind::Opaque => session.observe_tokens(unit.file_name()),
            }
        }
        tracing::debug!(
            "Scanned {} source files, {} external symbols",
            pending.len(),
            session.externals().len()
        );
        pending
    }

    /// Assign every alias; string aliases are keyed on the renamed text
    ///
    /// Running out of string aliases only skips the file being aliased.
    fn assign_aliases(&self, pending: &mut [PendingSource], session: &mut Session) -> Result<()> {
        for source in pending.iter() {
            session.register_declarations(self.finder.as_ref(), &source.stripped)?;
        }
        for source in pending.iter_mut() {
            source.named = obfuscate_names(&source.stripped, session.maps(), self.finder.as_ref());
            for literal in string_literals(&source.named) {
                match session.string_alias(literal) {
                    Ok(_) => {}
                    Err(err @ Error::MappingCollision { .. }) => {
                        tracing::warn!("Leaving {} unaliased: {}", source.unit.relative, err);
                        source.skipped = Some(err.to_string());
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        // A stem shared with a skipped file stays as is, or manifest entries
        // naming the skipped file would follow the rename
        let skipped_stems: BTreeSet<&str> = pending
            .iter()
            .filter(|source| source.skipped.is_some())
            .map(|source| split_extension(source.unit.file_name()).0)
            .collect();
        for source in pending.iter().filter(|source| source.skipped.is_none()) {
            let (stem, _) = split_extension(source.unit.file_name());
            if !skipped_stems.contains(stem) {
                session.file_alias(stem)?;
            }
        }
        Ok(())
    }

    fn rewrite_forward(
        &self,
        source: &PendingSource,
        maps: &AliasMaps,
        root: &Path,
    ) -> std::result::Result<Rewritten, FileFailure> {
        if let Some(reason) = &source.skipped {
            let message = match fs::write(&source.unit.path, &source.stripped) {
                Ok(()) => format!("left unaliased: {}", reason),
                Err(e) => format!("left unaliased: {}; write failed: {}", reason, e),
            };
            return Err(FileFailure {
                path: source.unit.relative.clone(),
                destination: None,
                message,
            });
        }
        let (content, _) = replace_string_literals(&source.named, &maps.strings);
        let new_name = renamed_file_name(source.unit.file_name(), &maps.files);
        write_and_rename(&source.unit, &content, new_name, root)
    }

    fn rewrite_inverse(
        &self,
        unit: &SourceUnit,
        inverted: &AliasMaps,
        root: &Path,
    ) -> std::result::Result<Rewritten, FileFailure> {
        let content = fs::read_to_string(&unit.path).map_err(|e| FileFailure {
            path: unit.relative.clone(),
            destination: None,
            message: format!("read failed: {}", e),
        })?;
        let restored = restore_source(&content, inverted);
        let new_name = renamed_file_name(unit.file_name(), &inverted.files);
        write_and_rename(unit, &restored, new_name, root)
    }

    fn synchronize_manifests(
        &self,
        units: &[SourceUnit],
        maps: &AliasMaps,
        root: &Path,
        report: &mut Report,
    ) {
        let extensions = &self.config.sources.extensions;
        for unit in units {
            let UnitKind::Manifest(kind) = unit.kind else {
                continue;
            };
            match synchronize_file(&unit.path, kind, maps, extensions) {
                Ok(true) => report.manifests.push(relative_to(&unit.path, root)),
                Ok(false) => {}
                Err(message) => {
                    tracing::warn!("Could not update {:?} manifest {}: {}", kind, unit.relative, message);
                    report.failures.push(FileFailure {
                        path: unit.relative.clone(),
                        destination: None,
                        message,
                    });
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// `stem.ext` → `alias.ext` when the stem is mapped
fn renamed_file_name(file_name: &str, files: &AliasMap) -> Option<String> {
    match split_extension(file_name) {
        (stem, Some(ext)) => files.get(stem).map(|alias| format!("{}.{}", alias, ext)),
        (stem, None) => files.get(stem).map(str::to_string),
    }
}

/// Write `content` to the unit and move it to `new_name` in the same directory
fn write_and_rename(
    unit: &SourceUnit,
    content: &str,
    new_name: Option<String>,
    root: &Path,
) -> std::result::Result<Rewritten, FileFailure> {
    let failure = |destination: Option<&Path>, message: String| FileFailure {
        path: unit.relative.clone(),
        destination: destination.map(|d| relative_to(d, root)),
        message,
    };

    fs::write(&unit.path, content).map_err(|e| failure(None, format!("write failed: {}", e)))?;

    let Some(new_name) = new_name else {
        tracing::info!("Rewrote {}", unit.relative);
        return Ok(Rewritten {
            relative: unit.relative.clone(),
            renamed: None,
        });
    };

    let destination = unit.path.with_file_name(&new_name);
    if destination.exists() {
        return Err(failure(Some(destination.as_path()), "destination already exists".to_string()));
    }
    fs::rename(&unit.path, &destination)
        .map_err(|e| failure(Some(destination.as_path()), format!("rename failed: {}", e)))?;

    let to = relative_to(&destination, root);
    tracing::info!("Rewrote {} -> {}", unit.relative, to);
    Ok(Rewritten {
        relative: to.clone(),
        renamed: Some(RenamedFile {
            from: unit.relative.clone(),
            to,
        }),
    })
}

fn collect_results(results: Vec<std::result::Result<Rewritten, FileFailure>>, report: &mut Report) {
    for result in results {
        match result {
            Ok(done) => {
                report.rewritten.push(done.relative);
                report.renamed.extend(done.renamed);
            }
            Err(failure) => {
                tracing::warn!("Failed {}: {}", failure.path, failure.message);
                report.failures.push(failure);
            }
        }
    }
}

/// Canonical path of an existing input directory
fn resolve_input(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(Error::ProjectNotFound(path.to_path_buf()));
    }
    path.canonicalize().map_err(|e| Error::io(path, e))
}

/// Canonical form of a possibly missing output path
fn resolve_output(output: &Path) -> Result<PathBuf> {
    let existing = nearest_existing(output);
    let canonical = existing.canonicalize().map_err(|e| Error::io(&existing, e))?;
    Ok(match output.strip_prefix(&existing) {
        Ok(rest) => canonical.join(rest),
        Err(_) => canonical,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::io(path, e))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded(seed: u64) -> Engine {
        let mut config = EngineConfig::default();
        config.aliases.seed = Some(seed);
        Engine::new(config)
    }

    #[test]
    fn test_missing_project_is_structural_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = Engine::default()
            .obfuscate_project(&temp_dir.path().join("missing"), None)
            .unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));
        assert!(!temp_dir.path().join("missing_Obfuscated").exists());
    }

    #[test]
    fn test_missing_record_aborts_before_copy() {
        let temp_dir = TempDir::new().unwrap();
        let obfuscated = temp_dir.path().join("Demo_Obfuscated");
        fs::create_dir_all(&obfuscated).unwrap();
        fs::write(obfuscated.join("a.cs"), "class A {}").unwrap();

        let err = Engine::default().deobfuscate_project(&obfuscated, None).unwrap_err();
        assert!(matches!(err, Error::MapNotFound(_)));
        assert!(!temp_dir.path().join("Demo_Deobfuscated").exists());
    }

    #[test]
    fn test_output_cannot_contain_input() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        fs::create_dir_all(&project).unwrap();

        let err = Engine::default()
            .obfuscate_project(&project, Some(temp_dir.path()))
            .unwrap_err();
        assert!(matches!(err, Error::OutputOverlapsInput { .. }));
        assert!(project.exists());
    }

    #[test]
    fn test_unreadable_source_is_reported_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("good.cs"), "class Good {}").unwrap();
        fs::write(project.join("bad.cs"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();

        let report = seeded(1).obfuscate_project(&project, None).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "bad.cs");
        assert_eq!(report.renamed.len(), 1);

        let output = temp_dir.path().join("Demo_Obfuscated");
        assert_eq!(fs::read(output.join("bad.cs")).unwrap(), vec![0xffu8, 0xfe, 0x00, 0x80]);
        let record = ObfuscationRecord::read(&output.join("obfuscation_map.json")).unwrap();
        assert!(record.skipped_files.contains("bad.cs"));

        // Restore copies the unreadable file back untouched
        let report = seeded(1).deobfuscate_project(&output, None).unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures);
        let restored = temp_dir.path().join("Demo_Deobfuscated");
        assert_eq!(fs::read(restored.join("bad.cs")).unwrap(), vec![0xffu8, 0xfe, 0x00, 0x80]);
        assert_eq!(fs::read_to_string(restored.join("good.cs")).unwrap(), "class Good {}");
    }

    #[test]
    fn test_existing_output_inside_input_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        let parts = project.join("Parts");
        fs::create_dir_all(&parts).unwrap();
        fs::write(parts.join("gadget.cs"), "class Gadget {}").unwrap();

        let err = Engine::default()
            .obfuscate_project(&project, Some(parts.as_path()))
            .unwrap_err();
        assert!(matches!(err, Error::OutputOverlapsInput { .. }));
        assert_eq!(fs::read_to_string(parts.join("gadget.cs")).unwrap(), "class Gadget {}");
    }

    #[test]
    fn test_new_output_inside_input_is_allowed() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("widget.cs"), "class Widget {}").unwrap();

        let output = project.join("out");
        let report = seeded(2).obfuscate_project(&project, Some(output.as_path())).unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert_eq!(fs::read_to_string(project.join("widget.cs")).unwrap(), "class Widget {}");
        assert!(output.join("obfuscation_map.json").exists());
        assert!(!output.join("out").exists());
    }

    #[test]
    fn test_zero_alias_length_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        fs::create_dir_all(&project).unwrap();

        let mut config = EngineConfig::default();
        config.aliases.length = 0;
        let err = Engine::new(config).obfuscate_project(&project, None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(!temp_dir.path().join("Demo_Obfuscated").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_output_fails_before_copy() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("Demo");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("widget.cs"), "class Widget {}").unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory modes
        if crate::permissions::is_writable(&locked) {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let output = locked.join("out");
        let result = Engine::default().obfuscate_project(&project, Some(output.as_path()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_renamed_file_name() {
        let mut files = AliasMap::new();
        files.insert("widget".into(), "QwErTyUiOp".into());
        assert_eq!(renamed_file_name("widget.cs", &files), Some("QwErTyUiOp.cs".to_string()));
        assert_eq!(renamed_file_name("gadget.cs", &files), None);
    }

    #[test]
    fn test_default_paths() {
        let engine = Engine::default();
        let project = PathBuf::from("/work/Demo");
        let obfuscated = engine.default_obfuscated_path(&project);
        assert_eq!(obfuscated, PathBuf::from("/work/Demo_Obfuscated"));
        assert_eq!(
            engine.default_deobfuscated_path(&obfuscated),
            PathBuf::from("/work/Demo_Deobfuscated")
        );
    }
}
