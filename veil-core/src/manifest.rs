//! Manifest synchronization
//!
//! Project descriptors reference source files by name and assemblies by
//! namespace. After files are renamed the descriptors are rewritten through the
//! same alias maps; with inverted maps the same code restores them.
//!
//! Three kinds are handled:
//! - Structured (MSBuild XML): `Include`/`Update`/`Remove` attributes
//! - Free-text (solution files): `<stem>.<ext>` references
//! - Metadata (`AssemblyInfo.cs`): namespace names

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use regex::{Captures, Regex};

use crate::aliases::AliasMap;
use crate::config::{contains_ignore_case, ManifestConfig};
use crate::rewrite::replace_qualified_names;
use crate::session::AliasMaps;

/// Attributes of MSBuild items that hold file paths
const REFERENCE_ATTRIBUTES: &[&[u8]] = &[b"Include", b"Update", b"Remove"];

const BOM: char = '\u{feff}';

/// How a manifest is synchronized, decided by its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Structured,
    FreeText,
    Metadata,
}

impl ManifestKind {
    /// Classify `file_name`, or `None` when it is not a manifest
    pub fn detect(file_name: &str, config: &ManifestConfig) -> Option<Self> {
        if contains_ignore_case(&config.metadata, file_name) {
            return Some(ManifestKind::Metadata);
        }
        let ext = Path::new(file_name).extension()?.to_str()?;
        if contains_ignore_case(&config.structured, ext) {
            Some(ManifestKind::Structured)
        } else if contains_ignore_case(&config.free_text, ext) {
            Some(ManifestKind::FreeText)
        } else {
            None
        }
    }
}

/// A loaded manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    Structured(String),
    FreeText(String),
    Metadata(String),
}

impl Manifest {
    pub fn new(kind: ManifestKind, content: String) -> Self {
        match kind {
            ManifestKind::Structured => Manifest::Structured(content),
            ManifestKind::FreeText => Manifest::FreeText(content),
            ManifestKind::Metadata => Manifest::Metadata(content),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Manifest::Structured(s) | Manifest::FreeText(s) | Manifest::Metadata(s) => s,
        }
    }

    /// Rewrite references through `maps`, returning the new text and the
    /// number of references changed
    pub fn synchronize(&self, maps: &AliasMaps, source_extensions: &[String]) -> Result<(String, usize), String> {
        match self {
            Manifest::Structured(content) => {
                sync_structured(content, &maps.files, source_extensions)
            }
            Manifest::FreeText(content) => {
                Ok(sync_free_text(content, &maps.files, source_extensions))
            }
            Manifest::Metadata(content) => Ok(replace_qualified_names(content, &maps.namespaces)),
        }
    }
}

/// Synchronize the manifest at `path` in place
///
/// The file is only written when something changed; returns whether it was.
pub fn synchronize_file(
    path: &Path,
    kind: ManifestKind,
    maps: &AliasMaps,
    source_extensions: &[String],
) -> Result<bool, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("read failed: {}", e))?;
    let manifest = Manifest::new(kind, content);
    let (updated, changes) = manifest.synchronize(maps, source_extensions)?;
    if changes == 0 || updated == manifest.content() {
        return Ok(false);
    }
    fs::write(path, updated).map_err(|e| format!("write failed: {}", e))?;
    tracing::info!("Updated {:?} manifest: {}", kind, path.display());
    Ok(true)
}

/// `[dir\]stem.ext` with a known stem and a source extension becomes `[dir\]alias.ext`
fn rewrite_reference(value: &str, files: &AliasMap, source_extensions: &[String]) -> Option<String> {
    let split = value
        .rfind(|c| c == '/' || c == '\\')
        .map(|i| i + 1)
        .unwrap_or(0);
    let (dir, file) = value.split_at(split);
    let (stem, ext) = file.rsplit_once('.')?;
    if !contains_ignore_case(source_extensions, ext) {
        return None;
    }
    let alias = files.get(stem)?;
    Some(format!("{}{}.{}", dir, alias, ext))
}

fn sync_structured(
    content: &str,
    files: &AliasMap,
    source_extensions: &[String],
) -> Result<(String, usize), String> {
    let (bom, body) = match content.strip_prefix(BOM) {
        Some(rest) => (true, rest),
        None => (false, content),
    };

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(body.len()));
    let mut count = 0;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("XML error at byte {}: {}", reader.buffer_position(), e))?;
        let event = match event {
            Event::Eof => break,
            Event::Start(element) => {
                Event::Start(rewrite_element(element, files, source_extensions, &mut count)?)
            }
            Event::Empty(element) => {
                Event::Empty(rewrite_element(element, files, source_extensions, &mut count)?)
            }
            other => other,
        };
        writer.write_event(event).map_err(|e| e.to_string())?;
    }

    let body = String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())?;
    let mut result = String::with_capacity(body.len() + BOM.len_utf8());
    if bom {
        result.push(BOM);
    }
    result.push_str(&body);
    Ok((result, count))
}

/// Rewrite file references inside one start tag, leaving the rest of the tag
/// byte-for-byte as it was
fn rewrite_element<'a>(
    element: BytesStart<'a>,
    files: &AliasMap,
    source_extensions: &[String],
    count: &mut usize,
) -> Result<BytesStart<'a>, String> {
    let mut raw = std::str::from_utf8(&element).map_err(|e| e.to_string())?.to_string();
    let name_len = element.name().as_ref().len();
    let mut changed = false;

    for attr in element.attributes().with_checks(false) {
        let attr = attr.map_err(|e| e.to_string())?;
        if !REFERENCE_ATTRIBUTES.contains(&attr.key.as_ref()) {
            continue;
        }
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| e.to_string())?;
        let value = std::str::from_utf8(&attr.value).map_err(|e| e.to_string())?;
        let Some(new_value) = rewrite_reference(value, files, source_extensions) else {
            continue;
        };
        if let Some(updated) = replace_attribute_value(&raw, key, value, &new_value) {
            raw = updated;
            changed = true;
            *count += 1;
        }
    }

    if !changed {
        return Ok(element);
    }
    Ok(BytesStart::from_content(raw, name_len))
}

fn replace_attribute_value(raw: &str, key: &str, old: &str, new: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!(
            r"\s{}\s*=\s*{q}{}{q}",
            regex::escape(key),
            regex::escape(old),
            q = quote
        );
        let re = Regex::new(&pattern).ok()?;
        if let Some(found) = re.find(raw) {
            // Value sits between the last two quotes of the match
            let value_start = found.end() - 1 - old.len();
            return Some(format!(
                "{}{}{}",
                &raw[..value_start],
                new,
                &raw[found.end() - 1..]
            ));
        }
    }
    None
}

fn sync_free_text(content: &str, files: &AliasMap, source_extensions: &[String]) -> (String, usize) {
    if files.is_empty() || source_extensions.is_empty() {
        return (content.to_string(), 0);
    }
    let extensions = source_extensions
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(re) = Regex::new(&format!(r"([\w.-]+)\.((?i:{}))\b", extensions)) else {
        return (content.to_string(), 0);
    };

    let mut count = 0;
    let result = re.replace_all(content, |caps: &Captures| match files.get(&caps[1]) {
        Some(alias) => {
            count += 1;
            format!("{}.{}", alias, &caps[2])
        }
        None => caps[0].to_string(),
    });
    (result.into_owned(), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn maps_with_file(stem: &str, alias: &str) -> AliasMaps {
        let mut maps = AliasMaps::default();
        maps.files.insert(stem.to_string(), alias.to_string());
        maps
    }

    fn exts() -> Vec<String> {
        vec!["cs".to_string()]
    }

    const CSPROJ: &str = "\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n<Project ToolsVersion=\"15.0\">\r\n  <ItemGroup>\r\n    <Compile Include=\"widget.cs\" />\r\n    <Compile Include=\"Sub\\widget.cs\"/>\r\n    <Compile Include=\"Properties\\AssemblyInfo.cs\" />\r\n    <None Include=\"widget.txt\" />\r\n  </ItemGroup>\r\n  <!-- widget.cs -->\r\n</Project>\r\n";

    #[test]
    fn test_detect_kinds() {
        let config = ManifestConfig::default();
        assert_eq!(ManifestKind::detect("App.csproj", &config), Some(ManifestKind::Structured));
        assert_eq!(ManifestKind::detect("App.sln", &config), Some(ManifestKind::FreeText));
        assert_eq!(ManifestKind::detect("AssemblyInfo.cs", &config), Some(ManifestKind::Metadata));
        assert_eq!(ManifestKind::detect("widget.cs", &config), None);
        assert_eq!(ManifestKind::detect("README", &config), None);
    }

    #[test]
    fn test_structured_rewrites_only_references() {
        let maps = maps_with_file("widget", "QwErTyUiOp");
        let manifest = Manifest::new(ManifestKind::Structured, CSPROJ.to_string());
        let (result, count) = manifest.synchronize(&maps, &exts()).unwrap();

        assert_eq!(count, 2);
        assert!(result.starts_with("\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n"));
        assert!(result.contains("<Compile Include=\"QwErTyUiOp.cs\" />"));
        assert!(result.contains("<Compile Include=\"Sub\\QwErTyUiOp.cs\"/>"));
        assert!(result.contains("Properties\\AssemblyInfo.cs"));
        assert!(result.contains("<None Include=\"widget.txt\" />"));
        assert!(result.contains("<!-- widget.cs -->"));
    }

    #[test]
    fn test_structured_round_trip_is_exact() {
        let maps = maps_with_file("widget", "QwErTyUiOp");
        let (forward, _) = Manifest::Structured(CSPROJ.to_string())
            .synchronize(&maps, &exts())
            .unwrap();
        let (back, _) = Manifest::Structured(forward)
            .synchronize(&maps.inverted(), &exts())
            .unwrap();
        assert_eq!(back, CSPROJ);
    }

    #[test]
    fn test_structured_single_quotes() {
        let maps = maps_with_file("widget", "Abc");
        let (result, count) = Manifest::Structured("<Compile Include = 'widget.cs'></Compile>".into())
            .synchronize(&maps, &exts())
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(result, "<Compile Include = 'Abc.cs'></Compile>");
    }

    #[test]
    fn test_structured_malformed_xml() {
        let maps = maps_with_file("widget", "Abc");
        let result = Manifest::Structured("<Project><Compile></Project>".into()).synchronize(&maps, &exts());
        assert!(result.is_err());
    }

    #[test]
    fn test_free_text_token_bounded() {
        let maps = maps_with_file("widget", "QwErTyUiOp");
        let sln = "Project(\"{FAE}\") = \"App\", \"App\\App.csproj\"\r\n\tSolutionItems: widget.cs, mywidget.cs, widget.csx\r\n";
        let (result, count) = Manifest::FreeText(sln.into()).synchronize(&maps, &exts()).unwrap();
        assert_eq!(count, 1);
        assert!(result.contains("SolutionItems: QwErTyUiOp.cs, mywidget.cs, widget.csx"));
        assert!(result.contains("App\\App.csproj"));
    }

    #[test]
    fn test_metadata_namespaces() {
        let mut maps = AliasMaps::default();
        maps.namespaces.insert("Demo".into(), "NsAliasAbc".into());
        let info = "[assembly: AssemblyTitle(\"Demo\")]\n[assembly: AssemblyProduct(\"Demo Suite\")]\n";
        let (result, count) = Manifest::Metadata(info.into()).synchronize(&maps, &exts()).unwrap();
        assert_eq!(count, 2);
        assert!(!result.contains("Demo"));
        let (back, _) = Manifest::Metadata(result).synchronize(&maps.inverted(), &exts()).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_synchronize_file_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("App.csproj");
        fs::write(&path, CSPROJ).unwrap();
        let maps = maps_with_file("widget", "QwErTyUiOp");

        assert!(synchronize_file(&path, ManifestKind::Structured, &maps, &exts()).unwrap());
        let once = fs::read_to_string(&path).unwrap();
        assert!(!synchronize_file(&path, ManifestKind::Structured, &maps, &exts()).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
    }
}
