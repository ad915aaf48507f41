//! Path helpers
//!
//! Report paths always use forward slashes so output reads the same on every
//! platform.

use std::path::{Path, PathBuf};

/// Normalize path to forward slashes
#[inline]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert PathBuf to normalized string
#[inline]
pub fn path_to_string(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// `path` relative to `root` as a normalized string
pub fn relative_to(path: &Path, root: &Path) -> String {
    path_to_string(path.strip_prefix(root).unwrap_or(path))
}

/// Sibling of `path` whose last component carries `suffix`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", name, suffix))
}

/// Default location of the obfuscated copy: `<project><suffix>`
pub fn obfuscated_output_path(project: &Path, suffix: &str) -> PathBuf {
    sibling_with_suffix(project, suffix)
}

/// Default location of the restored copy
///
/// The obfuscated suffix in the last component is swapped for the restored one,
/// or the restored suffix is appended when it is absent.
pub fn deobfuscated_output_path(obfuscated: &Path, obfuscated_suffix: &str, restored_suffix: &str) -> PathBuf {
    let name = obfuscated
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !obfuscated_suffix.is_empty() && name.contains(obfuscated_suffix) {
        obfuscated.with_file_name(name.replace(obfuscated_suffix, restored_suffix))
    } else {
        sibling_with_suffix(obfuscated, restored_suffix)
    }
}

/// Split a file name into stem and extension at the last dot
///
/// Leading dots do not start an extension (`.gitignore` has none).
pub fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(i) if file_name[..i].chars().any(|c| c != '.') => {
            (&file_name[..i], Some(&file_name[i + 1..]))
        }
        _ => (file_name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("foo\\bar\\baz"), "foo/bar/baz");
        assert_eq!(normalize_path("foo/bar/baz"), "foo/bar/baz");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("C:\\Users\\test\\project"), "C:/Users/test/project");
    }

    #[test]
    fn test_relative_to() {
        let root = PathBuf::from("out");
        let path = root.join("Sub").join("widget.cs");
        assert_eq!(relative_to(&path, &root), "Sub/widget.cs");
    }

    #[test]
    fn test_obfuscated_output_path() {
        let project = PathBuf::from("work").join("Demo");
        assert_eq!(
            obfuscated_output_path(&project, "_Obfuscated"),
            PathBuf::from("work").join("Demo_Obfuscated")
        );
    }

    #[test]
    fn test_deobfuscated_output_path() {
        let obfuscated = PathBuf::from("work_Obfuscated").join("Demo_Obfuscated");
        assert_eq!(
            deobfuscated_output_path(&obfuscated, "_Obfuscated", "_Deobfuscated"),
            PathBuf::from("work_Obfuscated").join("Demo_Deobfuscated")
        );

        let plain = PathBuf::from("work").join("scrambled");
        assert_eq!(
            deobfuscated_output_path(&plain, "_Obfuscated", "_Deobfuscated"),
            PathBuf::from("work").join("scrambled_Deobfuscated")
        );
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("widget.cs"), ("widget", Some("cs")));
        assert_eq!(split_extension("Form1.Designer.cs"), ("Form1.Designer", Some("cs")));
        assert_eq!(split_extension(".gitignore"), (".gitignore", None));
        assert_eq!(split_extension("Makefile"), ("Makefile", None));
    }
}
