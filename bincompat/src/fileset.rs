//! Input file-set expansion.
//!
//! The command line names inclusions (files, directories, or globs with `**`
//! and `;`-separated lists) and exclusions (prefixed `!`). This module turns
//! them into the concrete, sorted list of files a run examines. Sorting makes
//! the downstream load order, and therefore the report, deterministic.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Patterns applied when scanning a directory, unless overridden.
pub const DEFAULT_PATTERNS: &str = "*.dll;*.exe;*.dll.config;*.exe.config";

/// Exclusions always in force; satellite resource assemblies carry no
/// checkable surface of their own.
const DEFAULT_EXCLUDES: &[&str] = &["*.resources.dll"];

/// Expansion inputs.
#[derive(Debug, Clone)]
pub struct FileSetOptions {
    /// Directory that relative inclusions and globs are rooted at.
    pub root: PathBuf,
    /// Positional inclusions (without the `!` prefix).
    pub includes: Vec<String>,
    /// Exclusion patterns (the `!`-prefixed arguments, prefix stripped).
    pub excludes: Vec<String>,
    /// File patterns applied when scanning directories.
    pub patterns: Vec<String>,
    /// Whether pattern matching folds case (host policy).
    pub case_insensitive: bool,
}

impl FileSetOptions {
    /// Options scanning `root` with the default patterns.
    pub fn new(root: impl Into<PathBuf>, case_insensitive: bool) -> Self {
        Self {
            root: root.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
            patterns: split_patterns(DEFAULT_PATTERNS),
            case_insensitive,
        }
    }
}

/// Split a `;`-separated pattern list.
#[must_use]
pub fn split_patterns(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand the options into a sorted, deduplicated file list.
pub fn expand(options: &FileSetOptions) -> Result<Vec<PathBuf>> {
    let patterns = build_globset(&options.patterns, options.case_insensitive)?;

    let mut exclude_patterns: Vec<String> = DEFAULT_EXCLUDES
        .iter()
        .map(|p| (*p).to_string())
        .collect();
    exclude_patterns.extend(options.excludes.iter().cloned());
    let excludes = build_globset(&exclude_patterns, options.case_insensitive)?;

    // `**` anywhere in the inputs switches directory scans to recursive.
    let recursive = options
        .includes
        .iter()
        .chain(options.patterns.iter())
        .any(|p| p.contains("**"));

    let mut files: Vec<PathBuf> = Vec::new();

    if options.includes.is_empty() {
        scan_directory(
            &options.root,
            &options.root,
            recursive,
            &patterns,
            &excludes,
            &mut files,
        );
    }

    for include in &options.includes {
        for part in include.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let candidate = options.root.join(part);
            if candidate.is_file() {
                if !is_excluded(&excludes, &options.root, &candidate) {
                    files.push(candidate);
                }
            } else if candidate.is_dir() {
                scan_directory(
                    &candidate,
                    &options.root,
                    recursive || part.contains("**"),
                    &patterns,
                    &excludes,
                    &mut files,
                );
            } else {
                expand_glob(
                    part,
                    options,
                    recursive || part.contains("**"),
                    &excludes,
                    &mut files,
                )?;
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn scan_directory(
    dir: &Path,
    root: &Path,
    recursive: bool,
    patterns: &GlobSet,
    excludes: &GlobSet,
    files: &mut Vec<PathBuf>,
) {
    let max_depth = if recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = relative_match_path(root, path);
        if patterns.is_match(&rel) && !excludes.is_match(&rel) {
            files.push(path.to_path_buf());
        }
    }
}

fn expand_glob(
    pattern: &str,
    options: &FileSetOptions,
    recursive: bool,
    excludes: &GlobSet,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    let glob = build_globset(std::slice::from_ref(&pattern.to_string()), options.case_insensitive)?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    for entry in WalkDir::new(&options.root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_match_path(&options.root, entry.path());
        if glob.is_match(&rel) && !excludes.is_match(&rel) {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(())
}

fn is_excluded(excludes: &GlobSet, root: &Path, path: &Path) -> bool {
    excludes.is_match(relative_match_path(root, path))
}

/// Path used for pattern matching: relative to the root when possible, with
/// forward slashes regardless of host.
fn relative_match_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn build_globset(patterns: &[String], case_insensitive: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| Error::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| Error::Pattern {
        pattern: patterns.join(";"),
        message: e.to_string(),
    })
}

/// Expand `@FILE` response arguments: each line of the file becomes one
/// argument; blank lines and `#` comments are skipped.
pub fn expand_response_args(args: Vec<String>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for arg in args {
        if let Some(path) = arg.strip_prefix('@') {
            let path = PathBuf::from(path);
            let text = std::fs::read_to_string(&path).map_err(|e| Error::ResponseFile {
                path: path.clone(),
                message: e.to_string(),
            })?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                out.push(line.to_string());
            }
        } else {
            out.push(arg);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn default_scan_is_non_recursive_and_pattern_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "App.exe");
        touch(dir.path(), "Lib.dll");
        touch(dir.path(), "App.exe.config");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "sub/Nested.dll");

        let options = FileSetOptions::new(dir.path(), false);
        let files = expand(&options).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["App.exe", "App.exe.config", "Lib.dll"]);
    }

    #[test]
    fn double_star_include_recurses() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Lib.dll");
        touch(dir.path(), "sub/Nested.dll");

        let mut options = FileSetOptions::new(dir.path(), false);
        options.includes.push("**/*.dll".to_string());
        let files = expand(&options).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("sub/Nested.dll")));
    }

    #[test]
    fn resource_assemblies_are_excluded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Lib.dll");
        touch(dir.path(), "Lib.resources.dll");

        let options = FileSetOptions::new(dir.path(), false);
        let files = expand(&options).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("Lib.dll"));
    }

    #[test]
    fn explicit_exclusions_apply() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Keep.dll");
        touch(dir.path(), "Drop.dll");

        let mut options = FileSetOptions::new(dir.path(), false);
        options.excludes.push("Drop.dll".to_string());
        let files = expand(&options).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("Keep.dll"));
    }

    #[test]
    fn semicolon_lists_split_into_multiple_inclusions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A.dll");
        touch(dir.path(), "B.exe");
        touch(dir.path(), "C.dll");

        let mut options = FileSetOptions::new(dir.path(), false);
        options.includes.push("A.dll;B.exe".to_string());
        let files = expand(&options).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn case_insensitive_matching_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "UPPER.DLL");

        let options = FileSetOptions::new(dir.path(), true);
        let files = expand(&options).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn response_file_lines_become_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let rsp = dir.path().join("args.rsp");
        fs::write(&rsp, "--list-assemblies\n# comment\n\n!*.Tests.dll\n").unwrap();

        let args = expand_response_args(vec![
            "first".to_string(),
            format!("@{}", rsp.display()),
            "last".to_string(),
        ])
        .unwrap();
        assert_eq!(args, vec!["first", "--list-assemblies", "!*.Tests.dll", "last"]);
    }

    #[test]
    fn missing_response_file_is_an_error() {
        assert!(expand_response_args(vec!["@/no/such/file.rsp".to_string()]).is_err());
    }

    #[test]
    fn patterns_split_trims_and_drops_empties() {
        assert_eq!(
            split_patterns("*.dll; *.exe;;"),
            vec!["*.dll".to_string(), "*.exe".to_string()]
        );
    }
}
