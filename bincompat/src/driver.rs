//! Run orchestration.
//!
//! The driver expands the input set, routes configuration files to the
//! redirect processor and assemblies to the checker, then assembles the final
//! report and compares it against the baseline.

use std::path::{Path, PathBuf};

use crate::checker::{Checker, CheckerFlags};
use crate::config::{self, ConfigFile};
use crate::fileset::{self, FileSetOptions};
use crate::loader::Loader;
use crate::report::{self, BaselineStatus};
use crate::resolver::{InputIndex, Resolver};
use crate::Result;

/// Default baseline file name.
pub const DEFAULT_REPORT: &str = "BinaryCompatReport.txt";

/// Everything one run needs, with defaults matching the command-line surface.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Root directory; inclusions and the examined-assemblies listing are
    /// relative to it.
    pub root: PathBuf,
    /// Positional inclusions.
    pub includes: Vec<String>,
    /// Exclusion patterns (without the `!` prefix).
    pub excludes: Vec<String>,
    /// Directory-scan patterns.
    pub patterns: Vec<String>,
    /// Baseline/report file path.
    pub report_path: PathBuf,
    /// Append the examined-assemblies list as a second report section.
    pub list_assemblies: bool,
    /// Write the IVT reports.
    pub ivt_report: bool,
    /// Suppress version-mismatch diagnostics entirely.
    pub ignore_version_mismatch: bool,
    /// Report embedded interop types.
    pub embedded_interop_types: bool,
    /// Report platform-pointer constructor usages.
    pub intptr_ctors: bool,
    /// Extra directories for the resolver's custom search strategy.
    pub resolve_dirs: Vec<PathBuf>,
}

impl CheckOptions {
    /// Options rooted at `root` with all defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            report_path: root.join(DEFAULT_REPORT),
            root,
            includes: Vec::new(),
            excludes: Vec::new(),
            patterns: fileset::split_patterns(fileset::DEFAULT_PATTERNS),
            list_assemblies: false,
            ivt_report: false,
            ignore_version_mismatch: false,
            embedded_interop_types: false,
            intptr_ctors: false,
            resolve_dirs: Vec::new(),
        }
    }
}

/// Run a full check and compare against the baseline.
///
/// Returns the baseline status; the caller maps it to an exit code. Only
/// environmental failures (unreadable report file, invalid patterns) surface
/// as errors.
pub fn run(options: &CheckOptions) -> Result<BaselineStatus> {
    let case_insensitive = cfg!(windows);

    let files = fileset::expand(&FileSetOptions {
        root: options.root.clone(),
        includes: options.includes.clone(),
        excludes: options.excludes.clone(),
        patterns: options.patterns.clone(),
        case_insensitive,
    })?;
    log::debug!("expanded input set to {} files", files.len());

    let (config_paths, candidates): (Vec<PathBuf>, Vec<PathBuf>) =
        files.into_iter().partition(|path| is_config_file(path));

    let loader = Loader::new(&options.root, case_insensitive);
    let resolver = Resolver::new(
        loader,
        InputIndex::new(&candidates),
        options.resolve_dirs.clone(),
    );
    let mut checker = Checker::new(
        resolver,
        CheckerFlags {
            embedded_interop_types: options.embedded_interop_types,
            intptr_ctors: options.intptr_ctors,
        },
    );

    for path in &candidates {
        let Some(assembly) = checker.resolver_mut().loader_mut().load(path) else {
            continue;
        };
        if crate::framework::is_framework_assembly(&assembly) {
            log::debug!("skipping framework assembly {}", assembly.name());
            continue;
        }
        log::debug!("checking {}", assembly.name());
        checker.check_assembly(&assembly);
    }

    let mut configs: Vec<ConfigFile> = Vec::new();
    for path in &config_paths {
        match ConfigFile::parse(path) {
            Ok(config) => configs.push(config),
            Err(e) => {
                checker.diagnostics.add(e.to_string());
            }
        }
    }
    config::apply_redirects(&configs, &mut checker.mismatches);

    if !options.ignore_version_mismatch {
        for mismatch in &checker.mismatches {
            if mismatch.handled_by.is_empty() {
                checker.diagnostics.add(mismatch.to_diagnostic());
            }
        }
    }

    checker.absorb_resolver_diagnostics();

    let mut lines = checker.diagnostics.sorted_lines();
    if options.list_assemblies {
        lines.extend(checker.resolver().loader().examined_entries());
    }

    let status = report::compare_and_update(&options.report_path, &lines)?;

    if options.ivt_report {
        checker.ivt.write_reports(&options.report_path)?;
    }

    log::info!(
        "{} diagnostics, {} version mismatches, baseline {:?}",
        checker.diagnostics.len(),
        checker.mismatches.len(),
        status
    );

    Ok(status)
}

fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            let name = name.to_lowercase();
            name.ends_with(".exe.config") || name.ends_with(".dll.config")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_files_are_recognized() {
        assert!(is_config_file(Path::new("/x/App.exe.config")));
        assert!(is_config_file(Path::new("/x/Lib.DLL.CONFIG")));
        assert!(!is_config_file(Path::new("/x/App.exe")));
        assert!(!is_config_file(Path::new("/x/web.config")));
    }

    #[test]
    fn run_over_empty_directory_seeds_an_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let options = CheckOptions::new(dir.path());

        assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap(),
            ""
        );
        // Identical rerun matches the baseline.
        assert_eq!(run(&options).unwrap(), BaselineStatus::Matched);
    }

    #[test]
    fn non_assembly_inputs_produce_no_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        // A file that matches the patterns but carries no CLI header.
        std::fs::write(dir.path().join("NotManaged.dll"), b"MZ but not really").unwrap();

        let options = CheckOptions::new(dir.path());
        assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap(),
            ""
        );
    }
}
