//! Diagnostic collection and baseline comparison.
//!
//! Diagnostics are plain lines of text keyed by their own content. The store
//! deduplicates case-insensitively and emits in a total, deterministic order,
//! which is what makes the baseline file byte-stable across runs.

use std::fs;
use std::io::Write;
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::Result;

/// Deduplicating diagnostic store.
///
/// Insertion order is irrelevant; [`DiagnosticSet::sorted_lines`] defines the
/// emission order. Two lines differing only in case count as one diagnostic,
/// and the first spelling inserted wins.
#[derive(Debug, Default)]
pub struct DiagnosticSet {
    entries: FxHashMap<String, String>,
}

impl DiagnosticSet {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a diagnostic line. Returns `true` if the line was new.
    pub fn add(&mut self, line: impl Into<String>) -> bool {
        let line = line.into();
        let key = line.to_lowercase();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, line);
        true
    }

    /// Number of distinct diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All diagnostics in emission order: case-insensitive lexicographic,
    /// ties broken by raw bytes so the order is total.
    #[must_use]
    pub fn sorted_lines(&self) -> Vec<String> {
        let mut lines: Vec<&String> = self.entries.values().collect();
        lines.sort_by(|a, b| {
            a.to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b))
        });
        lines.into_iter().cloned().collect()
    }
}

/// Outcome of comparing the current report against the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineStatus {
    /// No baseline existed; the report was written as the new baseline.
    Created,
    /// The report matches the baseline line for line.
    Matched,
    /// The report diverged; the baseline was rewritten and the run fails.
    Diverged,
}

/// Compare `lines` against the baseline at `path`.
///
/// Missing baseline: seed it and return [`BaselineStatus::Created`]. On
/// divergence the differences are written to stderr, the baseline is
/// overwritten best-effort (a write failure is not an error; the divergence
/// already decides the outcome), and [`BaselineStatus::Diverged`] returns.
pub fn compare_and_update(path: &Path, lines: &[String]) -> Result<BaselineStatus> {
    let mut buffer = String::new();
    for line in lines {
        buffer.push_str(line);
        buffer.push('\n');
    }

    if !path.exists() {
        fs::write(path, &buffer)?;
        return Ok(BaselineStatus::Created);
    }

    let existing = fs::read_to_string(path)?;
    let old_lines: Vec<&str> = split_report_lines(&existing);
    let new_lines: Vec<&str> = lines.iter().map(String::as_str).collect();

    if old_lines == new_lines {
        return Ok(BaselineStatus::Matched);
    }

    print_diff(path, &old_lines, &new_lines);

    if let Err(e) = fs::write(path, &buffer) {
        log::warn!("could not update baseline '{}': {e}", path.display());
    }

    Ok(BaselineStatus::Diverged)
}

/// Split a report file into lines, tolerating CRLF and a trailing newline.
fn split_report_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Write the removed/added lines to stderr.
fn print_diff(path: &Path, old_lines: &[&str], new_lines: &[&str]) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();

    let _ = writeln!(out, "report differs from baseline {}:", path.display());
    for line in old_lines {
        if !new_lines.contains(line) {
            let _ = writeln!(out, "-{line}");
        }
    }
    for line in new_lines {
        if !old_lines.contains(line) {
            let _ = writeln!(out, "+{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_dropped_case_insensitively() {
        let mut set = DiagnosticSet::new();
        assert!(set.add("A: missing member"));
        assert!(!set.add("a: MISSING member"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.sorted_lines(), vec!["A: missing member".to_string()]);
    }

    #[test]
    fn emission_order_is_total_and_deterministic() {
        let mut set = DiagnosticSet::new();
        set.add("beta");
        set.add("Alpha");
        set.add("alpha2");
        assert_eq!(
            set.sorted_lines(),
            vec![
                "Alpha".to_string(),
                "alpha2".to_string(),
                "beta".to_string()
            ]
        );
    }

    #[test]
    fn baseline_seed_then_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let lines = vec!["one".to_string(), "two".to_string()];

        assert_eq!(
            compare_and_update(&path, &lines).unwrap(),
            BaselineStatus::Created
        );
        assert_eq!(
            compare_and_update(&path, &lines).unwrap(),
            BaselineStatus::Matched
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn baseline_divergence_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");

        compare_and_update(&path, &["old".to_string()]).unwrap();
        let status = compare_and_update(&path, &["new".to_string()]).unwrap();
        assert_eq!(status, BaselineStatus::Diverged);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn empty_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");

        compare_and_update(&path, &[]).unwrap();
        assert_eq!(
            compare_and_update(&path, &[]).unwrap(),
            BaselineStatus::Matched
        );
    }

    #[test]
    fn crlf_baseline_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        fs::write(&path, "one\r\ntwo\r\n").unwrap();

        let lines = vec!["one".to_string(), "two".to_string()];
        assert_eq!(
            compare_and_update(&path, &lines).unwrap(),
            BaselineStatus::Matched
        );
    }
}
