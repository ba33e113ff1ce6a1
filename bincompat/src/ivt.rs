//! InternalsVisibleTo usage analysis.
//!
//! Whenever the checker resolves a cross-assembly reference to an internal
//! member or type, the access is only legal because the defining assembly
//! declared the consumer as a friend. Those accesses are worth auditing: they
//! are an API surface nobody promised to keep. The recorder collects them and
//! writes two reports, the full list and the Roslyn-only subset.

use std::collections::BTreeSet;
use std::path::Path;

use crate::loader::LoadedAssembly;
use crate::Result;

/// One cross-assembly access to an internal member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IvtUsage {
    /// Assembly that declares the internal member.
    pub exposer: String,
    /// Assembly performing the access.
    pub consumer: String,
    /// Member or type the access names.
    pub member: String,
}

/// Marker substrings identifying the Roslyn/IDE assemblies for the filtered
/// report.
const ROSLYN_MARKERS: &[&str] = &["Microsoft.CodeAnalysis", "VisualStudio.LanguageServices"];

/// Deduplicating recorder for IVT usages.
#[derive(Debug, Default)]
pub struct IvtRecorder {
    usages: BTreeSet<IvtUsage>,
}

impl IvtRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one usage.
    pub fn record(
        &mut self,
        exposer: impl Into<String>,
        consumer: impl Into<String>,
        member: impl Into<String>,
    ) {
        self.usages.insert(IvtUsage {
            exposer: exposer.into(),
            consumer: consumer.into(),
            member: member.into(),
        });
    }

    /// Number of distinct usages recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.usages.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    /// All usages as report lines, already sorted by the set order.
    fn lines<'a>(&'a self, filter: impl Fn(&IvtUsage) -> bool + 'a) -> Vec<String> {
        self.usages
            .iter()
            .filter(|usage| filter(usage))
            .map(|usage| format!("{}\t{}\t{}", usage.exposer, usage.consumer, usage.member))
            .collect()
    }

    /// Write `{report}.ivt.txt` and `{report}.ivt.roslyn.txt` next to the
    /// baseline report.
    pub fn write_reports(&self, report_path: &Path) -> Result<()> {
        let full_path = sibling(report_path, ".ivt.txt");
        let roslyn_path = sibling(report_path, ".ivt.roslyn.txt");

        write_lines(&full_path, &self.lines(|_| true))?;
        write_lines(
            &roslyn_path,
            &self.lines(|usage| {
                let exposer_is_roslyn = ROSLYN_MARKERS.iter().any(|m| usage.exposer.contains(m));
                let consumer_is_roslyn = ROSLYN_MARKERS.iter().any(|m| usage.consumer.contains(m));
                exposer_is_roslyn && !consumer_is_roslyn
            }),
        )
    }
}

fn sibling(report_path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = report_path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push_str(suffix);
    report_path.with_file_name(name)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut buffer = String::new();
    for line in lines {
        buffer.push_str(line);
        buffer.push('\n');
    }
    std::fs::write(path, buffer)?;
    Ok(())
}

/// Whether `consumer` may see internals of `exposer` under the exposer's
/// declared friend list. The simple name must match; when both the
/// declaration and the consumer carry keys, they must agree.
pub fn friend_grants_access(exposer: &LoadedAssembly, consumer: &LoadedAssembly) -> bool {
    exposer.friends().iter().any(|friend| {
        if !consumer.id.name_matches(&friend.name) {
            return false;
        }
        match (&friend.public_key, &consumer.id.public_key_token) {
            (Some(key), Some(token)) => {
                // The declaration carries the full key; compare through the
                // derived token so both sides use the same representation.
                // A key clause that cannot be decoded denies the grant: once
                // the declaration names a key, the key decides.
                use dotscope::metadata::identity::Identity;
                use dotscope::metadata::tables::AssemblyHashAlgorithm;
                Identity::from(key, true)
                    .and_then(|id| id.to_token(AssemblyHashAlgorithm::SHA1))
                    .map(u64::to_le_bytes)
                    .map_or(false, |derived| derived == *token)
            }
            // Key optional: a missing clause or an unsigned consumer still
            // matches by name.
            _ => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usages_deduplicate_and_sort() {
        let mut recorder = IvtRecorder::new();
        recorder.record("LibB", "LibA", "LibB.Internal.Helper");
        recorder.record("LibB", "LibA", "LibB.Internal.Helper");
        recorder.record("LibA", "LibC", "LibA.Secrets.Value");

        assert_eq!(recorder.len(), 2);
        let lines = recorder.lines(|_| true);
        assert_eq!(lines[0], "LibA\tLibC\tLibA.Secrets.Value");
        assert_eq!(lines[1], "LibB\tLibA\tLibB.Internal.Helper");
    }

    #[test]
    fn roslyn_filter_keeps_only_outside_consumers() {
        let mut recorder = IvtRecorder::new();
        recorder.record("Microsoft.CodeAnalysis.CSharp", "ThirdParty.Analyzer", "X");
        recorder.record(
            "Microsoft.CodeAnalysis.CSharp",
            "Microsoft.CodeAnalysis.Workspaces",
            "Y",
        );
        recorder.record("SomeLib", "ThirdParty.Analyzer", "Z");

        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("BinaryCompatReport.txt");
        recorder.write_reports(&report).unwrap();

        let full = std::fs::read_to_string(dir.path().join("BinaryCompatReport.txt.ivt.txt"))
            .unwrap();
        assert_eq!(full.lines().count(), 3);

        let roslyn =
            std::fs::read_to_string(dir.path().join("BinaryCompatReport.txt.ivt.roslyn.txt"))
                .unwrap();
        assert_eq!(roslyn.lines().count(), 1);
        assert!(roslyn.contains("ThirdParty.Analyzer"));
    }
}
