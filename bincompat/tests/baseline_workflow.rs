//! End-to-end baseline workflow over synthetic input sets.
//!
//! These tests drive the full pipeline (file-set expansion, config routing,
//! report assembly, baseline comparison) without real assemblies: inputs that
//! carry no CLI header are silently skipped, so the observable behavior is
//! the report lifecycle itself.

use std::fs;
use std::path::Path;

use bincompat::driver::{run, CheckOptions, DEFAULT_REPORT};
use bincompat::report::BaselineStatus;

fn touch(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[test]
fn seeding_then_rerunning_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "NotReally.dll", "MZ nope");
    touch(dir.path(), "AlsoNot.exe", "still nope");

    let options = CheckOptions::new(dir.path());
    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);

    let seeded = fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap();

    // Invariant: identical inputs reproduce the baseline byte for byte.
    assert_eq!(run(&options).unwrap(), BaselineStatus::Matched);
    let rerun = fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap();
    assert_eq!(seeded, rerun);
}

#[test]
fn malformed_config_becomes_a_diagnostic_and_a_divergence() {
    let dir = tempfile::tempdir().unwrap();
    let options = CheckOptions::new(dir.path());

    // Seed with a clean (empty) baseline.
    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);

    // A broken config file appears; the report must change and the run fail.
    touch(dir.path(), "App.exe.config", "<configuration><unclosed>");
    assert_eq!(run(&options).unwrap(), BaselineStatus::Diverged);

    let report = fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap();
    assert!(
        report.contains("App.exe.config"),
        "report should name the offending config: {report:?}"
    );

    // The rewritten baseline makes the next run green again.
    assert_eq!(run(&options).unwrap(), BaselineStatus::Matched);
}

#[test]
fn well_formed_config_without_mismatches_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    touch(
        dir.path(),
        "App.exe.config",
        r#"<?xml version="1.0"?>
<configuration>
  <runtime>
    <assemblyBinding xmlns="urn:schemas-microsoft-com:asm.v1">
      <dependentAssembly>
        <assemblyIdentity name="MyLib" publicKeyToken="b77a5c561934e089" />
        <bindingRedirect oldVersion="1.0.0.0-2.0.0.0" newVersion="2.0.0.0" />
      </dependentAssembly>
    </assemblyBinding>
  </runtime>
</configuration>
"#,
    );

    let options = CheckOptions::new(dir.path());
    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
    assert_eq!(
        fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap(),
        ""
    );
}

#[test]
fn report_path_can_live_outside_the_root() {
    let inputs = tempfile::tempdir().unwrap();
    let reports = tempfile::tempdir().unwrap();
    touch(inputs.path(), "Thing.dll", "not managed");

    let mut options = CheckOptions::new(inputs.path());
    options.report_path = reports.path().join("custom-report.txt");

    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
    assert!(options.report_path.is_file());
    assert!(!inputs.path().join(DEFAULT_REPORT).exists());
}

#[test]
fn explicit_exclusions_suppress_config_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "Broken.exe.config", "<not xml");

    let mut options = CheckOptions::new(dir.path());
    options.excludes.push("Broken.exe.config".to_string());

    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
    assert_eq!(
        fs::read_to_string(dir.path().join(DEFAULT_REPORT)).unwrap(),
        ""
    );
}

#[test]
fn ivt_reports_are_written_even_when_empty() {
    let dir = tempfile::tempdir().unwrap();

    let mut options = CheckOptions::new(dir.path());
    options.ivt_report = true;

    assert_eq!(run(&options).unwrap(), BaselineStatus::Created);
    assert!(dir
        .path()
        .join(format!("{DEFAULT_REPORT}.ivt.txt"))
        .is_file());
    assert!(dir
        .path()
        .join(format!("{DEFAULT_REPORT}.ivt.roslyn.txt"))
        .is_file());
}
