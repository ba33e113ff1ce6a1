//! Application configuration binding redirects.
//!
//! `*.exe.config` / `*.dll.config` files can remap a requested assembly
//! version range onto the version actually deployed. A version mismatch that
//! such a redirect covers is intentional, not a break, so the redirect
//! processor marks it handled before the report is assembled.

use std::path::{Path, PathBuf};

use crate::checker::VersionMismatch;
use crate::identity::Version;
use crate::{Error, Result};

/// One `<dependentAssembly>` entry.
#[derive(Debug, Clone)]
pub struct BindingRedirect {
    /// Assembly simple name from `<assemblyIdentity name=...>`.
    pub name: String,
    /// Public key token when declared.
    pub public_key_token: Option<[u8; 8]>,
    /// Culture when declared and not `neutral`.
    pub culture: Option<String>,
    /// Inclusive old-version range from `oldVersion="lo-hi"` (a single
    /// version denotes a degenerate range).
    pub old_range: (Version, Version),
    /// Target version from `newVersion`.
    pub new_version: Version,
}

impl BindingRedirect {
    /// Whether this redirect remaps `expected` onto `actual` for the given
    /// assembly identity.
    #[must_use]
    pub fn covers(&self, mismatch: &VersionMismatch) -> bool {
        if !mismatch.expected.name_matches(&self.name) {
            return false;
        }
        if let Some(token) = &self.public_key_token {
            if mismatch.expected.public_key_token.as_ref() != Some(token) {
                return false;
            }
        }
        if let Some(culture) = &self.culture {
            if mismatch.expected.culture.as_deref() != Some(culture.as_str()) {
                return false;
            }
        }
        let (lo, hi) = self.old_range;
        mismatch.expected.version >= lo
            && mismatch.expected.version <= hi
            && mismatch.actual.version == self.new_version
    }
}

/// A parsed configuration file.
#[derive(Debug)]
pub struct ConfigFile {
    /// Path the file was read from.
    pub path: PathBuf,
    /// All binding redirects declared in the file.
    pub redirects: Vec<BindingRedirect>,
}

impl ConfigFile {
    /// Parse an application configuration file.
    ///
    /// Only the binding-redirect subset of the schema is interpreted;
    /// everything else in the document is ignored. Entries missing a name,
    /// an old range, or a new version are skipped.
    pub fn parse(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let doc = roxmltree::Document::parse(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut redirects = Vec::new();
        for dependent in doc
            .descendants()
            .filter(|node| node.has_tag_name_local("dependentAssembly"))
        {
            let identity = dependent
                .children()
                .find(|node| node.has_tag_name_local("assemblyIdentity"));
            let redirect = dependent
                .children()
                .find(|node| node.has_tag_name_local("bindingRedirect"));

            let (Some(identity), Some(redirect)) = (identity, redirect) else {
                continue;
            };
            let Some(name) = identity.attribute("name") else {
                continue;
            };
            let Some(old_range) = redirect.attribute("oldVersion").and_then(parse_range) else {
                continue;
            };
            let Some(new_version) = redirect
                .attribute("newVersion")
                .and_then(|v| Version::parse(v).ok())
            else {
                continue;
            };

            let public_key_token = identity
                .attribute("publicKeyToken")
                .filter(|t| !t.eq_ignore_ascii_case("null"))
                .and_then(parse_token);
            let culture = identity
                .attribute("culture")
                .filter(|c| !c.eq_ignore_ascii_case("neutral"))
                .map(str::to_string);

            redirects.push(BindingRedirect {
                name: name.to_string(),
                public_key_token,
                culture,
                old_range,
                new_version,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            redirects,
        })
    }

    /// Whether this config file belongs to the given referencing file:
    /// `{referencer-file-name}.config`, compared case-insensitively.
    #[must_use]
    pub fn applies_to(&self, referencer_path: &Path) -> bool {
        let Some(config_name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let Some(referencer_name) = referencer_path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        config_name.eq_ignore_ascii_case(&format!("{referencer_name}.config"))
    }
}

/// Mark every mismatch covered by some applicable redirect as handled.
pub fn apply_redirects(configs: &[ConfigFile], mismatches: &mut [VersionMismatch]) {
    for mismatch in mismatches.iter_mut() {
        for config in configs {
            if !config.applies_to(&mismatch.referencer_path) {
                continue;
            }
            if config.redirects.iter().any(|r| r.covers(mismatch)) {
                mismatch.handled_by.push(config.path.clone());
            }
        }
    }
}

/// Parse `"lo-hi"` or a single version into an inclusive range.
fn parse_range(s: &str) -> Option<(Version, Version)> {
    match s.split_once('-') {
        Some((lo, hi)) => Some((Version::parse(lo.trim()).ok()?, Version::parse(hi.trim()).ok()?)),
        None => {
            let v = Version::parse(s.trim()).ok()?;
            Some((v, v))
        }
    }
}

fn parse_token(s: &str) -> Option<[u8; 8]> {
    if s.len() != 16 {
        return None;
    }
    let mut bytes = [0u8; 8];
    for (i, pair) in s.as_bytes().chunks(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        bytes[i] = ((hi << 4) | lo) as u8;
    }
    Some(bytes)
}

/// `roxmltree` matches qualified names; the binding-redirect schema uses the
/// `urn:schemas-microsoft-com:asm.v1` namespace, so compare local names only.
trait LocalName {
    fn has_tag_name_local(&self, name: &str) -> bool;
}

impl LocalName for roxmltree::Node<'_, '_> {
    fn has_tag_name_local(&self, name: &str) -> bool {
        self.is_element() && self.tag_name().name() == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AssemblyId;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<configuration>
  <runtime>
    <assemblyBinding xmlns="urn:schemas-microsoft-com:asm.v1">
      <dependentAssembly>
        <assemblyIdentity name="MyLib" publicKeyToken="b77a5c561934e089" culture="neutral" />
        <bindingRedirect oldVersion="1.0.0.0-2.0.0.0" newVersion="2.0.0.0" />
      </dependentAssembly>
      <dependentAssembly>
        <assemblyIdentity name="Other" />
        <bindingRedirect oldVersion="3.5.0.0" newVersion="4.0.0.0" />
      </dependentAssembly>
    </assemblyBinding>
  </runtime>
</configuration>
"#;

    fn write_sample(dir: &tempfile::TempDir, file_name: &str) -> PathBuf {
        let path = dir.path().join(file_name);
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    fn mismatch(name: &str, expected: Version, actual: Version) -> VersionMismatch {
        VersionMismatch {
            referencer_name: "App".to_string(),
            referencer_path: PathBuf::from("/build/App.exe"),
            expected: AssemblyId::new(
                name,
                expected,
                None,
                Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]),
            ),
            actual: AssemblyId::new(name, actual, None, None),
            actual_path: PathBuf::from(format!("/build/{name}.dll")),
            handled_by: Vec::new(),
        }
    }

    #[test]
    fn parses_both_range_and_single_version_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, "App.exe.config");
        let config = ConfigFile::parse(&path).unwrap();

        assert_eq!(config.redirects.len(), 2);
        assert_eq!(config.redirects[0].name, "MyLib");
        assert_eq!(
            config.redirects[0].old_range,
            (Version::new(1, 0, 0, 0), Version::new(2, 0, 0, 0))
        );
        assert_eq!(
            config.redirects[1].old_range,
            (Version::new(3, 5, 0, 0), Version::new(3, 5, 0, 0))
        );
    }

    #[test]
    fn covered_mismatch_is_marked_handled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, "App.exe.config");
        let config = ConfigFile::parse(&path).unwrap();

        let mut mismatches = vec![mismatch(
            "MyLib",
            Version::new(1, 0, 0, 0),
            Version::new(2, 0, 0, 0),
        )];
        apply_redirects(&[config], &mut mismatches);
        assert_eq!(mismatches[0].handled_by.len(), 1);
    }

    #[test]
    fn redirect_for_other_executable_does_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, "SomeoneElse.exe.config");
        let config = ConfigFile::parse(&path).unwrap();

        let mut mismatches = vec![mismatch(
            "MyLib",
            Version::new(1, 0, 0, 0),
            Version::new(2, 0, 0, 0),
        )];
        apply_redirects(&[config], &mut mismatches);
        assert!(mismatches[0].handled_by.is_empty());
    }

    #[test]
    fn version_outside_old_range_is_not_covered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(&dir, "App.exe.config");
        let config = ConfigFile::parse(&path).unwrap();

        // Expected version above the declared range.
        let mut mismatches = vec![mismatch(
            "MyLib",
            Version::new(3, 0, 0, 0),
            Version::new(2, 0, 0, 0),
        )];
        apply_redirects(&[config], &mut mismatches);
        assert!(mismatches[0].handled_by.is_empty());

        // Actual version differs from newVersion.
        let mut mismatches = vec![mismatch(
            "MyLib",
            Version::new(1, 5, 0, 0),
            Version::new(2, 1, 0, 0),
        )];
        let config = ConfigFile::parse(&path).unwrap();
        apply_redirects(&[config], &mut mismatches);
        assert!(mismatches[0].handled_by.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Broken.exe.config");
        std::fs::write(&path, "<configuration><unclosed>").unwrap();
        assert!(ConfigFile::parse(&path).is_err());
    }
}
