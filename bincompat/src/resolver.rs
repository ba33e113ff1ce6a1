//! Symbolic assembly reference resolution.
//!
//! [`Resolver::resolve`] maps an [`AssemblyId`] to a loaded assembly through a
//! strict layered search: already-loaded exact matches, the input file set,
//! the platform framework directories, user-supplied directories, and finally
//! a loose name-only match among loaded assemblies. Results (including
//! negative ones) are memoized by full name, so every reference string is
//! resolved at most once per run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::framework::{self, FrameworkRedirects};
use crate::identity::{AssemblyId, Version};
use crate::loader::{LoadedAssembly, Loader};

/// Resolution attempts nested deeper than this degrade to "not found" with a
/// diagnostic instead of risking the call stack on a pathological chain.
const MAX_RESOLVE_DEPTH: usize = 64;

/// Index over the input file set used by resolution strategy 2.
#[derive(Debug, Default)]
pub struct InputIndex {
    /// Lowercased filename stem to candidate paths, in input order.
    by_stem: FxHashMap<String, Vec<PathBuf>>,
    /// Every distinct directory containing an input file, in first-seen order.
    directories: Vec<PathBuf>,
}

impl InputIndex {
    /// Build the index from the expanded input file list.
    pub fn new(inputs: &[PathBuf]) -> Self {
        let mut index = Self::default();
        for path in inputs {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                index
                    .by_stem
                    .entry(stem.to_lowercase())
                    .or_default()
                    .push(path.clone());
            }
            if let Some(dir) = path.parent() {
                if !index.directories.iter().any(|d| d == dir) {
                    index.directories.push(dir.to_path_buf());
                }
            }
        }
        index
    }

    fn stem_matches(&self, name: &str) -> &[PathBuf] {
        self.by_stem
            .get(&name.to_lowercase())
            .map_or(&[], Vec::as_slice)
    }
}

/// Layered assembly resolver with full-name memoization.
pub struct Resolver {
    loader: Loader,
    inputs: InputIndex,
    custom_dirs: Vec<PathBuf>,
    redirects: FrameworkRedirects,
    memo: FxHashMap<String, Option<Arc<LoadedAssembly>>>,
    depth: usize,
    diagnostics: Vec<String>,
}

impl Resolver {
    /// Create a resolver over the given loader and input set. `custom_dirs`
    /// are searched by strategy 4 in declared order.
    pub fn new(loader: Loader, inputs: InputIndex, custom_dirs: Vec<PathBuf>) -> Self {
        Self {
            loader,
            inputs,
            custom_dirs,
            redirects: FrameworkRedirects::new(),
            memo: FxHashMap::default(),
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Access the underlying loader.
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Mutable access to the underlying loader (the driver loads the input
    /// set through the same cache the resolver uses).
    pub fn loader_mut(&mut self) -> &mut Loader {
        &mut self.loader
    }

    /// Drain diagnostics recorded during resolution (load failures and depth
    /// exhaustion).
    pub fn drain_diagnostics(&mut self) -> Vec<String> {
        let mut out = self.loader.drain_diagnostics();
        out.append(&mut self.diagnostics);
        out
    }

    /// Resolve a symbolic reference to a loaded assembly.
    ///
    /// Returns the same result for the same full name on every call; a failed
    /// search is cached as `None`.
    pub fn resolve(&mut self, id: &AssemblyId) -> Option<Arc<LoadedAssembly>> {
        let key = id.full_name().to_lowercase();
        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }

        if self.depth >= MAX_RESOLVE_DEPTH {
            self.diagnostics.push(format!(
                "Resolution depth exceeded while resolving '{}'",
                id.full_name()
            ));
            return None;
        }

        self.depth += 1;
        let resolved = self.resolve_uncached(id);
        self.depth -= 1;

        self.memo.insert(key, resolved.clone());
        resolved
    }

    fn resolve_uncached(&mut self, id: &AssemblyId) -> Option<Arc<LoadedAssembly>> {
        // 1. Strict hit among already-loaded assemblies.
        if let Some(found) = self.loader.loaded().find(|a| a.id == *id) {
            return Some(found.clone());
        }

        // 2. The input file set: matching stems first, then a probe for
        // `{name}.dll` in every directory that contributed an input.
        let stem_candidates: Vec<PathBuf> = self.inputs.stem_matches(&id.name).to_vec();
        for path in stem_candidates {
            if let Some(assembly) = self.loader.load(&path) {
                if !assembly.is_facade() {
                    return Some(assembly);
                }
            }
        }
        let dir_candidates: Vec<PathBuf> = self
            .inputs
            .directories
            .iter()
            .map(|dir| dir.join(format!("{}.dll", id.name)))
            .collect();
        for candidate in dir_candidates {
            if candidate.is_file() {
                if let Some(assembly) = self.loader.load(&candidate) {
                    if !assembly.is_facade() {
                        return Some(assembly);
                    }
                }
            }
        }

        // 3. Platform framework locations, only for framework names.
        if framework::is_framework_name(&id.name) {
            if let Some(assembly) = self.resolve_framework(id) {
                return Some(assembly);
            }
        }

        // 4. User-supplied directories, in declared order.
        let custom_candidates: Vec<PathBuf> = self
            .custom_dirs
            .iter()
            .map(|dir| dir.join(format!("{}.dll", id.name)))
            .collect();
        for candidate in custom_candidates {
            if candidate.is_file() {
                if let Some(assembly) = self.loader.load(&candidate) {
                    return Some(assembly);
                }
            }
        }

        // 5. Last resort: loose name-only match among loaded assemblies.
        self.loader
            .loaded()
            .find(|a| a.id.name_matches(&id.name))
            .cloned()
    }

    fn resolve_framework(&mut self, id: &AssemblyId) -> Option<Arc<LoadedAssembly>> {
        let desktop_era =
            id.version <= Version::new(4, 0, 10, 0) || self.redirects.contains(&id.name);

        if cfg!(windows) && desktop_era {
            if let Some(assembly) = self.resolve_desktop_gac(id) {
                return Some(assembly);
            }
        }

        self.resolve_reference_dirs(id)
    }

    /// Desktop GAC search under `%WINDIR%/Microsoft.NET/assembly`.
    fn resolve_desktop_gac(&mut self, id: &AssemblyId) -> Option<Arc<LoadedAssembly>> {
        let windir = std::env::var_os("WINDIR").map(PathBuf::from)?;

        // mscorlib never lives in the GAC; go straight to the v4 runtime.
        if id.name_matches("mscorlib") {
            for framework_dir in ["Framework64", "Framework"] {
                let candidate = windir
                    .join("Microsoft.NET")
                    .join(framework_dir)
                    .join("v4.0.30319")
                    .join("mscorlib.dll");
                if candidate.is_file() {
                    if let Some(assembly) = self.loader.load(&candidate) {
                        return Some(assembly);
                    }
                }
            }
            return None;
        }

        let gac_root = windir.join("Microsoft.NET").join("assembly");
        for gac in ["GAC_MSIL", "GAC_32", "GAC_64"] {
            let name_dir = gac_root.join(gac).join(&id.name);
            let Ok(entries) = std::fs::read_dir(&name_dir) else {
                continue;
            };
            let mut version_dirs: Vec<PathBuf> =
                entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
            version_dirs.sort();

            for version_dir in version_dirs {
                let candidate = version_dir.join(format!("{}.dll", id.name));
                if !candidate.is_file() {
                    continue;
                }
                if let Some(assembly) = self.loader.load(&candidate) {
                    if self.accepts_framework_candidate(id, &assembly) {
                        return Some(assembly);
                    }
                }
            }
        }
        None
    }

    /// A GAC candidate satisfies the reference when the identities agree, the
    /// reference carries the wildcard version, or the redirect table covers
    /// the requested version.
    fn accepts_framework_candidate(&self, id: &AssemblyId, candidate: &LoadedAssembly) -> bool {
        if !candidate.id.name_matches(&id.name) {
            return false;
        }
        candidate.id == *id
            || id.version.is_zero()
            || self.redirects.accepts(&id.name, id.version)
    }

    /// Reference-assembly search rooted at the dotnet installation, for
    /// modern references and non-Windows hosts.
    fn resolve_reference_dirs(&mut self, id: &AssemblyId) -> Option<Arc<LoadedAssembly>> {
        let shared = dotnet_root()?.join("shared").join("Microsoft.NETCore.App");
        let Ok(entries) = std::fs::read_dir(&shared) else {
            return None;
        };

        let mut version_dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        version_dirs.sort();

        // .NET Core 3.x published the netstandard 2.1-era reference
        // assemblies, so 4.1/4.2 references map to the "3" directories.
        let prefix = if id.version.major == 4 && (id.version.minor == 1 || id.version.minor == 2) {
            "3".to_string()
        } else {
            id.version.major.to_string()
        };

        let preferred = version_dirs
            .iter()
            .rev()
            .find(|dir| dir_name_starts_with(dir, &prefix));
        let fallback = version_dirs.last();

        for dir in preferred.into_iter().chain(fallback) {
            let candidate = dir.join(format!("{}.dll", id.name));
            if candidate.is_file() {
                if let Some(assembly) = self.loader.load(&candidate) {
                    return Some(assembly);
                }
            }
        }
        None
    }
}

fn dir_name_starts_with(dir: &Path, prefix: &str) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(prefix))
}

/// Locate the dotnet installation root: `DOTNET_ROOT` when set, otherwise the
/// conventional install locations.
fn dotnet_root() -> Option<PathBuf> {
    if let Some(root) = std::env::var_os("DOTNET_ROOT") {
        let root = PathBuf::from(root);
        if root.is_dir() {
            return Some(root);
        }
    }

    let conventional: &[&str] = if cfg!(windows) {
        &["C:\\Program Files\\dotnet"]
    } else if cfg!(target_os = "macos") {
        &["/usr/local/share/dotnet"]
    } else {
        &["/usr/share/dotnet", "/usr/lib/dotnet"]
    };

    conventional
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_index_groups_by_stem_case_insensitively() {
        let inputs = vec![
            PathBuf::from("/build/out/MyLib.dll"),
            PathBuf::from("/build/tools/mylib.dll"),
            PathBuf::from("/build/out/App.exe"),
        ];
        let index = InputIndex::new(&inputs);

        assert_eq!(index.stem_matches("MYLIB").len(), 2);
        assert_eq!(index.stem_matches("app").len(), 1);
        assert!(index.stem_matches("other").is_empty());
        assert_eq!(index.directories.len(), 2);
    }

    #[test]
    fn unresolvable_reference_is_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Loader::new(dir.path(), false);
        let mut resolver = Resolver::new(loader, InputIndex::default(), Vec::new());

        let id = AssemblyId::new("Ghost", Version::new(1, 0, 0, 0), None, None);
        assert!(resolver.resolve(&id).is_none());
        // Second query hits the memo; still none, no new diagnostics.
        assert!(resolver.resolve(&id).is_none());
        assert!(resolver.drain_diagnostics().is_empty());
    }

    #[test]
    fn version_prefix_quirk_maps_41_and_42_to_3() {
        for minor in [1, 2] {
            let id = AssemblyId::new("netstandard", Version::new(4, minor, 0, 0), None, None);
            let prefix =
                if id.version.major == 4 && (id.version.minor == 1 || id.version.minor == 2) {
                    "3"
                } else {
                    "4"
                };
            assert_eq!(prefix, "3");
        }
    }
}
