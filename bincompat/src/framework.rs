//! Platform assembly classification.
//!
//! Framework assemblies are excluded from reference analysis: their internals
//! are the host's responsibility, not the build's. Classification combines a
//! fixed name list, the `System.` prefix, and two attribute probes, and the
//! verdict for a given file is stable for the whole run.

use crate::identity::Version;
use crate::loader::LoadedAssembly;
use rustc_hash::FxHashMap;

/// Short names that always denote platform assemblies.
const FRAMEWORK_NAMES: &[&str] = &[
    "mscorlib",
    "netstandard",
    "System",
    "Accessibility",
    "Microsoft.CSharp",
    "Microsoft.VisualBasic",
    "Microsoft.VisualC",
    "Microsoft.WindowsCE.Forms",
    "PresentationCore",
    "PresentationFramework",
    "ReachFramework",
    "UIAutomationClient",
    "UIAutomationClientsideProviders",
    "UIAutomationProvider",
    "UIAutomationTypes",
    "WindowsBase",
    "WindowsFormsIntegration",
];

/// Product strings that mark an assembly as part of the .NET platform.
const FRAMEWORK_PRODUCTS: &[&str] = &["Microsoft® .NET Framework", "Microsoft® .NET"];

/// Whether a simple assembly name denotes a platform assembly.
#[must_use]
pub fn is_framework_name(name: &str) -> bool {
    FRAMEWORK_NAMES
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(name))
        || name
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("System.") && name.len() > 7)
}

/// Whether a loaded assembly is a platform assembly.
///
/// The name check is tried first; otherwise the assembly-level
/// `AssemblyProduct` and `AssemblyMetadata` attributes decide. The verdict is
/// memoized on the assembly, so repeated queries never re-decode attributes.
pub fn is_framework_assembly(assembly: &LoadedAssembly) -> bool {
    *assembly.framework.get_or_init(|| {
        if is_framework_name(assembly.name()) {
            return true;
        }

        if let Some(product) = assembly
            .find_attr("AssemblyProductAttribute")
            .and_then(crate::loader::AssemblyAttr::first_string_arg)
        {
            if FRAMEWORK_PRODUCTS.contains(&product) {
                return true;
            }
        }

        assembly
            .assembly_attrs()
            .iter()
            .filter(|attr| attr.type_name.ends_with("AssemblyMetadataAttribute"))
            .any(|attr| attr.first_string_arg() == Some(".NETFrameworkAssembly"))
    })
}

/// Whether a loaded assembly is a facade: its only type definition is
/// `<Module>` and it forwards one or more types elsewhere.
pub fn is_facade(assembly: &LoadedAssembly) -> bool {
    if assembly.typedef_count() != 1 {
        return false;
    }
    if !assembly.has_type("<Module>") {
        return false;
    }
    !assembly.forwarded_types().is_empty()
}

/// Accepted-version table for legacy framework references.
///
/// Some references bind to framework assemblies under versions that never
/// shipped as files on a modern host (legacy Visual Basic runtimes, Compact
/// Framework forms, pre-unification `System.*`). Each name maps to the full
/// set of versions the desktop binder would redirect, and a reference is
/// acceptable when it is at or below any of them.
pub struct FrameworkRedirects {
    table: FxHashMap<String, Vec<Version>>,
}

impl FrameworkRedirects {
    /// Build the table with its fixed legacy contents.
    #[must_use]
    pub fn new() -> Self {
        let mut table: FxHashMap<String, Vec<Version>> = FxHashMap::default();
        let mut add = |name: &str, version: Version| {
            table
                .entry(name.to_lowercase())
                .or_default()
                .push(version);
        };

        // Legacy Visual Basic runtimes.
        add("Microsoft.VisualBasic", Version::new(10, 0, 0, 0));
        add("Microsoft.VisualBasic.Compatibility", Version::new(10, 0, 0, 0));
        add(
            "Microsoft.VisualBasic.Compatibility.Data",
            Version::new(10, 0, 0, 0),
        );

        // Compact Framework forms.
        add("Microsoft.WindowsCE.Forms", Version::new(1, 0, 5000, 0));
        add("Microsoft.WindowsCE.Forms", Version::new(2, 0, 0, 0));
        add("Microsoft.WindowsCE.Forms", Version::new(3, 5, 0, 0));

        // Pre-unification core libraries: 1.x-era references bind up to the
        // unified desktop versions.
        for name in [
            "mscorlib",
            "System",
            "System.Data",
            "System.Drawing",
            "System.Web.Services",
            "System.Windows.Forms",
            "System.Xml",
        ] {
            add(name, Version::new(1, 0, 5000, 0));
            add(name, Version::new(2, 0, 0, 0));
            add(name, Version::new(4, 0, 0, 0));
        }

        Self { table }
    }

    /// Whether `name` has any redirect entry.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(&name.to_lowercase())
    }

    /// Whether a reference to `name` at `version` is covered: at or below one
    /// of the accepted versions for that name.
    #[must_use]
    pub fn accepts(&self, name: &str, version: Version) -> bool {
        self.table
            .get(&name.to_lowercase())
            .is_some_and(|versions| versions.iter().any(|accepted| version <= *accepted))
    }
}

impl Default for FrameworkRedirects {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_names_classify_case_insensitively() {
        assert!(is_framework_name("mscorlib"));
        assert!(is_framework_name("MSCORLIB"));
        assert!(is_framework_name("WindowsBase"));
        assert!(!is_framework_name("MyCompany.Core"));
    }

    #[test]
    fn system_prefix_classifies() {
        assert!(is_framework_name("System.Core"));
        assert!(is_framework_name("system.runtime"));
        // "System" itself is in the fixed set; "SystemX" is not platform.
        assert!(is_framework_name("System"));
        assert!(!is_framework_name("SystemX"));
    }

    #[test]
    fn redirect_table_accepts_at_or_below() {
        let redirects = FrameworkRedirects::new();
        assert!(redirects.contains("microsoft.visualbasic"));
        assert!(redirects.accepts("Microsoft.VisualBasic", Version::new(8, 0, 0, 0)));
        assert!(redirects.accepts("Microsoft.VisualBasic", Version::new(10, 0, 0, 0)));
        assert!(!redirects.accepts("Microsoft.VisualBasic", Version::new(11, 0, 0, 0)));
    }

    #[test]
    fn redirect_table_holds_version_sets_not_single_entries() {
        let redirects = FrameworkRedirects::new();
        // 1.x-era and 2.0-era references are both acceptable for System.
        assert!(redirects.accepts("System", Version::new(1, 0, 3300, 0)));
        assert!(redirects.accepts("System", Version::new(2, 0, 0, 0)));
        assert!(redirects.accepts("System", Version::new(4, 0, 0, 0)));
        assert!(!redirects.accepts("System", Version::new(5, 0, 0, 0)));
    }

    #[test]
    fn unknown_names_are_not_covered() {
        let redirects = FrameworkRedirects::new();
        assert!(!redirects.contains("MyCompany.Core"));
        assert!(!redirects.accepts("MyCompany.Core", Version::new(1, 0, 0, 0)));
    }
}
