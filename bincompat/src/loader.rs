//! Metadata loading and the per-path assembly cache.
//!
//! [`Loader::load`] is the single entry point for turning a file into a
//! [`LoadedAssembly`]. Files without a CLI header are rejected cheaply with a
//! PE probe before the full metadata parse; genuine parse failures become
//! diagnostics. Every path is loaded at most once per run, and every
//! non-framework load appends one entry to the examined-assemblies list.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dotscope::metadata::customattributes::{CustomAttributeArgument, CustomAttributeValue};
use dotscope::metadata::identity::Identity;
use dotscope::metadata::tables::{
    AssemblyHashAlgorithm, CodedIndex, CustomAttributeRaw, ExportedTypeRaw, TableId, TypeDefRaw,
};
use dotscope::metadata::typesystem::CilTypeReference;
use dotscope::CilObject;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::framework;
use crate::identity::AssemblyId;

/// An assembly-level custom attribute, decoded as far as the checker needs.
#[derive(Debug, Clone)]
pub struct AssemblyAttr {
    /// Full name of the attribute type, e.g.
    /// `System.Runtime.CompilerServices.InternalsVisibleToAttribute`.
    pub type_name: String,
    /// Decoded constructor value; `None` when the blob could not be parsed.
    pub value: Option<CustomAttributeValue>,
}

impl AssemblyAttr {
    /// First fixed argument as a string, when there is one.
    #[must_use]
    pub fn first_string_arg(&self) -> Option<&str> {
        match self.value.as_ref()?.fixed_args.first()? {
            CustomAttributeArgument::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A declared `InternalsVisibleTo` friend relationship.
#[derive(Debug, Clone)]
pub struct Friend {
    /// Simple name of the friend assembly.
    pub name: String,
    /// Full public key from the optional `PublicKey=` clause.
    pub public_key: Option<Vec<u8>>,
}

/// A type forwarded to another assembly via the `ExportedType` table.
#[derive(Debug, Clone)]
pub struct ForwardedType {
    /// Namespace-qualified type name.
    pub full_name: String,
    /// Simple name of the assembly the forwarder points at, when the
    /// implementation is an `AssemblyRef`.
    pub target: Option<String>,
}

/// A loaded assembly view plus the lazily built caches the checker consults.
///
/// One instance exists per file path for the lifetime of the run; everything
/// derived from the metadata (type-name set, attributes, friend list) is
/// computed on first use and kept.
pub struct LoadedAssembly {
    /// Symbolic identity from the `Assembly` row.
    pub id: AssemblyId,
    /// Origin file path as given to the loader.
    pub path: PathBuf,
    /// The underlying metadata view.
    pub object: CilObject,

    type_names: OnceCell<FxHashSet<String>>,
    defs_by_name: OnceCell<FxHashMap<String, dotscope::metadata::typesystem::CilTypeRc>>,
    attrs: OnceCell<Vec<AssemblyAttr>>,
    friends: OnceCell<Vec<Friend>>,
    forwarded: OnceCell<Vec<ForwardedType>>,
    pub(crate) framework: OnceCell<bool>,
    facade: OnceCell<bool>,
}

impl LoadedAssembly {
    fn new(id: AssemblyId, path: PathBuf, object: CilObject) -> Self {
        Self {
            id,
            path,
            object,
            type_names: OnceCell::new(),
            defs_by_name: OnceCell::new(),
            attrs: OnceCell::new(),
            friends: OnceCell::new(),
            forwarded: OnceCell::new(),
            framework: OnceCell::new(),
            facade: OnceCell::new(),
        }
    }

    /// Simple name of this assembly.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Whether a namespace-qualified type name exists in this assembly,
    /// either as a definition or as a forwarded type.
    pub fn has_type(&self, full_name: &str) -> bool {
        self.type_name_set().contains(full_name)
    }

    /// The set of type names this assembly satisfies, built on first use.
    pub fn type_name_set(&self) -> &FxHashSet<String> {
        self.type_names.get_or_init(|| {
            let mut names = FxHashSet::default();

            if let (Some(tables), Some(strings)) = (self.object.tables(), self.object.strings()) {
                if let Some(table) = tables.table::<TypeDefRaw>() {
                    for row in table {
                        let name = strings.get(row.type_name as usize).unwrap_or("");
                        let namespace = strings.get(row.type_namespace as usize).unwrap_or("");
                        names.insert(join_type_name(namespace, name));
                    }
                }
            }

            for fwd in self.forwarded_types() {
                names.insert(fwd.full_name.clone());
            }

            names
        })
    }

    /// Look up a type definition by namespace-qualified name.
    pub fn type_def(&self, full_name: &str) -> Option<dotscope::metadata::typesystem::CilTypeRc> {
        self.defs_by_name
            .get_or_init(|| {
                let mut map = FxHashMap::default();
                for entry in self.object.types().iter() {
                    let cil_type = entry.value();
                    // TypeDef rows only; the registry also holds TypeRefs and
                    // synthesized types.
                    if cil_type.token.table() != 0x02 {
                        continue;
                    }
                    map.entry(join_type_name(&cil_type.namespace, &cil_type.name))
                        .or_insert_with(|| cil_type.clone());
                }
                map
            })
            .get(full_name)
            .cloned()
    }

    /// All types forwarded out of this assembly.
    pub fn forwarded_types(&self) -> &[ForwardedType] {
        self.forwarded.get_or_init(|| {
            let mut out = Vec::new();
            let (Some(tables), Some(strings)) = (self.object.tables(), self.object.strings())
            else {
                return out;
            };
            let Some(table) = tables.table::<ExportedTypeRaw>() else {
                return out;
            };

            for row in table {
                let name = strings.get(row.name as usize).unwrap_or("");
                let namespace = strings.get(row.namespace as usize).unwrap_or("");
                let target = if row.implementation.tag == TableId::AssemblyRef {
                    self.object
                        .refs_assembly()
                        .get(&row.implementation.token)
                        .map(|entry| entry.value().name.clone())
                } else {
                    None
                };
                out.push(ForwardedType {
                    full_name: join_type_name(namespace, name),
                    target,
                });
            }
            out
        })
    }

    /// The forwarding target assembly for `full_name`, when this assembly
    /// forwards that type.
    pub fn forward_target(&self, full_name: &str) -> Option<&str> {
        self.forwarded_types()
            .iter()
            .find(|fwd| fwd.full_name == full_name)
            .and_then(|fwd| fwd.target.as_deref())
    }

    /// Assembly-level custom attributes, decoded on first use.
    pub fn assembly_attrs(&self) -> &[AssemblyAttr] {
        self.attrs.get_or_init(|| decode_assembly_attrs(&self.object))
    }

    /// The first assembly attribute with the given simple type name
    /// (matched against the last dotted segment of the attribute type).
    pub fn find_attr(&self, simple_name: &str) -> Option<&AssemblyAttr> {
        self.assembly_attrs().iter().find(|attr| {
            attr.type_name
                .rsplit('.')
                .next()
                .is_some_and(|n| n == simple_name)
        })
    }

    /// Declared `InternalsVisibleTo` friend list.
    pub fn friends(&self) -> &[Friend] {
        self.friends.get_or_init(|| {
            self.assembly_attrs()
                .iter()
                .filter(|attr| attr.type_name.ends_with("InternalsVisibleToAttribute"))
                .filter_map(AssemblyAttr::first_string_arg)
                .map(parse_friend)
                .collect()
        })
    }

    /// Target framework moniker from `TargetFrameworkAttribute`, when present.
    #[must_use]
    pub fn target_framework(&self) -> Option<&str> {
        self.find_attr("TargetFrameworkAttribute")
            .and_then(AssemblyAttr::first_string_arg)
    }

    /// Number of rows in the `TypeDef` table.
    #[must_use]
    pub fn typedef_count(&self) -> usize {
        self.object
            .tables()
            .map_or(0, |tables| tables.table_row_count(TableId::TypeDef) as usize)
    }

    /// Whether this assembly is a facade: a single `<Module>` type definition
    /// plus one or more forwarded types.
    pub fn is_facade(&self) -> bool {
        *self.facade.get_or_init(|| framework::is_facade(self))
    }
}

/// Join namespace and simple name into the CLR full-name form.
pub(crate) fn join_type_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Parse one `InternalsVisibleTo` argument: a simple name optionally followed
/// by a `PublicKey=` clause.
fn parse_friend(arg: &str) -> Friend {
    let mut name = arg.trim();
    let mut public_key = None;

    if let Some(comma) = arg.find(',') {
        name = arg[..comma].trim();
        for clause in arg[comma + 1..].split(',') {
            let clause = clause.trim();
            if let Some(hex) = clause.strip_prefix("PublicKey=") {
                public_key = decode_hex(hex.trim());
            }
        }
    }

    Friend {
        name: name.to_string(),
        public_key,
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

/// Decode all custom attributes attached to the `Assembly` row.
fn decode_assembly_attrs(object: &CilObject) -> Vec<AssemblyAttr> {
    use dotscope::metadata::customattributes::parse_custom_attribute_blob;

    let mut out = Vec::new();
    let Some(tables) = object.tables() else {
        return out;
    };
    let Some(ca_table) = tables.table::<CustomAttributeRaw>() else {
        return out;
    };
    let blob = object.blob();

    for row in ca_table {
        if row.parent.tag != TableId::Assembly {
            continue;
        }

        let Some(type_name) = attr_type_name(object, &row.constructor) else {
            continue;
        };

        let value = blob.and_then(|blob| match row.constructor.tag {
            TableId::MemberRef => object
                .refs_members()
                .get(&row.constructor.token)
                .and_then(|entry| {
                    parse_custom_attribute_blob(blob, row.value, &entry.value().params).ok()
                }),
            TableId::MethodDef => object
                .methods()
                .get(&row.constructor.token)
                .and_then(|entry| {
                    parse_custom_attribute_blob(blob, row.value, &entry.value().params).ok()
                }),
            _ => None,
        });

        out.push(AssemblyAttr { type_name, value });
    }

    out
}

/// Resolve an attribute constructor coded index to the declaring type's
/// full name.
fn attr_type_name(object: &CilObject, constructor: &CodedIndex) -> Option<String> {
    match constructor.tag {
        TableId::MemberRef => {
            let entry = object.refs_members().get(&constructor.token)?;
            match &entry.value().declaredby {
                CilTypeReference::TypeRef(type_ref) | CilTypeReference::TypeDef(type_ref) => {
                    type_ref
                        .upgrade()
                        .map(|t| join_type_name(&t.namespace, &t.name))
                }
                _ => None,
            }
        }
        TableId::MethodDef => {
            let entry = object.methods().get(&constructor.token)?;
            let method = entry.value();
            method
                .declaring_type
                .get()
                .and_then(|type_ref| type_ref.upgrade())
                .map(|t| join_type_name(&t.namespace, &t.name))
        }
        _ => None,
    }
}

/// One row of the examined-assemblies listing.
struct ExaminedEntry {
    relative_path: String,
    version: String,
    target_framework: String,
}

/// Path-memoizing assembly loader.
pub struct Loader {
    /// Root directory that examined-assemblies paths are made relative to.
    root: PathBuf,
    /// Whether path keys fold case (host policy, injected at startup).
    case_insensitive_paths: bool,
    cache: FxHashMap<String, Option<Arc<LoadedAssembly>>>,
    order: Vec<Arc<LoadedAssembly>>,
    examined: Vec<ExaminedEntry>,
    diagnostics: Vec<String>,
}

impl Loader {
    /// Create a loader rooted at `root` (paths in the examined list render
    /// relative to it).
    pub fn new(root: impl Into<PathBuf>, case_insensitive_paths: bool) -> Self {
        Self {
            root: root.into(),
            case_insensitive_paths,
            cache: FxHashMap::default(),
            order: Vec::new(),
            examined: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Load the assembly at `path`, memoized by path.
    ///
    /// Returns `None` for absent or unreadable files and for files that carry
    /// no CLI header. A metadata parse failure records a diagnostic and also
    /// caches `None`, so a broken file is reported once and never re-read.
    pub fn load(&mut self, path: &Path) -> Option<Arc<LoadedAssembly>> {
        let key = self.path_key(path);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let loaded = self.load_uncached(path);
        self.cache.insert(key, loaded.clone());
        if let Some(assembly) = &loaded {
            self.order.push(assembly.clone());
        }
        loaded
    }

    /// Whether `path` has already been loaded (successfully or not).
    #[must_use]
    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache.contains_key(&self.path_key(path))
    }

    /// All successfully loaded assemblies, in load order. Load order is
    /// deterministic for identical inputs, which keeps scans over this list
    /// (and therefore the report) stable.
    pub fn loaded(&self) -> impl Iterator<Item = &Arc<LoadedAssembly>> {
        self.order.iter()
    }

    /// Drain diagnostics recorded by failed loads.
    pub fn drain_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }

    /// The examined-assemblies section, sorted for emission.
    #[must_use]
    pub fn examined_entries(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .examined
            .iter()
            .map(|entry| {
                if entry.target_framework.is_empty() {
                    format!("{}\t{}", entry.relative_path, entry.version)
                } else {
                    format!(
                        "{}\t{}\t{}",
                        entry.relative_path, entry.version, entry.target_framework
                    )
                }
            })
            .collect();
        lines.sort();
        lines
    }

    fn load_uncached(&mut self, path: &Path) -> Option<Arc<LoadedAssembly>> {
        let data = std::fs::read(path).ok()?;
        if !is_managed_pe(&data) {
            return None;
        }

        let object = match CilObject::from_mem(data) {
            Ok(object) => object,
            Err(e) => {
                self.diagnostics
                    .push(format!("{}: {e}", display_name(path)));
                return None;
            }
        };

        let id = definition_id(&object)?;
        let assembly = Arc::new(LoadedAssembly::new(id, path.to_path_buf(), object));

        if !framework::is_framework_assembly(&assembly) {
            self.examined.push(ExaminedEntry {
                relative_path: self.relative_display(path),
                version: assembly.id.version.to_string(),
                target_framework: assembly
                    .target_framework()
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Some(assembly)
    }

    fn path_key(&self, path: &Path) -> String {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned();
        if self.case_insensitive_paths {
            canonical.to_lowercase()
        } else {
            canonical
        }
    }

    fn relative_display(&self, path: &Path) -> String {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        path.strip_prefix(&root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Cheap CLI-header probe: a PE file whose optional header carries a non-empty
/// entry at data directory index 14.
fn is_managed_pe(data: &[u8]) -> bool {
    match goblin::pe::PE::parse(data) {
        Ok(pe) => pe
            .header
            .optional_header
            .and_then(|header| {
                header
                    .data_directories
                    .get_clr_runtime_header()
                    .map(|dir| dir.virtual_address != 0 && dir.size != 0)
            })
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Identity of the definition, with the public key token derived from the
/// full key so strict matching against references works.
fn definition_id(object: &CilObject) -> Option<AssemblyId> {
    let assembly = object.assembly()?;
    let mut id = AssemblyId::from_assembly(assembly);

    if let Some(key) = &assembly.public_key {
        if !key.is_empty() {
            if let Ok(identity) = Identity::from(key, true) {
                let algo = if assembly.hash_alg_id.0 == 0 {
                    AssemblyHashAlgorithm::SHA1
                } else {
                    assembly.hash_alg_id.0
                };
                if let Ok(token) = identity.to_token(algo) {
                    id.public_key_token = Some(token.to_le_bytes());
                }
            }
        }
    }

    Some(id)
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pe_files_are_rejected_silently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.dll");
        std::fs::write(&path, b"this is not a portable executable").unwrap();

        let mut loader = Loader::new(dir.path(), false);
        assert!(loader.load(&path).is_none());
        assert!(loader.drain_diagnostics().is_empty());
        assert!(loader.is_cached(&path));
    }

    #[test]
    fn missing_files_cache_the_negative_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.dll");

        let mut loader = Loader::new(dir.path(), false);
        assert!(loader.load(&path).is_none());
        assert!(loader.load(&path).is_none());
    }

    #[test]
    fn friend_parsing_handles_public_key_clause() {
        let friend = parse_friend("MyTests, PublicKey=0024ab");
        assert_eq!(friend.name, "MyTests");
        assert_eq!(friend.public_key, Some(vec![0x00, 0x24, 0xab]));

        let bare = parse_friend("JustAName");
        assert_eq!(bare.name, "JustAName");
        assert!(bare.public_key.is_none());
    }

    #[test]
    fn type_name_joining() {
        assert_eq!(join_type_name("System", "String"), "System.String");
        assert_eq!(join_type_name("", "<Module>"), "<Module>");
    }
}
