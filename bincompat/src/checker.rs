//! Per-assembly reference checking.
//!
//! For every examined assembly the checker walks three reference surfaces:
//! the `AssemblyRef` table (can every referenced assembly be located, and at
//! the demanded version?), the `TypeRef` table (does every referenced type
//! exist in the assembly that is supposed to define it?), and the `MemberRef`
//! table (does every referenced member still exist with a matching shape?).
//! Failures become diagnostics; successful resolutions of internal members
//! feed the IVT recorder.

use std::path::PathBuf;
use std::sync::Arc;

use dotscope::metadata::tables::{
    CodedIndex, CustomAttributeRaw, MemberRefSignature, TableId, TypeRefRaw,
};
use dotscope::metadata::typesystem::{CilFlavor, CilTypeRc, CilTypeReference};
use rustc_hash::FxHashSet;

use crate::framework;
use crate::identity::AssemblyId;
use crate::ivt::{self, IvtRecorder};
use crate::loader::{join_type_name, LoadedAssembly};
use crate::report::DiagnosticSet;
use crate::resolver::Resolver;

/// How many forwarder hops and base-type hops a member search will follow.
const MAX_CHAIN: usize = 8;

/// Member access values from the ECMA-335 attribute masks that denote
/// assembly-scoped visibility.
const MEMBER_ACCESS_MASK: u32 = 0x0007;
const MEMBER_ACCESS_FAM_AND_ASSEM: u32 = 0x0002;
const MEMBER_ACCESS_ASSEM: u32 = 0x0003;

/// Type visibility values denoting assembly-scoped types.
const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
const TYPE_NOT_PUBLIC: u32 = 0x0000_0000;
const TYPE_NESTED_ASSEMBLY: u32 = 0x0000_0005;

/// A recorded version drift between a reference and the assembly it resolved
/// to. Initially unhandled; the redirect processor fills `handled_by`.
#[derive(Debug, Clone)]
pub struct VersionMismatch {
    /// Simple name of the referencing assembly.
    pub referencer_name: String,
    /// File the referencing assembly was loaded from.
    pub referencer_path: PathBuf,
    /// The identity the reference demands.
    pub expected: AssemblyId,
    /// The identity actually located.
    pub actual: AssemblyId,
    /// File the located assembly was loaded from.
    pub actual_path: PathBuf,
    /// Configuration files whose redirects cover this mismatch.
    pub handled_by: Vec<PathBuf>,
}

impl VersionMismatch {
    /// Report line for an unhandled mismatch.
    #[must_use]
    pub fn to_diagnostic(&self) -> String {
        format!(
            "{}: reference to '{}' was resolved with version {}",
            self.referencer_name,
            self.expected.full_name(),
            self.actual.version
        )
    }
}

/// Optional reports the checker can produce alongside the main walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckerFlags {
    /// Report type definitions marked with `TypeIdentifierAttribute`.
    pub embedded_interop_types: bool,
    /// Report member references to platform-pointer constructors.
    pub intptr_ctors: bool,
}

/// Walks references of examined assemblies and accumulates findings.
pub struct Checker {
    resolver: Resolver,
    flags: CheckerFlags,
    /// Deduplicated diagnostic lines.
    pub diagnostics: DiagnosticSet,
    /// Pending version mismatches, in discovery order.
    pub mismatches: Vec<VersionMismatch>,
    /// IVT usages recorded from resolved internal members.
    pub ivt: IvtRecorder,
    /// Lowercased short names that already failed to resolve; downstream
    /// references to them are suppressed instead of re-reported.
    unresolved: FxHashSet<String>,
}

/// Outcome of one member-reference resolution at the metadata boundary.
enum ResolveOutcome {
    /// The member exists; carries the assembly that finally defines it and
    /// whether the definition is assembly-scoped.
    Resolved {
        exposer: Arc<LoadedAssembly>,
        internal: bool,
    },
    /// The declaring type or the member itself does not exist.
    NotFound,
    /// The declaring scope could not be located.
    MissingAssembly(String),
    /// The walk itself failed; carries the message and the scope name so the
    /// caller can swallow framework-scoped failures.
    Failed { scope: String, message: String },
    /// Scope is not checkable (local, module-scoped, or array/generic shape
    /// the walk does not follow).
    Skipped,
}

/// Resolution of a referenced type to the assembly that really defines it,
/// after forwarder chasing.
enum TypeResolution {
    /// The type definition was located.
    Found {
        assembly: Arc<LoadedAssembly>,
        cil_type: CilTypeRc,
        scope: String,
    },
    /// The defining assembly was located but the type does not exist there.
    NotFound { scope: String },
    /// The declaring scope could not be located.
    MissingAssembly(String),
    /// Not a checkable cross-assembly reference.
    Skipped,
}

impl Checker {
    /// Create a checker over the given resolver.
    pub fn new(resolver: Resolver, flags: CheckerFlags) -> Self {
        Self {
            resolver,
            flags,
            diagnostics: DiagnosticSet::new(),
            mismatches: Vec::new(),
            ivt: IvtRecorder::new(),
            unresolved: FxHashSet::default(),
        }
    }

    /// Access the resolver (and through it the loader).
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Mutable access for the driver.
    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    /// Fold diagnostics recorded inside the resolver/loader into the set.
    pub fn absorb_resolver_diagnostics(&mut self) {
        for line in self.resolver.drain_diagnostics() {
            self.diagnostics.add(line);
        }
    }

    /// Run all checks for one examined assembly.
    pub fn check_assembly(&mut self, assembly: &Arc<LoadedAssembly>) {
        self.check_assembly_refs(assembly);
        self.check_type_refs(assembly);
        self.check_member_refs(assembly);
        if self.flags.embedded_interop_types {
            self.report_embedded_interop_types(assembly);
        }
        self.absorb_resolver_diagnostics();
    }

    /// Walk the `AssemblyRef` table: resolve each edge, record unresolved
    /// references and version drift, and verify type existence per edge.
    fn check_assembly_refs(&mut self, assembly: &Arc<LoadedAssembly>) {
        let refs: Vec<AssemblyId> = assembly
            .object
            .refs_assembly()
            .iter()
            .map(|entry| AssemblyId::from_assembly_ref(entry.value()))
            .collect();

        for reference in refs {
            if framework::is_framework_name(&reference.name) {
                continue;
            }

            let Some(resolved) = self.resolver.resolve(&reference) else {
                self.diagnostics.add(format!(
                    "{}: Failed to resolve assembly reference to '{}'",
                    assembly.name(),
                    reference.full_name()
                ));
                self.unresolved.insert(reference.name.to_lowercase());
                continue;
            };

            if framework::is_framework_assembly(&resolved) {
                continue;
            }

            self.check_assembly_reference(assembly, &resolved, &reference);
        }
    }

    /// Version drift plus the per-edge type-existence check.
    fn check_assembly_reference(
        &mut self,
        assembly: &Arc<LoadedAssembly>,
        resolved: &Arc<LoadedAssembly>,
        reference: &AssemblyId,
    ) {
        if reference.version != resolved.id.version {
            self.mismatches.push(VersionMismatch {
                referencer_name: assembly.name().to_string(),
                referencer_path: assembly.path.clone(),
                expected: reference.clone(),
                actual: resolved.id.clone(),
                actual_path: resolved.path.clone(),
                handled_by: Vec::new(),
            });
        }

        for type_name in self.type_refs_scoped_to(assembly, &reference.name) {
            if !resolved.has_type(&type_name) {
                self.diagnostics.add(format!(
                    "{}: Failed to resolve type reference '{}' in assembly '{}'",
                    assembly.name(),
                    type_name,
                    resolved.name()
                ));
            }
        }
    }

    /// Full names of all `TypeRef` rows in `assembly` whose resolution scope
    /// is an `AssemblyRef` with the given simple name.
    fn type_refs_scoped_to(&self, assembly: &LoadedAssembly, scope_name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let (Some(tables), Some(strings)) =
            (assembly.object.tables(), assembly.object.strings())
        else {
            return out;
        };
        let Some(table) = tables.table::<TypeRefRaw>() else {
            return out;
        };

        for row in table {
            if row.resolution_scope.tag != TableId::AssemblyRef {
                continue;
            }
            let Some(scope) = assembly
                .object
                .refs_assembly()
                .get(&row.resolution_scope.token)
            else {
                continue;
            };
            if !scope.value().name.eq_ignore_ascii_case(scope_name) {
                continue;
            }
            let name = strings.get(row.type_name as usize).unwrap_or("");
            let namespace = strings.get(row.type_namespace as usize).unwrap_or("");
            out.push(join_type_name(namespace, name));
        }
        out
    }

    /// Walk the `MemberRef` table and attempt metadata-level resolution of
    /// every cross-assembly member reference.
    fn check_member_refs(&mut self, assembly: &Arc<LoadedAssembly>) {
        struct PendingMember {
            declaring: Option<CilTypeRc>,
            name: String,
            is_field: bool,
            param_count: Option<u32>,
        }

        let members: Vec<PendingMember> = assembly
            .object
            .refs_members()
            .iter()
            .map(|entry| {
                let member = entry.value();
                let declaring = declaring_type(&member.declaredby);
                let (is_field, param_count) = match &member.signature {
                    MemberRefSignature::Method(sig) => (false, Some(sig.param_count)),
                    MemberRefSignature::Field(_) => (true, None),
                };
                PendingMember {
                    declaring,
                    name: member.name.clone(),
                    is_field,
                    param_count,
                }
            })
            .collect();

        for member in members {
            let Some(declaring) = member.declaring else {
                continue;
            };

            if self.flags.intptr_ctors {
                self.report_intptr_ctor(assembly, &declaring, &member.name);
            }

            let outcome = self.resolve_member(
                &declaring,
                &member.name,
                member.is_field,
                member.param_count,
            );

            let member_display =
                format!("{}.{}", type_full_name(&declaring), member.name);

            match outcome {
                ResolveOutcome::Resolved { exposer, internal } => {
                    if internal && ivt::friend_grants_access(&exposer, assembly) {
                        self.ivt
                            .record(exposer.name().to_string(), assembly.name(), member_display);
                    }
                }
                ResolveOutcome::NotFound => {
                    let scope = scope_assembly_name(&declaring).unwrap_or_default();
                    self.diagnostics.add(format!(
                        "{}: Failed to resolve member reference '{}' in assembly '{}'",
                        assembly.name(),
                        member_display,
                        scope
                    ));
                }
                ResolveOutcome::MissingAssembly(scope) => {
                    if self.unresolved.insert(scope.to_lowercase()) {
                        self.diagnostics.add(format!(
                            "{}: Failed to resolve assembly reference to '{}'",
                            assembly.name(),
                            scope
                        ));
                    }
                }
                ResolveOutcome::Failed { scope, message } => {
                    // Failures inside platform assemblies are the host's
                    // responsibility, not the examined set's.
                    if !framework::is_framework_name(&scope) {
                        self.diagnostics
                            .add(format!("{}: {message}", assembly.name()));
                    }
                }
                ResolveOutcome::Skipped => {}
            }
        }
    }

    /// Resolve a referenced type to its definition, following enclosing
    /// scopes and type forwarders. Shared by the type-reference walk and the
    /// member-reference walk.
    fn resolve_type(&mut self, referenced: &CilTypeRc) -> TypeResolution {
        // References to array shapes are runtime-synthesized; there is
        // nothing to resolve.
        if matches!(referenced.flavor(), CilFlavor::Array { .. }) {
            return TypeResolution::Skipped;
        }

        // Generic instantiations resolve against their open definition.
        let referenced = if matches!(referenced.flavor(), CilFlavor::GenericInstance) {
            match referenced.base() {
                Some(base) => base,
                None => return TypeResolution::Skipped,
            }
        } else {
            referenced.clone()
        };

        let Some(scope) = scope_assembly_name(&referenced) else {
            // Locally declared or module-scoped; not a cross-assembly edge.
            return TypeResolution::Skipped;
        };

        if self.unresolved.contains(&scope.to_lowercase()) {
            return TypeResolution::Skipped;
        }
        if framework::is_framework_name(&scope) {
            return TypeResolution::Skipped;
        }

        let Some(mut target) = self.resolve_scope(&referenced, &scope) else {
            return TypeResolution::MissingAssembly(scope);
        };

        if framework::is_framework_assembly(&target) {
            return TypeResolution::Skipped;
        }

        let full_name = type_full_name(&referenced);

        // Follow type forwarders to the assembly that really defines the type.
        for _ in 0..MAX_CHAIN {
            let Some(next) = target.forward_target(&full_name).map(str::to_string) else {
                break;
            };
            let next_id = AssemblyId::new(next, crate::identity::Version::zero(), None, None);
            match self.resolver.resolve(&next_id) {
                Some(assembly) => target = assembly,
                None => return TypeResolution::MissingAssembly(next_id.name),
            }
        }

        match target.type_def(&full_name) {
            Some(cil_type) => TypeResolution::Found {
                assembly: target,
                cil_type,
                scope,
            },
            None => TypeResolution::NotFound { scope },
        }
    }

    /// Walk every `TypeRef` row through full metadata resolution: forwarder
    /// chasing into the defining assembly, diagnostics for types that no
    /// longer exist, and the IVT feed for resolved internal types.
    fn check_type_refs(&mut self, assembly: &Arc<LoadedAssembly>) {
        let typerefs: Vec<CilTypeRc> = assembly
            .object
            .types()
            .iter()
            .filter(|entry| entry.value().token.table() == 0x01)
            .map(|entry| entry.value().clone())
            .collect();

        for referenced in typerefs {
            let display = type_full_name(&referenced);
            match self.resolve_type(&referenced) {
                TypeResolution::Found {
                    assembly: exposer,
                    cil_type,
                    ..
                } => {
                    if is_internal_type(&cil_type)
                        && ivt::friend_grants_access(&exposer, assembly)
                    {
                        self.ivt
                            .record(exposer.name().to_string(), assembly.name(), display);
                    }
                }
                TypeResolution::NotFound { scope } => {
                    self.diagnostics.add(format!(
                        "{}: Failed to resolve type reference '{}' in assembly '{}'",
                        assembly.name(),
                        display,
                        scope
                    ));
                }
                TypeResolution::MissingAssembly(scope) => {
                    if self.unresolved.insert(scope.to_lowercase()) {
                        self.diagnostics.add(format!(
                            "{}: Failed to resolve assembly reference to '{}'",
                            assembly.name(),
                            scope
                        ));
                    }
                }
                TypeResolution::Skipped => {}
            }
        }
    }

    /// Resolve one member reference against the assembly its declaring type
    /// lives in, following type forwarders and the base-type chain.
    fn resolve_member(
        &mut self,
        declaring: &CilTypeRc,
        member_name: &str,
        is_field: bool,
        param_count: Option<u32>,
    ) -> ResolveOutcome {
        let (mut current_assembly, mut current_type, scope) = match self.resolve_type(declaring) {
            TypeResolution::Found {
                assembly,
                cil_type,
                scope,
            } => (assembly, cil_type, scope),
            TypeResolution::NotFound { .. } => return ResolveOutcome::NotFound,
            TypeResolution::MissingAssembly(name) => {
                return ResolveOutcome::MissingAssembly(name)
            }
            TypeResolution::Skipped => return ResolveOutcome::Skipped,
        };

        let full_name = type_full_name(&current_type);

        // Search the type, then its base chain, hopping assemblies when the
        // base is itself an external reference.
        for _ in 0..MAX_CHAIN {
            if let Some(internal) =
                find_member(&current_type, member_name, is_field, param_count)
            {
                let type_internal = is_internal_type(&current_type);
                return ResolveOutcome::Resolved {
                    exposer: current_assembly,
                    internal: internal || type_internal,
                };
            }

            let Some(base) = current_type.base() else {
                return ResolveOutcome::NotFound;
            };

            if base.token.table() == 0x02 {
                current_type = base;
                continue;
            }

            // External base: locate its defining assembly and continue there.
            let Some(base_scope) = scope_assembly_name(&base) else {
                return ResolveOutcome::NotFound;
            };
            if framework::is_framework_name(&base_scope) {
                // Members inherited from platform types are the host's
                // concern, not a compatibility break in the examined set.
                return ResolveOutcome::Skipped;
            }
            let base_id =
                AssemblyId::new(base_scope, crate::identity::Version::zero(), None, None);
            let Some(base_assembly) = self.resolver.resolve(&base_id) else {
                return ResolveOutcome::MissingAssembly(base_id.name);
            };
            let base_name = type_full_name(&base);
            let Some(base_type) = base_assembly.type_def(&base_name) else {
                return ResolveOutcome::NotFound;
            };
            current_type = base_type;
            current_assembly = base_assembly;
        }

        ResolveOutcome::Failed {
            scope,
            message: format!(
                "Inheritance chain too deep while resolving '{full_name}.{member_name}'"
            ),
        }
    }

    /// Resolve the scope of a declaring type, preferring the full identity
    /// from the `AssemblyRef` row when available.
    fn resolve_scope(
        &mut self,
        declaring: &CilTypeRc,
        scope_name: &str,
    ) -> Option<Arc<LoadedAssembly>> {
        let id = match declaring.get_external() {
            Some(CilTypeReference::AssemblyRef(assembly_ref)) => {
                AssemblyId::from_assembly_ref(assembly_ref)
            }
            _ => AssemblyId::new(
                scope_name.to_string(),
                crate::identity::Version::zero(),
                None,
                None,
            ),
        };
        self.resolver.resolve(&id)
    }

    /// Report member references targeting `System.IntPtr` / `System.UIntPtr`
    /// constructors.
    fn report_intptr_ctor(
        &mut self,
        assembly: &Arc<LoadedAssembly>,
        declaring: &CilTypeRc,
        member_name: &str,
    ) {
        if member_name != ".ctor" {
            return;
        }
        let full = type_full_name(declaring);
        if full == "System.IntPtr" || full == "System.UIntPtr" {
            self.diagnostics.add(format!(
                "{}: Use of platform-pointer constructor '{full}..ctor'",
                assembly.name()
            ));
        }
    }

    /// Report type definitions carrying `TypeIdentifierAttribute` (embedded
    /// interop types copied in at compile time).
    fn report_embedded_interop_types(&mut self, assembly: &Arc<LoadedAssembly>) {
        let Some(tables) = assembly.object.tables() else {
            return;
        };
        let Some(ca_table) = tables.table::<CustomAttributeRaw>() else {
            return;
        };

        let mut marked: Vec<String> = Vec::new();
        for row in ca_table {
            if row.parent.tag != TableId::TypeDef {
                continue;
            }
            if !constructor_is_attribute(assembly, &row.constructor, "TypeIdentifierAttribute") {
                continue;
            }
            if let Some(cil_type) = assembly.object.types().get(&row.parent.token) {
                marked.push(type_full_name(&cil_type));
            }
        }

        for type_name in marked {
            self.diagnostics.add(format!(
                "{}: Embedded interop type '{type_name}'",
                assembly.name()
            ));
        }
    }
}

/// The declaring `CilType` of a member reference, when its parent is a type.
fn declaring_type(reference: &CilTypeReference) -> Option<CilTypeRc> {
    match reference {
        CilTypeReference::TypeRef(type_ref)
        | CilTypeReference::TypeDef(type_ref)
        | CilTypeReference::TypeSpec(type_ref) => type_ref.upgrade(),
        _ => None,
    }
}

/// Simple name of the `AssemblyRef` a type's resolution scope points at,
/// walking out of nested types to the outermost enclosing reference.
fn scope_assembly_name(cil_type: &CilTypeRc) -> Option<String> {
    let mut current = cil_type.clone();
    for _ in 0..MAX_CHAIN {
        let next = match current.get_external()? {
            CilTypeReference::AssemblyRef(assembly_ref) => {
                return Some(assembly_ref.name.clone());
            }
            CilTypeReference::TypeRef(enclosing) => enclosing.upgrade()?,
            _ => return None,
        };
        current = next;
    }
    None
}

/// Namespace-qualified name of a type.
fn type_full_name(cil_type: &CilTypeRc) -> String {
    join_type_name(&cil_type.namespace, &cil_type.name)
}

/// Search the declared members of `cil_type` for a match. Returns whether the
/// found member is assembly-scoped, or `None` when no member matches.
fn find_member(
    cil_type: &CilTypeRc,
    name: &str,
    is_field: bool,
    param_count: Option<u32>,
) -> Option<bool> {
    if is_field {
        for (_, field) in cil_type.fields.iter() {
            if field.name == name {
                let access = field.flags & MEMBER_ACCESS_MASK;
                return Some(
                    access == MEMBER_ACCESS_ASSEM || access == MEMBER_ACCESS_FAM_AND_ASSEM,
                );
            }
        }
        return None;
    }

    let mut name_match_any_arity = None;
    for (_, method_ref) in cil_type.methods.iter() {
        let Some(method) = method_ref.upgrade() else {
            continue;
        };
        if method.name != name {
            continue;
        }
        let internal = {
            use dotscope::metadata::method::MethodAccessFlags;
            method.flags_access == MethodAccessFlags::ASSEMBLY
                || method.flags_access == MethodAccessFlags::FAMILY_AND_ASSEMBLY
        };
        match param_count {
            Some(count) if method.signature.param_count == count => return Some(internal),
            Some(_) => name_match_any_arity = Some(internal),
            None => return Some(internal),
        }
    }
    // A name match with a different arity still proves the member family
    // exists; overload selection beyond arity is the runtime's problem.
    name_match_any_arity
}

/// Whether a type definition is visible only inside its own assembly.
fn is_internal_type(cil_type: &CilTypeRc) -> bool {
    let visibility = cil_type.flags & TYPE_VISIBILITY_MASK;
    visibility == TYPE_NOT_PUBLIC || visibility == TYPE_NESTED_ASSEMBLY
}

/// Whether an attribute constructor coded index names the given attribute
/// (matched on the simple type name).
fn constructor_is_attribute(
    assembly: &LoadedAssembly,
    constructor: &CodedIndex,
    simple_name: &str,
) -> bool {
    let type_name = match constructor.tag {
        TableId::MemberRef => assembly
            .object
            .refs_members()
            .get(&constructor.token)
            .and_then(|entry| declaring_type(&entry.value().declaredby))
            .map(|t| t.name.clone()),
        TableId::MethodDef => assembly
            .object
            .methods()
            .get(&constructor.token)
            .and_then(|entry| {
                entry
                    .value()
                    .declaring_type
                    .get()
                    .and_then(|r| r.upgrade())
            })
            .map(|t| t.name.clone()),
        _ => None,
    };
    type_name.is_some_and(|n| n == simple_name)
}
