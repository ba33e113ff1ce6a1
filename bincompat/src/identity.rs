//! Assembly identity model.
//!
//! Assemblies are identified by the four-part tuple of simple name, version,
//! culture, and public key token. The simple name compares case-insensitively
//! everywhere (the CLR binder folds names, and so do we); the other components
//! compare exactly. [`AssemblyId`] is the key used by the resolver memo and by
//! the redirect matcher, so its `Eq`/`Hash` contract matters.

use std::fmt;
use std::str::FromStr;

use dotscope::metadata::tables::{Assembly, AssemblyRef};

use crate::{Error, Result};

/// Four-part assembly version (`major.minor.build.revision`).
///
/// Component-wise ordering matches the CLR binder's version comparison and is
/// what the binding-redirect range check relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major component
    pub major: u16,
    /// Minor component
    pub minor: u16,
    /// Build component
    pub build: u16,
    /// Revision component
    pub revision: u16,
}

impl Version {
    /// Create a version from its four components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// The wildcard version `0.0.0.0` that matches any candidate during
    /// framework resolution.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Whether this is the wildcard version.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Parse `"1.2.3.4"` style version strings. Up to four dot-separated
    /// components; missing components default to zero.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts.len() > 4 || s.is_empty() {
            return Err(Error::Identity(format!("invalid version '{s}'")));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| Error::Identity(format!("invalid version component '{part}'")))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Complete symbolic identity of an assembly.
///
/// This is the in-memory form of both `AssemblyRef` rows (outbound references)
/// and `Assembly` rows (the definition of a loaded file).
#[derive(Debug, Clone)]
pub struct AssemblyId {
    /// Simple name, e.g. `System.Core`. Compared case-insensitively.
    pub name: String,
    /// Four-part version.
    pub version: Version,
    /// Culture for satellite assemblies; `None` means culture-neutral.
    pub culture: Option<String>,
    /// Eight-byte public key token for strong-named assemblies.
    pub public_key_token: Option<[u8; 8]>,
}

impl AssemblyId {
    /// Create an identity from its components.
    pub fn new(
        name: impl Into<String>,
        version: Version,
        culture: Option<String>,
        public_key_token: Option<[u8; 8]>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            culture,
            public_key_token,
        }
    }

    /// Build an identity from an `AssemblyRef` metadata row.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_assembly_ref(assembly_ref: &AssemblyRef) -> Self {
        Self {
            name: assembly_ref.name.clone(),
            version: Version::new(
                assembly_ref.major_version as u16,
                assembly_ref.minor_version as u16,
                assembly_ref.build_number as u16,
                assembly_ref.revision_number as u16,
            ),
            culture: assembly_ref.culture.clone(),
            public_key_token: assembly_ref
                .identifier
                .as_ref()
                .and_then(crate::identity::token_bytes),
        }
    }

    /// Build an identity from the `Assembly` row of a loaded module.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_assembly(assembly: &Assembly) -> Self {
        Self {
            name: assembly.name.clone(),
            version: Version::new(
                assembly.major_version as u16,
                assembly.minor_version as u16,
                assembly.build_number as u16,
                assembly.revision_number as u16,
            ),
            culture: assembly.culture.clone(),
            // The Assembly row carries the full public key; the token is the
            // reversed low eight bytes of its SHA-1, which the reader exposes
            // through the reference rows only. Definitions keep `None` here
            // and identity matching treats an absent token as a wildcard.
            public_key_token: None,
        }
    }

    /// Parse a CLR display name, e.g.
    /// `mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089`.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);

        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Identity("empty assembly display name".to_string()))?
            .to_string();

        let mut version = Version::zero();
        let mut culture = None;
        let mut public_key_token = None;

        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                version = Version::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if !value.eq_ignore_ascii_case("neutral") {
                    culture = Some(value.to_string());
                }
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if !value.eq_ignore_ascii_case("null") && !value.is_empty() {
                    public_key_token = parse_key_token(value);
                }
            }
        }

        Ok(Self {
            name,
            version,
            culture,
            public_key_token,
        })
    }

    /// Render the CLR display name. This string is the resolver memo key and
    /// appears verbatim in diagnostics, so its shape must stay stable.
    #[must_use]
    pub fn full_name(&self) -> String {
        let culture = self.culture.as_deref().unwrap_or("neutral");
        let token = match &self.public_key_token {
            Some(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect::<String>(),
            None => "null".to_string(),
        };
        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name, self.version, culture, token
        )
    }

    /// Case-insensitive simple-name comparison.
    #[must_use]
    pub fn name_matches(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for AssemblyId {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.version == other.version
            && self.culture == other.culture
            && self.public_key_token == other.public_key_token
    }
}

impl Eq for AssemblyId {}

impl std::hash::Hash for AssemblyId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Fold the name so hash agrees with the case-insensitive Eq.
        self.name.to_ascii_lowercase().hash(state);
        self.version.hash(state);
        self.culture.hash(state);
        self.public_key_token.hash(state);
    }
}

impl fmt::Display for AssemblyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

impl FromStr for AssemblyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Extract the eight token bytes from the reader's strong-name identity,
/// deriving them from the full public key when necessary.
pub(crate) fn token_bytes(identity: &dotscope::metadata::identity::Identity) -> Option<[u8; 8]> {
    use dotscope::metadata::identity::Identity;
    use dotscope::metadata::tables::AssemblyHashAlgorithm;

    match identity {
        Identity::Token(token) => Some(token.to_le_bytes()),
        Identity::PubKey(_) | Identity::EcmaKey(_) => identity
            .to_token(AssemblyHashAlgorithm::SHA1)
            .ok()
            .map(u64::to_le_bytes),
    }
}

/// Parse a sixteen-hex-digit public key token.
fn parse_key_token(s: &str) -> Option<[u8; 8]> {
    if s.len() != 16 {
        return None;
    }
    let mut bytes = [0u8; 8];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        bytes[i] = ((hi << 4) | lo) as u8;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_full() {
        let v = Version::parse("4.0.10.0").unwrap();
        assert_eq!(v, Version::new(4, 0, 10, 0));
    }

    #[test]
    fn version_parse_partial_components_default_to_zero() {
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0, 0));
        assert_eq!(Version::parse("7").unwrap(), Version::new(7, 0, 0, 0));
    }

    #[test]
    fn version_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.2.3.4.5").is_err());
        assert!(Version::parse("1.x").is_err());
        assert!(Version::parse("1.99999").is_err());
    }

    #[test]
    fn version_ordering_is_component_wise() {
        assert!(Version::new(1, 9, 0, 0) < Version::new(2, 0, 0, 0));
        assert!(Version::new(4, 0, 0, 0) < Version::new(4, 0, 10, 0));
    }

    #[test]
    fn display_name_round_trips() {
        let id = AssemblyId::parse(
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089",
        )
        .unwrap();
        assert_eq!(id.name, "mscorlib");
        assert_eq!(id.version, Version::new(4, 0, 0, 0));
        assert!(id.culture.is_none());
        assert_eq!(
            id.public_key_token,
            Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89])
        );

        let reparsed = AssemblyId::parse(&id.full_name()).unwrap();
        assert_eq!(id, reparsed);
    }

    #[test]
    fn simple_name_is_case_insensitive() {
        let a = AssemblyId::new("MyLib", Version::zero(), None, None);
        let b = AssemblyId::new("mylib", Version::zero(), None, None);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn culture_and_token_distinguish() {
        let neutral = AssemblyId::new("Lib", Version::zero(), None, None);
        let localized = AssemblyId::new("Lib", Version::zero(), Some("de-DE".to_string()), None);
        assert_ne!(neutral, localized);
    }

    #[test]
    fn parse_simple_name_only() {
        let id = AssemblyId::parse("JustAName").unwrap();
        assert_eq!(id.name, "JustAName");
        assert!(id.version.is_zero());
        assert_eq!(
            id.full_name(),
            "JustAName, Version=0.0.0.0, Culture=neutral, PublicKeyToken=null"
        );
    }
}
