//! Code units
//!
//! A code unit is the resolvable thing a loading context hands out: a declaration of
//! what the unit is, which contracts it implements, which operations it provides, and
//! the host entry symbol that constructs it. Bundle units are TOML documents stored at
//! `<dotted/name>.unit`; host units are built in code.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

use crate::module::registry::descriptor::DescriptorMetadata;

/// File suffix of code units inside a bundle
pub const UNIT_SUFFIX: &str = ".unit";

/// What kind of unit this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Concrete, instantiable
    #[default]
    Module,
    Abstract,
    Interface,
    /// Support code, never instantiated
    Library,
}

impl UnitKind {
    pub fn is_concrete(&self) -> bool {
        matches!(self, UnitKind::Module)
    }
}

/// Where a unit was defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    /// Owned by the host (parent scope)
    Host,
    /// Defined in a bundle
    Bundle { context: Uuid, path: PathBuf },
}

/// A resolved code unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    pub name: String,
    pub kind: UnitKind,
    /// Contract names this unit implements
    pub implements: Vec<String>,
    /// Normalized operation signatures
    pub operations: BTreeSet<String>,
    /// Host entry symbol that constructs an instance
    pub entry: Option<String>,
    /// `[module]` metadata, if any
    pub metadata: Option<DescriptorMetadata>,
    pub origin: UnitOrigin,
}

/// On-disk form of a unit
#[derive(Debug, Deserialize)]
struct UnitDefinition {
    #[serde(default)]
    kind: UnitKind,
    #[serde(default)]
    implements: Vec<String>,
    #[serde(default)]
    operations: Vec<String>,
    entry: Option<String>,
    module: Option<DescriptorMetadata>,
}

impl CodeUnit {
    /// Create a host-owned unit
    pub fn host(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            implements: Vec::new(),
            operations: BTreeSet::new(),
            entry: None,
            metadata: None,
            origin: UnitOrigin::Host,
        }
    }

    pub fn implementing(mut self, contract: impl Into<String>) -> Self {
        self.implements.push(contract.into());
        self
    }

    pub fn with_operation(mut self, signature: &str) -> Self {
        self.operations.insert(normalize_signature(signature));
        self
    }

    pub fn with_entry(mut self, symbol: impl Into<String>) -> Self {
        self.entry = Some(symbol.into());
        self
    }

    pub fn with_metadata(mut self, metadata: DescriptorMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Parse a bundle unit document
    pub fn parse(name: &str, source: &str, origin: UnitOrigin) -> Result<Self, toml::de::Error> {
        let definition: UnitDefinition = toml::from_str(source)?;
        Ok(Self {
            name: name.to_string(),
            kind: definition.kind,
            implements: definition.implements,
            operations: definition
                .operations
                .iter()
                .map(|op| normalize_signature(op))
                .collect(),
            entry: definition.entry.filter(|e| !e.trim().is_empty()),
            metadata: definition.module,
            origin,
        })
    }

    pub fn implements(&self, contract: &str) -> bool {
        self.implements.iter().any(|c| c == contract)
    }

    pub fn is_from_host(&self) -> bool {
        self.origin == UnitOrigin::Host
    }
}

/// Normalize an operation signature for set comparison (whitespace removed)
pub fn normalize_signature(signature: &str) -> String {
    signature.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Map a bundle entry path to a unit name (`a/b/C.unit` → `a.b.C`)
pub fn unit_name_from_path(entry: &str) -> Option<String> {
    let entry = entry.replace('\\', "/");
    let stem = entry.strip_suffix(UNIT_SUFFIX)?;
    let name: Vec<&str> = stem.split('/').filter(|s| !s.is_empty()).collect();
    if name.is_empty() || name.iter().any(|s| *s == "." || *s == "..") {
        return None;
    }
    Some(name.join("."))
}
