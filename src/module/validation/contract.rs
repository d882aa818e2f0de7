//! Extension contract checks
//!
//! A unit qualifies as a module only if it implements the host's contract, is concrete,
//! and provides every operation the contract requires.

use std::collections::BTreeSet;

use crate::module::loader::unit::{normalize_signature, CodeUnit};

/// Name of the default extension contract
pub const DEFAULT_CONTRACT: &str = "extension";

/// Signature of the lifecycle hook every module provides
pub const LIFECYCLE_HOOK_SIGNATURE: &str = "on_lifecycle_status_changed(LifecycleStatus)";

/// The host-defined base contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionContract {
    name: String,
    required_operations: BTreeSet<String>,
}

impl ExtensionContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_operations: BTreeSet::new(),
        }
    }

    pub fn require(mut self, signature: &str) -> Self {
        self.required_operations.insert(normalize_signature(signature));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_operations(&self) -> &BTreeSet<String> {
        &self.required_operations
    }

    /// Check a resolved unit against this contract
    pub fn check(&self, unit: &CodeUnit) -> UnitValidation {
        if !unit.implements(&self.name) {
            return UnitValidation::NotAnExtension;
        }
        if !unit.kind.is_concrete() {
            return UnitValidation::NotConcrete;
        }

        let missing: Vec<String> = self
            .required_operations
            .difference(&unit.operations)
            .cloned()
            .collect();
        if !missing.is_empty() {
            return UnitValidation::MissingOperations(missing);
        }

        UnitValidation::Valid
    }
}

impl Default for ExtensionContract {
    fn default() -> Self {
        Self::new(DEFAULT_CONTRACT).require(LIFECYCLE_HOOK_SIGNATURE)
    }
}

/// Outcome of checking one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitValidation {
    Valid,
    /// Does not implement the contract at all (skipped silently)
    NotAnExtension,
    /// Abstract, interface or library unit (skipped)
    NotConcrete,
    /// Claims the contract but lacks required operations (rejected)
    MissingOperations(Vec<String>),
}
