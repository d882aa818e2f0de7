//! Host scope
//!
//! The parent of every loading context: units and resources owned by the host, plus the
//! entry-point table mapping unit entry symbols to module factories linked into the host.

use std::collections::HashMap;
use std::sync::Arc;

use crate::module::loader::context::{ResolutionScope, ResolveError};
use crate::module::loader::unit::{CodeUnit, UnitKind, UnitOrigin};
use crate::module::traits::ModuleFactory;

/// Host-owned resolution scope and entry-point table
#[derive(Clone, Default)]
pub struct HostScope {
    name: String,
    units: HashMap<String, Arc<CodeUnit>>,
    resources: HashMap<String, Vec<u8>>,
    entry_points: HashMap<String, Arc<dyn ModuleFactory>>,
}

impl HostScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Register a host-owned unit (origin forced to `Host`)
    pub fn with_unit(mut self, mut unit: CodeUnit) -> Self {
        unit.origin = UnitOrigin::Host;
        self.units.insert(unit.name.clone(), Arc::new(unit));
        self
    }

    /// Register the abstract base of an extension contract under `name`
    pub fn with_contract_base(self, name: &str, contract: &str) -> Self {
        self.with_unit(CodeUnit::host(name, UnitKind::Interface).implementing(contract))
    }

    pub fn with_resource(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(name.into(), contents.into());
        self
    }

    /// Register a module factory under an entry symbol
    pub fn with_entry_point<F>(mut self, symbol: impl Into<String>, factory: F) -> Self
    where
        F: ModuleFactory + 'static,
    {
        self.entry_points.insert(symbol.into(), Arc::new(factory));
        self
    }

    pub fn entry_point(&self, symbol: &str) -> Option<Arc<dyn ModuleFactory>> {
        self.entry_points.get(symbol).cloned()
    }

    pub fn entry_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.entry_points.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl ResolutionScope for HostScope {
    fn scope_name(&self) -> String {
        if self.name.is_empty() {
            "host".to_string()
        } else {
            self.name.clone()
        }
    }

    fn find_unit(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }

    fn has_unit(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    fn find_resource(&self, name: &str) -> Option<Vec<u8>> {
        self.resources.get(name).cloned()
    }
}

impl std::fmt::Debug for HostScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostScope")
            .field("name", &self.name)
            .field("units", &self.units.len())
            .field("resources", &self.resources.len())
            .field("entry_points", &self.entry_symbols())
            .finish()
    }
}
