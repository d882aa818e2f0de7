//! Registry records
//!
//! One record per loaded module. Records are owned and mutated only by the
//! `ModuleManager`; callers get `ModuleSnapshot` copies.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::module::loader::context::LoadingContext;
use crate::module::registry::descriptor::Descriptor;
use crate::module::traits::{ExtensionModule, ModuleState};

/// Shared handle to a module instance
///
/// Shared so the instance can be moved into a lifecycle job running on the
/// authoritative context while the record stays in the registry.
pub type InstanceHandle = Arc<Mutex<Box<dyn ExtensionModule>>>;

/// Live registry entry
pub struct ModuleRecord {
    /// `None` once the module has been unloaded
    pub(crate) instance: Option<InstanceHandle>,
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) state: ModuleState,
    pub(crate) bundle_path: PathBuf,
    pub(crate) context: Arc<LoadingContext>,
}

impl ModuleRecord {
    pub(crate) fn new(
        instance: Box<dyn ExtensionModule>,
        descriptor: Arc<Descriptor>,
        bundle_path: PathBuf,
        context: Arc<LoadingContext>,
    ) -> Self {
        Self {
            instance: Some(Arc::new(Mutex::new(instance))),
            descriptor,
            state: ModuleState::Loaded,
            bundle_path,
            context,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    pub(crate) fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            descriptor: (*self.descriptor).clone(),
            state: self.state.clone(),
            bundle_path: self.bundle_path.clone(),
            context_closed: self.context.is_closed(),
        }
    }
}

/// Point-in-time copy of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSnapshot {
    pub descriptor: Descriptor,
    pub state: ModuleState,
    pub bundle_path: PathBuf,
    pub context_closed: bool,
}

impl ModuleSnapshot {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}
