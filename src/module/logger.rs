//! Per-module logger handed to module instances
//!
//! Thin wrapper over `tracing` that tags every event with the module id, so module
//! output lands in the host's subscriber alongside host diagnostics.

use tracing::{debug, error, info, warn};

/// Logger scoped to one module
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    module_id: String,
}

impl ModuleLogger {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn info(&self, message: &str) {
        info!(target: "module", module = %self.module_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(target: "module", module = %self.module_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(target: "module", module = %self.module_id, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(target: "module", module = %self.module_id, "{}", message);
    }
}
