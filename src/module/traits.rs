//! Module system traits and interfaces
//!
//! Defines the extension contract modules implement, the handles the host passes to
//! them, and the error type shared by the whole module system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::module::loader::context::{LoadingContext, ResolveError};
use crate::module::logger::ModuleLogger;
use crate::module::registry::descriptor::Descriptor;
use crate::module::sandbox::ModuleFiles;

/// Module lifecycle state as tracked by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Module was discovered and instantiated but never enabled
    Loaded,
    /// Module is active
    Enabled,
    /// Module was enabled and has since been disabled
    Disabled,
    /// A lifecycle hook failed; the module is kept for inspection and unload only
    Error(String),
}

impl ModuleState {
    pub fn is_error(&self) -> bool {
        matches!(self, ModuleState::Error(_))
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::Loaded => write!(f, "loaded"),
            ModuleState::Enabled => write!(f, "enabled"),
            ModuleState::Disabled => write!(f, "disabled"),
            ModuleState::Error(reason) => write!(f, "error ({})", reason),
        }
    }
}

/// Signal delivered to a module's lifecycle hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Enabled,
    Disabled,
}

/// Extension contract every module implements
///
/// Instances are created by a [`ModuleFactory`] and are only ever called from the
/// host's authoritative lifecycle context, one hook at a time.
pub trait ExtensionModule: Send {
    /// Called when the module is enabled or disabled.
    ///
    /// On `Disabled` the module should release whatever it acquired while enabled.
    /// Returning an error (or panicking) moves the module into the error state.
    fn on_lifecycle_status_changed(&mut self, status: LifecycleStatus) -> Result<(), ModuleError>;
}

/// Constructor for a module instance, registered by the host under an entry symbol
pub trait ModuleFactory: Send + Sync {
    fn create(&self, context: ModuleContext) -> Result<Box<dyn ExtensionModule>, ModuleError>;
}

impl<F> ModuleFactory for F
where
    F: Fn(ModuleContext) -> Result<Box<dyn ExtensionModule>, ModuleError> + Send + Sync,
{
    fn create(&self, context: ModuleContext) -> Result<Box<dyn ExtensionModule>, ModuleError> {
        self(context)
    }
}

/// Read-only view of the embedding application
pub trait HostHandle: Send + Sync {
    /// Host application name
    fn name(&self) -> &str;

    /// Host application version
    fn version(&self) -> &str;

    /// Platform tag modules may target (empty = any)
    fn platform_tag(&self) -> &str {
        ""
    }
}

/// Minimal host handle for embedders without their own handle type
#[derive(Debug, Clone)]
pub struct StaticHost {
    pub name: String,
    pub version: String,
    pub platform_tag: String,
}

impl StaticHost {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform_tag: String::new(),
        }
    }

    pub fn with_platform_tag(mut self, tag: impl Into<String>) -> Self {
        self.platform_tag = tag.into();
        self
    }
}

impl HostHandle for StaticHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn platform_tag(&self) -> &str {
        &self.platform_tag
    }
}

/// Everything a module receives at construction time
///
/// `scope` is the bundle's loading context; it is the resolution scope for the whole
/// construction and stays usable for the module's lifetime until the bundle is released.
#[derive(Clone)]
pub struct ModuleContext {
    descriptor: Arc<Descriptor>,
    files: ModuleFiles,
    logger: ModuleLogger,
    host: Arc<dyn HostHandle>,
    scope: Arc<LoadingContext>,
}

impl ModuleContext {
    /// Create a new module context
    pub fn new(
        descriptor: Arc<Descriptor>,
        files: ModuleFiles,
        host: Arc<dyn HostHandle>,
        scope: Arc<LoadingContext>,
    ) -> Self {
        let logger = ModuleLogger::new(&descriptor.id);
        Self {
            descriptor,
            files,
            logger,
            host,
            scope,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Sandboxed access to the module's data directory
    pub fn files(&self) -> &ModuleFiles {
        &self.files
    }

    pub fn logger(&self) -> &ModuleLogger {
        &self.logger
    }

    pub fn host(&self) -> &Arc<dyn HostHandle> {
        &self.host
    }

    pub fn scope(&self) -> &Arc<LoadingContext> {
        &self.scope
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.descriptor.id)
            .field("data_dir", &self.files.data_dir())
            .field("scope", &self.scope.id())
            .finish()
    }
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module host misconfigured: {0}")]
    Configuration(String),

    #[error("Bundle discovery failed: {0}")]
    DiscoveryError(String),

    #[error("Invalid bundle {path:?}: {reason}")]
    InvalidBundle { path: PathBuf, reason: String },

    #[error("Invalid code unit {unit}: {reason}")]
    InvalidUnit { unit: String, reason: String },

    #[error("Code unit {unit} does not satisfy the extension contract: missing {missing:?}")]
    ContractViolation { unit: String, missing: Vec<String> },

    #[error("Entry point not found: {0}")]
    EntryPointMissing(String),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {0} is already registered")]
    DuplicateModule(String),

    #[error("Module dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Module initialization failed: {0}")]
    InitializationError(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("Lifecycle hook panicked: {0}")]
    HookPanicked(String),

    #[error("Path escapes sandbox root: {0:?}")]
    PathTraversal(PathBuf),

    #[error("Lifecycle context is no longer accepting work")]
    LifecycleContextClosed,

    #[error("Module host is shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<zip::result::ZipError> for ModuleError {
    fn from(e: zip::result::ZipError) -> Self {
        ModuleError::DiscoveryError(format!("zip: {}", e))
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::OperationError(e.to_string())
    }
}
