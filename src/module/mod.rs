//! Module system for the extension host
//!
//! Discovers bundles on disk, loads each one inside its own loading context, orders
//! modules by their declared dependencies and drives them through
//! load → enable → disable → unload.
//!
//! ## Architecture
//!
//! - **Isolation**: Each bundle resolves names through its own `LoadingContext`; host
//!   units keep one identity across bundles
//! - **Ordering**: Dependencies are enabled before dependents and disabled after them
//! - **Containment**: A broken bundle, unit or hook is logged and excluded, never fatal
//! - **Single writer**: Only the `ModuleManager` mutates module records, and every hook runs
//!   on one authoritative lifecycle context

pub mod lifecycle;
pub mod loader;
pub mod logger;
pub mod manager;
pub mod registry;
pub mod sandbox;
pub mod traits;
pub mod validation;

pub use lifecycle::{AuthoritativeContext, InlineContext, LifecycleJob, SerialContext};
pub use loader::{CodeUnit, HostScope, LoadingContext, ResolutionScope, ResolveError, UnitKind};
pub use logger::ModuleLogger;
pub use manager::{LoadReport, ModuleManager};
pub use registry::{Descriptor, DescriptorMetadata, ModuleSnapshot, NORMAL_PRIORITY};
pub use sandbox::ModuleFiles;
pub use traits::{
    ExtensionModule, HostHandle, LifecycleStatus, ModuleContext, ModuleError, ModuleFactory,
    ModuleState, StaticHost,
};
pub use validation::{ExtensionContract, DEFAULT_CONTRACT, LIFECYCLE_HOOK_SIGNATURE};
