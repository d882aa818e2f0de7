//! Module loading system
//!
//! Bundle indexing, isolated loading contexts, resource staging and discovery.

pub mod bundle;
pub mod context;
pub mod extract;
pub mod host;
pub mod pool;
pub mod scanner;
pub mod unit;

pub use bundle::{BundleIndex, RESOURCES_DIR};
pub use context::{LoadingContext, ResolutionScope, ResolveError};
pub use extract::{CommitReport, ResourceExtractor, StagedResources, STAGING_DIR};
pub use host::HostScope;
pub use pool::ScanPool;
pub use scanner::{BundleResult, BundleScanner, DiscoveredModule};
pub use unit::{CodeUnit, UnitKind, UnitOrigin, UNIT_SUFFIX};
