//! Module registry
//!
//! Descriptors, registry records, and dependency resolution.

pub mod dependencies;
pub mod descriptor;
pub mod record;

pub use dependencies::{DependencyResolution, DependencyResolver};
pub use descriptor::{Descriptor, DescriptorMetadata, NORMAL_PRIORITY};
pub use record::{ModuleRecord, ModuleSnapshot};
