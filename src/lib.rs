//! BLLVM module host - in-process extension orchestrator
//!
//! Lets a host application be extended by third-party bundles without recompiling it.
//! Bundles are discovered on disk, each loaded inside an isolated loading context,
//! ordered by their declared dependencies, and driven through their lifecycle.
//!
//! ## Design Principles
//!
//! 1. **Host owns the registry**: No global state; the host constructs and owns the `ModuleManager`
//! 2. **Isolation by delegation**: Host units are shared, bundle units stay private unless exported
//! 3. **Failure containment**: Discovery and lifecycle failures are recovered per item
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use bllvm_module_host::config::ModuleHostConfig;
//! use bllvm_module_host::module::{HostScope, ModuleManager, StaticHost};
//!
//! # async fn run() -> Result<(), bllvm_module_host::module::ModuleError> {
//! let host = Arc::new(StaticHost::new("my-app", "1.0.0"));
//! let manager = ModuleManager::new(ModuleHostConfig::default(), host)?
//!     .with_host_scope(HostScope::new("my-app"));
//!
//! manager.initialize().await;
//! // ...
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod module;
pub mod utils;

// Re-export config module
pub use config::*;
pub use module::{ModuleError, ModuleManager};
