//! File system sandboxing for modules
//!
//! Keeps module file access and resource extraction inside per-module data directories.

pub mod filesystem;

pub use filesystem::{FileSystemSandbox, ModuleFiles};
