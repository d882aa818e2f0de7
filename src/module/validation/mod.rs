//! Module validation framework
//!
//! Structural checks of code units against the extension contract, and descriptor
//! checks for ids and versions.

pub mod contract;
pub mod descriptor_validator;

pub use contract::{ExtensionContract, UnitValidation, DEFAULT_CONTRACT, LIFECYCLE_HOOK_SIGNATURE};
pub use descriptor_validator::{DescriptorValidator, ValidationResult};
