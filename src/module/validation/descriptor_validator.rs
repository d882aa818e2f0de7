//! Descriptor validation
//!
//! Checks module ids and versions before a module is admitted. Invalid ids reject the
//! unit; a malformed version only produces a warning.

use tracing::{debug, warn};

use crate::module::registry::descriptor::Descriptor;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Descriptor is valid
    Valid,
    /// Descriptor is usable but has problems worth reporting
    Warnings(Vec<String>),
    /// Descriptor is invalid with specific errors
    Invalid(Vec<String>),
}

/// Descriptor validator
pub struct DescriptorValidator {
    /// Maximum id length
    max_id_len: usize,
}

impl DescriptorValidator {
    /// Create a new descriptor validator
    pub fn new() -> Self {
        Self { max_id_len: 64 }
    }

    /// Validate a module descriptor
    pub fn validate(&self, descriptor: &Descriptor) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !self.is_valid_id(&descriptor.id) {
            errors.push(format!(
                "Invalid module id: {:?} (must be alphanumeric with dashes/underscores/dots, at most {} chars)",
                descriptor.id, self.max_id_len
            ));
        }

        if !descriptor.version.is_empty() && !self.is_valid_version(&descriptor.version) {
            warnings.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                descriptor.version
            ));
        }

        for dep in descriptor.declared_dependencies() {
            if dep == descriptor.id {
                warnings.push(format!("Module {} depends on itself", descriptor.id));
            } else if !self.is_valid_id(dep) {
                warnings.push(format!("Invalid dependency id: {}", dep));
            }
        }

        if !errors.is_empty() {
            warn!(
                "Descriptor validation failed for module {}: {:?}",
                descriptor.id, errors
            );
            ValidationResult::Invalid(errors)
        } else if !warnings.is_empty() {
            ValidationResult::Warnings(warnings)
        } else {
            debug!("Descriptor validation passed for module: {}", descriptor.id);
            ValidationResult::Valid
        }
    }

    /// Validate module id format
    #[inline]
    fn is_valid_id(&self, id: &str) -> bool {
        if id.is_empty() || id.len() > self.max_id_len {
            return false;
        }

        // Must start with alphanumeric
        if !id.chars().next().map_or(false, |c| c.is_alphanumeric()) {
            return false;
        }

        id.chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    }

    /// Validate version format (semantic versioning)
    ///
    /// Accepts: major.minor[.patch][-prerelease][+build]
    #[inline]
    fn is_valid_version(&self, version: &str) -> bool {
        let base = version.split('+').next().unwrap_or(version);
        let version_part = base.split('-').next().unwrap_or(base);

        let nums: Vec<&str> = version_part.split('.').collect();
        if nums.len() < 2 || nums.len() > 3 {
            return false;
        }

        nums.iter().all(|n| {
            !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && n.parse::<u32>().is_ok()
        })
    }
}

impl Default for DescriptorValidator {
    fn default() -> Self {
        Self::new()
    }
}
