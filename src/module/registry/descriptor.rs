//! Module descriptors
//!
//! A descriptor is the immutable identity of a module: built from the `[module]`
//! metadata table of a code unit, or synthesized when the unit carries none.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::module::sandbox::filesystem::normalize_relative;
use crate::module::traits::ModuleError;

/// Default priority for modules that declare none
pub const NORMAL_PRIORITY: i32 = 0;

/// Declarative metadata attached to a code unit (`[module]` table)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorMetadata {
    /// Module id (required, unique)
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub description: Option<String>,
    /// Ids of modules that must be enabled first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Higher = earlier
    pub priority: Option<i32>,
    #[serde(alias = "platform_tag")]
    pub platform: Option<String>,
    /// Data folder override
    #[serde(alias = "folder_name")]
    pub folder: Option<String>,
}

/// Module descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// False when no metadata was present and defaults were synthesized
    pub found: bool,
    pub id: String,
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    pub description: String,
    pub dependencies: Vec<String>,
    pub priority: i32,
    pub platform_tag: String,
    pub data_folder_name: String,
}

impl Descriptor {
    /// Build a descriptor from unit metadata
    pub fn from_metadata(metadata: &DescriptorMetadata) -> Result<Self, ModuleError> {
        let id = metadata.id.trim();
        if id.is_empty() {
            return Err(ModuleError::InvalidUnit {
                unit: String::new(),
                reason: "module id cannot be empty".to_string(),
            });
        }

        Ok(Self {
            found: true,
            id: id.to_string(),
            name: metadata
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| id.to_string()),
            version: metadata.version.clone().unwrap_or_default(),
            authors: metadata.authors.clone(),
            description: metadata.description.clone().unwrap_or_default(),
            dependencies: metadata.dependencies.clone(),
            priority: metadata.priority.unwrap_or(NORMAL_PRIORITY),
            platform_tag: metadata.platform.clone().unwrap_or_default(),
            data_folder_name: data_folder_for(id, metadata.folder.as_deref()),
        })
    }

    /// Synthesize a descriptor for a unit without metadata
    ///
    /// The simple unit name (last dotted segment) becomes id and name.
    pub fn synthetic(unit_name: &str) -> Self {
        let simple = unit_name.rsplit('.').next().unwrap_or(unit_name).to_string();
        Self {
            found: false,
            id: simple.clone(),
            name: simple.clone(),
            version: String::new(),
            authors: Vec::new(),
            description: String::new(),
            dependencies: Vec::new(),
            priority: NORMAL_PRIORITY,
            platform_tag: String::new(),
            data_folder_name: simple,
        }
    }

    /// Declared dependency ids, blanks removed
    pub fn declared_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
    }

    /// The module's private data directory under `data_root`
    pub fn data_dir(&self, data_root: &Path) -> std::path::PathBuf {
        data_root.join(&self.data_folder_name)
    }
}

/// A folder override must be one plain, non-hidden path component; anything else falls back
/// to the id. Dot names are reserved for the host (the staging area lives under `.staging`).
fn data_folder_for(id: &str, folder: Option<&str>) -> String {
    let Some(folder) = folder.map(str::trim).filter(|f| !f.is_empty()) else {
        return id.to_string();
    };

    match normalize_relative(folder) {
        Some(path)
            if path.components().count() == 1
                && path.as_os_str() == folder
                && !folder.starts_with('.') =>
        {
            folder.to_string()
        }
        _ => {
            warn!(
                "Module {} declares data folder {:?} which is not a plain folder name, using {:?}",
                id, folder, id
            );
            id.to_string()
        }
    }
}
