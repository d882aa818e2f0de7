//! Bundle indexing
//!
//! A bundle is either a directory or a zip archive with the same layout:
//!
//! ```text
//! addon.bundle/
//!   acme/addon/AddonModule.unit     code units, anywhere outside resources/
//!   resources/config.toml           auxiliary resources
//! ```
//!
//! The index lists unit names and resource entries up front and reads contents on
//! demand. For archives it holds the open file until dropped.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::module::loader::unit::{unit_name_from_path, UNIT_SUFFIX};
use crate::module::traits::ModuleError;

/// Directory inside a bundle holding auxiliary resources
pub const RESOURCES_DIR: &str = "resources/";

enum BundleSource {
    Directory(PathBuf),
    Archive(ZipArchive<fs::File>),
}

/// Index of one opened bundle
pub struct BundleIndex {
    path: PathBuf,
    source: BundleSource,
    /// unit name -> entry name
    units: BTreeMap<String, String>,
    /// resource entry names (with the `resources/` prefix)
    resources: Vec<String>,
}

impl BundleIndex {
    /// Open and index a bundle (directory or zip file)
    pub fn open(path: &Path) -> Result<Self, ModuleError> {
        let (source, entries) = if path.is_dir() {
            let mut entries = Vec::new();
            collect_directory_entries(path, path, &mut entries)?;
            (BundleSource::Directory(path.to_path_buf()), entries)
        } else {
            let file = fs::File::open(path)?;
            let archive = ZipArchive::new(file).map_err(|e| ModuleError::InvalidBundle {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let entries = archive
                .file_names()
                .filter(|name| !name.ends_with('/'))
                .map(str::to_string)
                .collect();
            (BundleSource::Archive(archive), entries)
        };

        let mut units = BTreeMap::new();
        let mut resources = Vec::new();
        for entry in entries {
            if entry.starts_with(RESOURCES_DIR) {
                resources.push(entry);
            } else if entry.ends_with(UNIT_SUFFIX) {
                match unit_name_from_path(&entry) {
                    Some(name) => {
                        units.insert(name, entry);
                    }
                    None => debug!("Ignoring unit entry with unusable name: {}", entry),
                }
            }
        }
        resources.sort();

        debug!(
            "Indexed bundle {:?}: {} units, {} resources",
            path,
            units.len(),
            resources.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            source,
            units,
            resources,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unit names in sorted order
    pub fn unit_names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn contains_unit(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Resource entry names, including the `resources/` prefix
    pub fn resource_names(&self) -> &[String] {
        &self.resources
    }

    pub fn contains_resource(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r == name)
    }

    /// Read a unit's source text
    pub fn read_unit(&mut self, name: &str) -> Result<Option<String>, ModuleError> {
        let Some(entry) = self.units.get(name).cloned() else {
            return Ok(None);
        };
        let bytes = self.read_entry(&entry)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ModuleError::InvalidUnit {
                unit: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Read a resource entry
    pub fn read_resource(&mut self, name: &str) -> Result<Option<Vec<u8>>, ModuleError> {
        if !self.contains_resource(name) {
            return Ok(None);
        }
        self.read_entry(name).map(Some)
    }

    fn read_entry(&mut self, entry: &str) -> Result<Vec<u8>, ModuleError> {
        match &mut self.source {
            BundleSource::Directory(root) => Ok(fs::read(root.join(entry))?),
            BundleSource::Archive(archive) => {
                let mut file = archive.by_name(entry)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

impl std::fmt::Debug for BundleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleIndex")
            .field("path", &self.path)
            .field("units", &self.units.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

fn collect_directory_entries(
    root: &Path,
    dir: &Path,
    out: &mut Vec<String>,
) -> Result<(), ModuleError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_directory_entries(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(name.join("/"));
            }
        }
    }
    Ok(())
}
