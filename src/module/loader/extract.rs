//! Resource extraction
//!
//! Bundle resources (config templates) are extracted in two steps: staged into a private
//! directory during discovery, then committed into the module's data directory once the
//! module has been admitted to the registry. A module rejected in between (duplicate id,
//! shutdown) has its staging directory removed and never touches the data directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::module::loader::bundle::RESOURCES_DIR;
use crate::module::sandbox::FileSystemSandbox;
use crate::module::traits::ModuleError;

/// Name of the staging area under the data root
pub const STAGING_DIR: &str = ".staging";

/// Decides which bundle resources are extracted and stages them
#[derive(Debug, Clone)]
pub struct ResourceExtractor {
    extensions: Vec<String>,
}

impl ResourceExtractor {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether a bundle entry is an extractable resource
    pub fn qualifies(&self, entry: &str) -> bool {
        let Some(relative) = entry.strip_prefix(RESOURCES_DIR) else {
            return false;
        };
        let Some((_, extension)) = relative.rsplit_once('.') else {
            return false;
        };
        let extension = extension.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == extension)
    }

    /// Write entries into a fresh staging directory under `staging_root`
    ///
    /// Entry names keep their `resources/` prefix. Names that normalize to a path outside
    /// the staging directory are skipped with a warning; the rest are still staged.
    pub fn stage<I>(&self, entries: I, staging_root: &Path) -> Result<StagedResources, ModuleError>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let staging_dir = staging_root.join(Uuid::new_v4().to_string());
        let sandbox = FileSystemSandbox::new(&staging_dir);
        let mut staged = StagedResources {
            staging_dir: Some(staging_dir),
            files: Vec::new(),
        };

        for (name, bytes) in entries {
            if !self.qualifies(&name) {
                continue;
            }
            let relative = &name[RESOURCES_DIR.len()..];

            let target = match sandbox.resolve(relative) {
                Ok(target) => target,
                Err(_) => {
                    warn!(
                        "Security: resource entry {:?} escapes the module data directory, skipping",
                        name
                    );
                    continue;
                }
            };

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &bytes)?;

            let relative = target
                .strip_prefix(sandbox.allowed_path())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|_| PathBuf::from(relative));
            staged.files.push(relative);
        }

        Ok(staged)
    }
}

/// Resources staged for one module
#[derive(Debug)]
pub struct StagedResources {
    /// `None` once committed or discarded
    staging_dir: Option<PathBuf>,
    files: Vec<PathBuf>,
}

/// What a commit did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub written: Vec<PathBuf>,
    /// Files left untouched because they already existed
    pub kept: Vec<PathBuf>,
}

impl StagedResources {
    /// Nothing staged
    pub fn empty() -> Self {
        Self {
            staging_dir: None,
            files: Vec::new(),
        }
    }

    /// Staged paths, relative to the module data directory
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    /// Move staged files into `dest_dir`; existing files are never overwritten
    pub fn commit(mut self, dest_dir: &Path) -> Result<CommitReport, ModuleError> {
        let mut report = CommitReport::default();
        let Some(staging_dir) = self.staging_dir.take() else {
            return Ok(report);
        };

        let sandbox = FileSystemSandbox::new(dest_dir);
        let result = (|| -> Result<(), ModuleError> {
            for relative in &self.files {
                let Some(relative_str) = relative.to_str() else {
                    continue;
                };
                let target = match sandbox.resolve(relative_str) {
                    Ok(target) => target,
                    Err(_) => {
                        warn!("Security: refusing to commit {:?} outside {:?}", relative, dest_dir);
                        continue;
                    }
                };

                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }

                // create_new makes the existence check and the create one step
                let mut out = match OpenOptions::new().write(true).create_new(true).open(&target) {
                    Ok(file) => file,
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        debug!("Keeping existing file {:?}", target);
                        report.kept.push(relative.clone());
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let bytes = fs::read(staging_dir.join(relative))?;
                out.write_all(&bytes)?;
                report.written.push(relative.clone());
            }
            Ok(())
        })();

        remove_staging_dir(&staging_dir);
        result.map(|_| report)
    }

    /// Throw the staged files away
    pub fn discard(mut self) {
        if let Some(staging_dir) = self.staging_dir.take() {
            remove_staging_dir(&staging_dir);
        }
    }
}

impl Drop for StagedResources {
    fn drop(&mut self) {
        if let Some(staging_dir) = self.staging_dir.take() {
            remove_staging_dir(&staging_dir);
        }
    }
}

fn remove_staging_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging directory {:?}: {}", dir, e),
    }
}
