//! File system access control for modules
//!
//! Ensures module file access and resource extraction stay within a module's data
//! directory. Checks are lexical so they also work for paths that do not exist yet.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::module::traits::ModuleError;

/// File system sandbox that restricts paths to one root directory
#[derive(Debug, Clone)]
pub struct FileSystemSandbox {
    /// Allowed root (every resolved path is under this)
    allowed_path: PathBuf,
}

impl FileSystemSandbox {
    /// Create a new file system sandbox
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            allowed_path: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a relative path (or archive entry name) under the sandbox root
    ///
    /// Backslashes are treated as separators. `..` components are folded lexically;
    /// anything that would leave the root, or an absolute path, is rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ModuleError> {
        let normalized = normalize_relative(relative).ok_or_else(|| {
            warn!(
                "Rejected path {:?}: resolves outside sandbox {:?}",
                relative, self.allowed_path
            );
            ModuleError::PathTraversal(PathBuf::from(relative))
        })?;

        let joined = self.allowed_path.join(&normalized);
        if !joined.starts_with(&self.allowed_path) {
            return Err(ModuleError::PathTraversal(joined));
        }

        debug!("Path {:?} resolved to {:?}", relative, joined);
        Ok(joined)
    }

    /// Get the allowed root directory
    pub fn allowed_path(&self) -> &Path {
        &self.allowed_path
    }

    /// Check if a path is within the sandbox
    ///
    /// Uses the canonical path when the target exists (follows symlinks), the lexical
    /// form otherwise.
    pub fn is_within_sandbox<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();

        let Some(lexical) = normalize_absolute(path) else {
            return false;
        };
        if !lexical.starts_with(&self.allowed_path) {
            return false;
        }

        match (path.canonicalize(), self.allowed_path.canonicalize()) {
            (Ok(canonical), Ok(root)) => canonical.starts_with(root),
            _ => true,
        }
    }
}

/// Lexically normalize a relative path, returning `None` if it escapes its base
pub(crate) fn normalize_relative(relative: &str) -> Option<PathBuf> {
    let unified = relative.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

fn normalize_absolute(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Directory-scoped file access handed to a module
#[derive(Debug, Clone)]
pub struct ModuleFiles {
    sandbox: FileSystemSandbox,
}

impl ModuleFiles {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            sandbox: FileSystemSandbox::new(data_dir),
        }
    }

    /// The module's private data directory (may not exist until first write)
    pub fn data_dir(&self) -> &Path {
        self.sandbox.allowed_path()
    }

    /// Resolve a path inside the data directory
    pub fn path(&self, relative: &str) -> Result<PathBuf, ModuleError> {
        self.sandbox.resolve(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.sandbox
            .resolve(relative)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    pub fn read(&self, relative: &str) -> Result<Vec<u8>, ModuleError> {
        let path = self.sandbox.resolve(relative)?;
        Ok(fs::read(path)?)
    }

    pub fn read_to_string(&self, relative: &str) -> Result<String, ModuleError> {
        let path = self.sandbox.resolve(relative)?;
        Ok(fs::read_to_string(path)?)
    }

    /// Write a file, creating parent directories as needed
    pub fn write(&self, relative: &str, contents: &[u8]) -> Result<(), ModuleError> {
        let path = self.sandbox.resolve(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(contents)?;
        Ok(())
    }
}
