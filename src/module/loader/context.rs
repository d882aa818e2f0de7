//! Isolated loading contexts
//!
//! Each bundle gets one `LoadingContext`, which owns how names used by that bundle are
//! resolved. The delegation chain keeps host-owned units shared by every bundle
//! (one identity per host unit) while still letting a bundle supply its own units and
//! see its peers' units through fallback scopes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::module::loader::bundle::BundleIndex;
use crate::module::loader::unit::{CodeUnit, UnitOrigin};

/// Resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("code unit not found: {0}")]
    NotFound(String),

    /// The unit exists but cannot be linked (malformed definition, broken host type)
    #[error("linkage error resolving {name}: {reason}")]
    Linkage { name: String, reason: String },

    #[error("loading context closed while resolving {0}")]
    Closed(String),
}

/// Something that can hand out code units and resources by name
pub trait ResolutionScope: Send + Sync {
    /// Human-readable scope name for diagnostics
    fn scope_name(&self) -> String;

    /// Resolve a unit
    fn find_unit(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError>;

    /// Whether the scope has the unit, without committing to resolve it
    fn has_unit(&self, name: &str) -> bool;

    /// Look up a resource
    fn find_resource(&self, name: &str) -> Option<Vec<u8>>;
}

/// Per-bundle resolution domain
pub struct LoadingContext {
    id: Uuid,
    bundle_path: PathBuf,
    parent_first: Vec<String>,
    parent: Arc<dyn ResolutionScope>,
    fallbacks: RwLock<Vec<Arc<LoadingContext>>>,
    index: Mutex<Option<BundleIndex>>,
    /// Full-chain resolutions
    cache: Mutex<HashMap<String, Arc<CodeUnit>>>,
    /// Units defined by this bundle, shared with peers through fallbacks
    local: Mutex<HashMap<String, Arc<CodeUnit>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoadingContext {
    /// Create a context over an indexed bundle
    pub fn new(
        index: BundleIndex,
        parent: Arc<dyn ResolutionScope>,
        parent_first: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bundle_path: index.path().to_path_buf(),
            parent_first,
            parent,
            fallbacks: RwLock::new(Vec::new()),
            index: Mutex::new(Some(index)),
            cache: Mutex::new(HashMap::new()),
            local: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unit names defined by this bundle (empty once closed)
    pub fn unit_names(&self) -> Vec<String> {
        lock(&self.index)
            .as_ref()
            .map(|index| index.unit_names())
            .unwrap_or_default()
    }

    /// Resource entry names in this bundle (empty once closed)
    pub fn resource_names(&self) -> Vec<String> {
        lock(&self.index)
            .as_ref()
            .map(|index| index.resource_names().to_vec())
            .unwrap_or_default()
    }

    /// Append a fallback scope; consulted in registration order
    pub fn add_fallback(&self, peer: Arc<LoadingContext>) {
        if peer.id == self.id || self.is_closed() {
            return;
        }
        let mut fallbacks = self.fallbacks.write().unwrap_or_else(PoisonError::into_inner);
        if fallbacks.iter().any(|f| f.id == peer.id) {
            return;
        }
        debug!(
            "Context {:?} now falls back to {:?}",
            self.bundle_path, peer.bundle_path
        );
        fallbacks.push(peer);
    }

    /// Remove a fallback scope and forget anything resolved through it
    pub fn remove_fallback(&self, peer_id: Uuid) {
        let mut fallbacks = self.fallbacks.write().unwrap_or_else(PoisonError::into_inner);
        let before = fallbacks.len();
        fallbacks.retain(|f| f.id != peer_id);
        if fallbacks.len() != before {
            lock(&self.cache).retain(|_, unit| match &unit.origin {
                UnitOrigin::Bundle { context, .. } => *context != peer_id,
                UnitOrigin::Host => true,
            });
        }
    }

    pub fn fallback_ids(&self) -> Vec<Uuid> {
        self.fallbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| f.id)
            .collect()
    }

    /// Resolve a unit through the full delegation chain
    ///
    /// 1. parent-first prefixes go to the parent; linkage errors there are final
    /// 2. parent, if it reports having the unit
    /// 3. fallback scopes in registration order
    /// 4. this bundle's own index
    /// 5. parent again, unconditionally
    ///
    /// A parent-first name the host does not have falls through to the later steps on
    /// purpose, so a bundle may supply a unit under a host prefix the host leaves empty.
    pub fn resolve(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError> {
        if self.is_closed() {
            return Err(ResolveError::Closed(name.to_string()));
        }

        if let Some(unit) = lock(&self.cache).get(name) {
            return Ok(Arc::clone(unit));
        }

        let unit = self.resolve_uncached(name)?;

        // close() may have raced with us; a closed context never hands out units
        if self.is_closed() {
            return Err(ResolveError::Closed(name.to_string()));
        }
        lock(&self.cache).insert(name.to_string(), Arc::clone(&unit));
        Ok(unit)
    }

    fn resolve_uncached(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError> {
        if self.is_parent_first(name) {
            match self.parent.find_unit(name) {
                Ok(unit) => return Ok(unit),
                Err(e @ ResolveError::Linkage { .. }) => return Err(e),
                Err(_) => {}
            }
        }

        if self.parent.has_unit(name) {
            if let Ok(unit) = self.parent.find_unit(name) {
                return Ok(unit);
            }
        }

        for peer in self.fallback_snapshot() {
            if let Ok(unit) = peer.find_unit(name) {
                return Ok(unit);
            }
        }

        match self.find_local(name) {
            Err(ResolveError::NotFound(_)) => {}
            other => return other,
        }

        match self.parent.find_unit(name) {
            Ok(unit) => Ok(unit),
            Err(e @ ResolveError::Linkage { .. }) => Err(e),
            Err(_) => Err(ResolveError::NotFound(name.to_string())),
        }
    }

    /// Look up a resource: parent, then fallbacks, then this bundle
    pub fn resource(&self, name: &str) -> Option<Vec<u8>> {
        if self.is_closed() {
            return None;
        }

        if let Some(bytes) = self.parent.find_resource(name) {
            return Some(bytes);
        }

        for peer in self.fallback_snapshot() {
            if let Some(bytes) = peer.local_resource(name) {
                return Some(bytes);
            }
        }

        self.local_resource(name)
    }

    /// Resolve a unit from this bundle's own index only
    pub fn find_local(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError> {
        if let Some(unit) = lock(&self.local).get(name) {
            return Ok(Arc::clone(unit));
        }

        let mut guard = lock(&self.index);
        let index = guard
            .as_mut()
            .ok_or_else(|| ResolveError::Closed(name.to_string()))?;

        let source = match index.read_unit(name) {
            Ok(Some(source)) => source,
            Ok(None) => return Err(ResolveError::NotFound(name.to_string())),
            Err(e) => {
                return Err(ResolveError::Linkage {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let origin = UnitOrigin::Bundle {
            context: self.id,
            path: self.bundle_path.clone(),
        };
        let unit = CodeUnit::parse(name, &source, origin)
            .map(Arc::new)
            .map_err(|e| ResolveError::Linkage {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        drop(guard);

        let mut local = lock(&self.local);
        let unit = local.entry(name.to_string()).or_insert(unit);
        Ok(Arc::clone(unit))
    }

    /// Read a resource from this bundle's own index only
    pub fn local_resource(&self, name: &str) -> Option<Vec<u8>> {
        let mut guard = lock(&self.index);
        let index = guard.as_mut()?;
        match index.read_resource(name) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "Failed to read resource {} from {:?}: {}",
                    name, self.bundle_path, e
                );
                None
            }
        }
    }

    /// Release the bundle handle, cache and fallbacks
    ///
    /// Safe to call any number of times; only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Drop the archive handle (if any) before anything else
        let index = lock(&self.index).take();
        drop(index);
        lock(&self.cache).clear();
        lock(&self.local).clear();
        self.fallbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        debug!("Closed loading context for {:?}", self.bundle_path);
    }

    fn is_parent_first(&self, name: &str) -> bool {
        self.parent_first
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }

    fn fallback_snapshot(&self) -> Vec<Arc<LoadingContext>> {
        self.fallbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// As a fallback scope, a context exposes only its own bundle's surface
impl ResolutionScope for LoadingContext {
    fn scope_name(&self) -> String {
        self.bundle_path.display().to_string()
    }

    fn find_unit(&self, name: &str) -> Result<Arc<CodeUnit>, ResolveError> {
        if self.is_closed() {
            return Err(ResolveError::Closed(name.to_string()));
        }
        self.find_local(name)
    }

    fn has_unit(&self, name: &str) -> bool {
        lock(&self.index)
            .as_ref()
            .map(|index| index.contains_unit(name))
            .unwrap_or(false)
    }

    fn find_resource(&self, name: &str) -> Option<Vec<u8>> {
        self.local_resource(name)
    }
}

impl std::fmt::Debug for LoadingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingContext")
            .field("id", &self.id)
            .field("bundle_path", &self.bundle_path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for LoadingContext {
    fn drop(&mut self) {
        self.close();
    }
}
