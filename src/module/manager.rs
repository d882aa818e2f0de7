//! Module manager for orchestrating all modules
//!
//! Owns the registry of loaded modules and drives every lifecycle transition: discovery,
//! dependency-ordered enable, reverse-order disable, unload and shutdown. It is the only
//! writer of module records.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ModuleHostConfig;
use crate::module::lifecycle::{AuthoritativeContext, LifecycleJob, SerialContext};
use crate::module::loader::context::LoadingContext;
use crate::module::loader::extract::STAGING_DIR;
use crate::module::loader::host::HostScope;
use crate::module::loader::scanner::{BundleResult, BundleScanner, DiscoveredModule};
use crate::module::registry::record::InstanceHandle;
use crate::module::registry::{Descriptor, DependencyResolver, ModuleRecord, ModuleSnapshot};
use crate::module::traits::{HostHandle, LifecycleStatus, ModuleError, ModuleState};
use crate::module::validation::ExtensionContract;

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Newly registered module ids, in registration order
    pub loaded: Vec<String>,
    /// Ids rejected because a module with the same id was registered first
    pub duplicates: Vec<String>,
    /// Bundle candidates scanned in this pass
    pub bundles_scanned: usize,
}

/// Registry state guarded by the manager's mutex
#[derive(Default)]
struct Registry {
    records: HashMap<String, ModuleRecord>,
    /// Registration order
    order: Vec<String>,
    /// Ids in the order they were enabled
    activation: Vec<String>,
    /// Bundles whose every module lost a duplicate contest, with the ids they offered
    rejected_bundles: HashMap<PathBuf, Vec<String>>,
}

/// Module manager coordinates all loaded modules
pub struct ModuleManager {
    config: ModuleHostConfig,
    host: Arc<dyn HostHandle>,
    host_scope: Arc<HostScope>,
    contract: ExtensionContract,
    scanner: BundleScanner,
    lifecycle: Arc<dyn AuthoritativeContext>,
    registry: Mutex<Registry>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
}

impl ModuleManager {
    /// Create a new module manager
    ///
    /// Creates the bundles and data directories and purges staging leftovers from a
    /// previous run. Failing to create either directory is the one fatal error.
    pub fn new(config: ModuleHostConfig, host: Arc<dyn HostHandle>) -> Result<Self, ModuleError> {
        for dir in [&config.bundles_dir, &config.data_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                error!("CRITICAL: cannot create module host directory {:?}: {}", dir, e);
                return Err(ModuleError::Configuration(format!(
                    "cannot create directory {:?}: {}",
                    dir, e
                )));
            }
        }

        let staging = config.data_dir.join(STAGING_DIR);
        match std::fs::remove_dir_all(&staging) {
            Ok(()) => debug!("Purged stale staging directory {:?}", staging),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to purge staging directory {:?}: {}", staging, e),
        }

        let lifecycle = SerialContext::new().map_err(|e| {
            error!("CRITICAL: cannot start the lifecycle thread: {}", e);
            ModuleError::Configuration(format!("cannot start lifecycle thread: {}", e))
        })?;

        let host_scope = Arc::new(HostScope::new(host.name()));
        let contract = ExtensionContract::default();
        let scanner = BundleScanner::new(
            &config,
            Arc::clone(&host_scope),
            contract.clone(),
            Arc::clone(&host),
        );

        Ok(Self {
            config,
            host,
            host_scope,
            contract,
            scanner,
            lifecycle: Arc::new(lifecycle),
            registry: Mutex::new(Registry::default()),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Use a host scope (host units, resources and entry points)
    pub fn with_host_scope(mut self, host_scope: HostScope) -> Self {
        self.host_scope = Arc::new(host_scope);
        self.rebuild_scanner();
        self
    }

    /// Use a different extension contract
    pub fn with_contract(mut self, contract: ExtensionContract) -> Self {
        self.contract = contract;
        self.rebuild_scanner();
        self
    }

    /// Run lifecycle hooks on the given context instead of the built-in thread
    pub fn with_lifecycle_context(mut self, lifecycle: Arc<dyn AuthoritativeContext>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    fn rebuild_scanner(&mut self) {
        self.scanner = BundleScanner::new(
            &self.config,
            Arc::clone(&self.host_scope),
            self.contract.clone(),
            Arc::clone(&self.host),
        );
    }

    pub fn config(&self) -> &ModuleHostConfig {
        &self.config
    }

    pub fn host_scope(&self) -> &Arc<HostScope> {
        &self.host_scope
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Discover, load and enable all modules
    ///
    /// Only the first call does anything. Discovery completes before any module is
    /// enabled.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            debug!("Module host already initialized");
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        info!("Initializing module host from {:?}", self.config.bundles_dir);
        let report = self.load_all().await;
        self.enable_all().await;

        let enabled = self.registry.lock().await.activation.len();
        info!(
            "Module host initialized: {} loaded, {} enabled, {} duplicates rejected",
            report.loaded.len(),
            enabled,
            report.duplicates.len()
        );
    }

    /// Scan for bundles not loaded yet and register their modules
    pub async fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();
        if self.is_shutting_down() {
            return report;
        }

        let candidates = match self.scanner.find_bundles(&self.config.bundles_dir) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Bundle discovery failed: {}", e);
                return report;
            }
        };
        let (known, rejected_before): (HashSet<PathBuf>, HashSet<PathBuf>) = {
            let registry = self.registry.lock().await;
            (
                registry
                    .records
                    .values()
                    .map(|r| r.bundle_path.clone())
                    .collect(),
                registry.rejected_bundles.keys().cloned().collect(),
            )
        };
        let candidates: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|path| {
                if known.contains(path) {
                    debug!("Bundle {:?} already loaded", path);
                    return false;
                }
                if rejected_before.contains(path) {
                    debug!("Bundle {:?} only offers ids that are taken, skipping", path);
                    return false;
                }
                true
            })
            .collect();
        report.bundles_scanned = candidates.len();

        let bundles = self.scanner.discover_bundles(candidates).await;

        let mut registry = self.registry.lock().await;
        if self.is_shutting_down() {
            info!("Shutdown in progress, discarding {} discovered bundles", bundles.len());
            drop(registry);
            self.discard_bundles(bundles).await;
            return report;
        }

        let mut admitted: Vec<(DiscoveredModule, Arc<LoadingContext>, PathBuf)> = Vec::new();
        let mut batch_ids: HashSet<String> = HashSet::new();
        let mut rejected: Vec<DiscoveredModule> = Vec::new();
        let mut orphaned: Vec<Arc<LoadingContext>> = Vec::new();

        for bundle in bundles {
            let BundleResult {
                bundle_path,
                context,
                modules,
            } = bundle;

            let mut kept = 0usize;
            let mut lost: Vec<String> = Vec::new();
            for module in modules {
                let id = module.descriptor.id.clone();
                if registry.records.contains_key(&id) || batch_ids.contains(&id) {
                    warn!(
                        "Duplicate module id {} in {:?}; the module registered first is kept",
                        id, bundle_path
                    );
                    report.duplicates.push(id.clone());
                    lost.push(id);
                    rejected.push(module);
                    continue;
                }
                batch_ids.insert(id);
                admitted.push((module, Arc::clone(&context), bundle_path.clone()));
                kept += 1;
            }

            if kept == 0 {
                if !lost.is_empty() {
                    registry.rejected_bundles.insert(bundle_path.clone(), lost);
                }
                orphaned.push(context);
            }
        }

        let descriptors: Vec<Descriptor> = admitted
            .iter()
            .map(|(module, _, _)| (*module.descriptor).clone())
            .collect();
        let resolution = DependencyResolver::resolve(&descriptors);
        for (dependent, dependency) in &resolution.missing {
            if !registry.records.contains_key(dependency) {
                debug!(
                    "Module {} depends on {}, which is not loaded",
                    dependent, dependency
                );
            }
        }

        let mut by_id: HashMap<String, (DiscoveredModule, Arc<LoadingContext>, PathBuf)> = admitted
            .into_iter()
            .map(|entry| (entry.0.descriptor.id.clone(), entry))
            .collect();

        for id in &resolution.load_order {
            let Some((module, context, bundle_path)) = by_id.remove(id) else {
                continue;
            };
            let DiscoveredModule {
                descriptor,
                instance,
                staged,
                ..
            } = module;

            let data_dir = descriptor.data_dir(&self.config.data_dir);
            match staged.commit(&data_dir) {
                Ok(commit) => {
                    if !commit.written.is_empty() {
                        debug!(
                            "Extracted {} resources for module {} into {:?}",
                            commit.written.len(),
                            id,
                            data_dir
                        );
                    }
                }
                Err(e) => warn!("Failed to extract resources for module {}: {}", id, e),
            }

            info!("Loaded module {} from {:?}", id, bundle_path);
            registry
                .records
                .insert(id.clone(), ModuleRecord::new(instance, descriptor, bundle_path, context));
            registry.order.push(id.clone());
            report.loaded.push(id.clone());
        }

        for context in orphaned {
            if !registry
                .records
                .values()
                .any(|r| Arc::ptr_eq(&r.context, &context))
            {
                context.close();
            }
        }

        if self.config.share_bundle_exports {
            wire_fallbacks(&registry);
        }
        drop(registry);

        for module in rejected {
            self.discard_module(module).await;
        }

        report
    }

    /// Enable every loaded or disabled module in dependency order
    ///
    /// Modules in the error state are skipped.
    pub async fn enable_all(&self) {
        if self.is_shutting_down() {
            return;
        }
        let mut registry = self.registry.lock().await;

        let descriptors: Vec<Descriptor> = registry
            .order
            .iter()
            .filter_map(|id| registry.records.get(id))
            .map(|r| (*r.descriptor).clone())
            .collect();
        let resolution = DependencyResolver::resolve(&descriptors);

        for id in &resolution.load_order {
            let eligible = registry
                .records
                .get(id)
                .map_or(false, |r| matches!(r.state, ModuleState::Loaded | ModuleState::Disabled));
            if eligible {
                // Failures are recorded on the module itself
                let _ = self.enable_locked(&mut registry, id).await;
            }
        }
    }

    /// Disable every enabled module, most recently enabled first
    pub async fn disable_all(&self) {
        let mut registry = self.registry.lock().await;
        self.disable_all_locked(&mut registry).await;
    }

    /// Disable and remove every module
    pub async fn unload_all(&self) {
        let mut registry = self.registry.lock().await;
        self.unload_all_locked(&mut registry).await;
    }

    /// Pick up new bundles and enable what can be enabled
    pub async fn reload(&self) -> LoadReport {
        let report = self.load_all().await;
        self.enable_all().await;
        report
    }

    /// Disable and unload everything and stop discovery
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("Module host already shutting down");
            return;
        }
        info!("Shutting down module host");

        self.scanner.release();
        let mut registry = self.registry.lock().await;
        self.disable_all_locked(&mut registry).await;
        self.unload_all_locked(&mut registry).await;

        info!("Module host shut down");
    }

    /// Enable one module
    ///
    /// Returns the resulting state. A module whose dependencies are not enabled keeps its
    /// state; a module in the error state is retried.
    pub async fn enable_module(&self, id: &str) -> Result<ModuleState, ModuleError> {
        if self.is_shutting_down() {
            return Err(ModuleError::ShuttingDown);
        }
        let mut registry = self.registry.lock().await;
        self.enable_locked(&mut registry, id).await
    }

    /// Disable one module, returning the resulting state
    pub async fn disable_module(&self, id: &str) -> Result<ModuleState, ModuleError> {
        let mut registry = self.registry.lock().await;
        self.disable_locked(&mut registry, id).await
    }

    /// Disable (if enabled) and remove one module
    pub async fn unload_module(&self, id: &str) -> Result<(), ModuleError> {
        let mut registry = self.registry.lock().await;
        self.unload_locked(&mut registry, id).await
    }

    /// Loaded module ids in registration order
    pub async fn list_modules(&self) -> Vec<String> {
        self.registry.lock().await.order.clone()
    }

    /// Get module state
    pub async fn get_module_state(&self, id: &str) -> Option<ModuleState> {
        let registry = self.registry.lock().await;
        registry.records.get(id).map(|r| r.state.clone())
    }

    pub async fn module(&self, id: &str) -> Option<ModuleSnapshot> {
        let registry = self.registry.lock().await;
        registry.records.get(id).map(ModuleRecord::snapshot)
    }

    /// Snapshots of every module in registration order
    pub async fn modules(&self) -> Vec<ModuleSnapshot> {
        let registry = self.registry.lock().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.records.get(id))
            .map(ModuleRecord::snapshot)
            .collect()
    }

    /// The loading context a module was loaded in
    pub async fn loading_context(&self, id: &str) -> Option<Arc<LoadingContext>> {
        let registry = self.registry.lock().await;
        registry.records.get(id).map(|r| Arc::clone(&r.context))
    }

    /// Currently enabled ids, in the order they were enabled
    pub async fn activation_order(&self) -> Vec<String> {
        self.registry.lock().await.activation.clone()
    }

    async fn enable_locked(&self, registry: &mut Registry, id: &str) -> Result<ModuleState, ModuleError> {
        let record = registry
            .records
            .get(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        if record.state == ModuleState::Enabled {
            return Ok(ModuleState::Enabled);
        }

        let unmet: Vec<&str> = record
            .descriptor
            .declared_dependencies()
            .filter(|dep| {
                registry
                    .records
                    .get(*dep)
                    .map_or(true, |r| r.state != ModuleState::Enabled)
            })
            .collect();
        if !unmet.is_empty() {
            warn!(
                "Not enabling module {}: dependencies not enabled: {}",
                id,
                unmet.join(", ")
            );
            return Ok(record.state.clone());
        }

        let instance = record
            .instance
            .clone()
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        let result = self
            .lifecycle
            .run(status_job(instance, LifecycleStatus::Enabled))
            .await;

        let record = registry
            .records
            .get_mut(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        match result {
            Ok(()) => {
                record.state = ModuleState::Enabled;
                registry.activation.push(id.to_string());
                info!("Module {} enabled", id);
                Ok(ModuleState::Enabled)
            }
            Err(e) => {
                error!("Module {} failed to enable: {}", id, e);
                record.state = ModuleState::Error(e.to_string());
                Ok(record.state.clone())
            }
        }
    }

    async fn disable_locked(&self, registry: &mut Registry, id: &str) -> Result<ModuleState, ModuleError> {
        let record = registry
            .records
            .get(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        if record.state != ModuleState::Enabled {
            return Ok(record.state.clone());
        }

        let instance = record
            .instance
            .clone()
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        let result = self
            .lifecycle
            .run(status_job(instance, LifecycleStatus::Disabled))
            .await;

        registry.activation.retain(|enabled| enabled != id);
        let record = registry
            .records
            .get_mut(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        match result {
            Ok(()) => {
                record.state = ModuleState::Disabled;
                info!("Module {} disabled", id);
            }
            Err(e) => {
                error!("Module {} failed to disable: {}", id, e);
                record.state = ModuleState::Error(e.to_string());
            }
        }
        Ok(record.state.clone())
    }

    async fn disable_all_locked(&self, registry: &mut Registry) {
        let enabled: Vec<String> = registry.activation.iter().rev().cloned().collect();
        for id in enabled {
            if let Err(e) = self.disable_locked(registry, &id).await {
                warn!("Error disabling module {}: {}", id, e);
            }
        }
    }

    async fn unload_locked(&self, registry: &mut Registry, id: &str) -> Result<(), ModuleError> {
        let state = registry
            .records
            .get(id)
            .map(|r| r.state.clone())
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        if state == ModuleState::Enabled {
            if let Err(e) = self.disable_locked(registry, id).await {
                warn!("Error disabling module {} before unload: {}", id, e);
            }
        }

        let mut record = registry
            .records
            .remove(id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        registry.order.retain(|loaded| loaded != id);
        registry.activation.retain(|enabled| enabled != id);
        // The id is free again, so bundles that lost it get another chance
        registry
            .rejected_bundles
            .retain(|_, ids| !ids.iter().any(|lost| lost == id));

        if let Some(instance) = record.instance.take() {
            if let Err(e) = self.lifecycle.run(drop_job(instance)).await {
                warn!("Error dropping module {}: {}", id, e);
            }
        }

        let shared = registry
            .records
            .values()
            .any(|r| Arc::ptr_eq(&r.context, &record.context));
        if !shared {
            let context_id = record.context.id();
            for other in registry.records.values() {
                other.context.remove_fallback(context_id);
            }
            record.context.close();
            debug!("Released loading context for {:?}", record.bundle_path);
        }

        info!("Module {} unloaded", id);
        Ok(())
    }

    async fn unload_all_locked(&self, registry: &mut Registry) {
        let loaded: Vec<String> = registry.order.iter().rev().cloned().collect();
        for id in loaded {
            if let Err(e) = self.unload_locked(registry, &id).await {
                warn!("Error unloading module {}: {}", id, e);
            }
        }
    }

    /// Drop a module that never made it into the registry
    async fn discard_module(&self, module: DiscoveredModule) {
        let DiscoveredModule {
            descriptor,
            instance,
            staged,
            ..
        } = module;
        staged.discard();

        let job: LifecycleJob = Box::new(move || {
            drop(instance);
            Ok(())
        });
        if let Err(e) = self.lifecycle.run(job).await {
            warn!("Error dropping rejected module {}: {}", descriptor.id, e);
        }
    }

    async fn discard_bundles(&self, bundles: Vec<BundleResult>) {
        for bundle in bundles {
            for module in bundle.modules {
                self.discard_module(module).await;
            }
            bundle.context.close();
        }
    }
}

/// Hook invocation for one status change
fn status_job(instance: InstanceHandle, status: LifecycleStatus) -> LifecycleJob {
    Box::new(move || {
        let mut module = instance.lock().unwrap_or_else(PoisonError::into_inner);
        module.on_lifecycle_status_changed(status)
    })
}

/// Drops the last registry reference to an instance
fn drop_job(instance: InstanceHandle) -> LifecycleJob {
    Box::new(move || {
        drop(instance);
        Ok(())
    })
}

/// Let every live context see every other live context's bundle units
fn wire_fallbacks(registry: &Registry) {
    let mut contexts: Vec<Arc<LoadingContext>> = Vec::new();
    for id in &registry.order {
        if let Some(record) = registry.records.get(id) {
            let seen = contexts.iter().any(|c| Arc::ptr_eq(c, &record.context));
            if !seen && !record.context.is_closed() {
                contexts.push(Arc::clone(&record.context));
            }
        }
    }

    for context in &contexts {
        for peer in &contexts {
            if !Arc::ptr_eq(context, peer) {
                context.add_fallback(Arc::clone(peer));
            }
        }
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("bundles_dir", &self.config.bundles_dir)
            .field("data_dir", &self.config.data_dir)
            .field("initialized", &self.is_initialized())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
