//! Bundle discovery
//!
//! Enumerates `*.bundle` entries in the bundles directory, scans each on the scan pool,
//! and turns every qualifying code unit into a module instance bound to its bundle's
//! loading context. Failures are contained per unit and per bundle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ModuleHostConfig;
use crate::module::lifecycle::panic_message;
use crate::module::loader::bundle::BundleIndex;
use crate::module::loader::context::{LoadingContext, ResolutionScope};
use crate::module::loader::extract::{ResourceExtractor, StagedResources, STAGING_DIR};
use crate::module::loader::host::HostScope;
use crate::module::loader::pool::ScanPool;
use crate::module::registry::descriptor::Descriptor;
use crate::module::sandbox::ModuleFiles;
use crate::module::traits::{ExtensionModule, HostHandle, ModuleContext, ModuleError};
use crate::module::validation::{
    DescriptorValidator, ExtensionContract, UnitValidation, ValidationResult,
};

/// A module instantiated during discovery, not yet registered
pub struct DiscoveredModule {
    pub descriptor: Arc<Descriptor>,
    pub instance: Box<dyn ExtensionModule>,
    /// Code unit the module was built from
    pub unit_name: String,
    /// Resources waiting to be committed into the module's data directory
    pub staged: StagedResources,
}

impl std::fmt::Debug for DiscoveredModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredModule")
            .field("id", &self.descriptor.id)
            .field("unit_name", &self.unit_name)
            .field("staged", &self.staged.files().len())
            .finish()
    }
}

/// Everything one bundle contributed
#[derive(Debug)]
pub struct BundleResult {
    pub bundle_path: PathBuf,
    pub context: Arc<LoadingContext>,
    pub modules: Vec<DiscoveredModule>,
}

/// Shared, read-only inputs of every scan job
struct ScanSettings {
    host_scope: Arc<HostScope>,
    contract: ExtensionContract,
    host: Arc<dyn HostHandle>,
    parent_first: Vec<String>,
    extractor: ResourceExtractor,
    validator: DescriptorValidator,
    data_dir: PathBuf,
}

/// Bundle scanner
pub struct BundleScanner {
    settings: Arc<ScanSettings>,
    bundle_extension: String,
    pool: ScanPool,
}

impl BundleScanner {
    /// Create a scanner
    pub fn new(
        config: &ModuleHostConfig,
        host_scope: Arc<HostScope>,
        contract: ExtensionContract,
        host: Arc<dyn HostHandle>,
    ) -> Self {
        Self {
            settings: Arc::new(ScanSettings {
                host_scope,
                contract,
                host,
                parent_first: config.parent_first_prefixes.clone(),
                extractor: ResourceExtractor::new(&config.resource_extensions),
                validator: DescriptorValidator::new(),
                data_dir: config.data_dir.clone(),
            }),
            bundle_extension: config.bundle_extension.trim_start_matches('.').to_string(),
            pool: ScanPool::new(config.max_concurrent_scans),
        }
    }

    pub fn pool(&self) -> &ScanPool {
        &self.pool
    }

    /// Cancel running scans and refuse new ones
    pub fn release(&self) {
        self.pool.release();
    }

    /// Bundle candidates directly under `root`, sorted by path
    pub fn find_bundles(&self, root: &Path) -> Result<Vec<PathBuf>, ModuleError> {
        if !root.exists() {
            debug!("Bundles directory {:?} does not exist", root);
            return Ok(Vec::new());
        }

        let mut bundles = Vec::new();
        for entry in std::fs::read_dir(root).map_err(|e| {
            ModuleError::DiscoveryError(format!("Failed to read bundles directory {:?}: {}", root, e))
        })? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", root, e);
                    continue;
                }
            };
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext == self.bundle_extension);
            if matches {
                bundles.push(path);
            }
        }

        bundles.sort();
        Ok(bundles)
    }

    /// Scan every bundle under `root`
    ///
    /// Bundles that contribute no module are closed and left out of the result. The
    /// result is ordered by bundle path.
    pub async fn discover(&self, root: &Path) -> Vec<BundleResult> {
        let bundles = match self.find_bundles(root) {
            Ok(bundles) => bundles,
            Err(e) => {
                warn!("Bundle discovery failed: {}", e);
                return Vec::new();
            }
        };
        debug!("Found {} bundle candidates in {:?}", bundles.len(), root);
        self.discover_bundles(bundles).await
    }

    /// Scan the given bundle paths; results keep the input order
    pub async fn discover_bundles(&self, bundles: Vec<PathBuf>) -> Vec<BundleResult> {
        let jobs: Vec<_> = bundles
            .into_iter()
            .map(|path| {
                let settings = Arc::clone(&self.settings);
                move |token: CancellationToken| match scan_bundle(&settings, &path, &token) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Failed to load bundle {:?}: {}", path, e);
                        None
                    }
                }
            })
            .collect();

        let results: Vec<BundleResult> = self
            .pool
            .run_all(jobs)
            .await
            .into_iter()
            .flatten()
            .flatten()
            .collect();

        info!(
            "Discovered {} modules in {} bundles",
            results.iter().map(|b| b.modules.len()).sum::<usize>(),
            results.len()
        );
        results
    }
}

/// Scan one bundle; runs on a blocking thread
fn scan_bundle(
    settings: &ScanSettings,
    path: &Path,
    token: &CancellationToken,
) -> Result<Option<BundleResult>, ModuleError> {
    if token.is_cancelled() {
        return Ok(None);
    }

    let index = BundleIndex::open(path)?;
    let parent: Arc<dyn ResolutionScope> = settings.host_scope.clone();
    let context = Arc::new(LoadingContext::new(
        index,
        parent,
        settings.parent_first.clone(),
    ));

    let mut modules = Vec::new();
    for unit_name in context.unit_names() {
        if token.is_cancelled() {
            debug!("Scan of {:?} cancelled", path);
            drop(modules);
            context.close();
            return Ok(None);
        }

        match load_unit(settings, &context, &unit_name) {
            Ok(Some(module)) => {
                debug!(
                    "Discovered module {} ({}) in {:?}",
                    module.descriptor.id, unit_name, path
                );
                modules.push(module);
            }
            Ok(None) => {}
            Err(e) => warn!("Rejected unit {} in {:?}: {}", unit_name, path, e),
        }
    }

    if modules.is_empty() {
        debug!("Bundle {:?} contains no modules, releasing it", path);
        context.close();
        return Ok(None);
    }

    Ok(Some(BundleResult {
        bundle_path: path.to_path_buf(),
        context,
        modules,
    }))
}

/// Validate and instantiate one unit
///
/// `Ok(None)` means the unit is not a module candidate at all.
fn load_unit(
    settings: &ScanSettings,
    context: &Arc<LoadingContext>,
    unit_name: &str,
) -> Result<Option<DiscoveredModule>, ModuleError> {
    let unit = context.resolve(unit_name)?;
    if unit.is_from_host() {
        debug!("Unit {} resolves to a host unit, skipping", unit_name);
        return Ok(None);
    }

    match settings.contract.check(&unit) {
        UnitValidation::Valid => {}
        UnitValidation::NotAnExtension => {
            debug!(
                "Unit {} does not implement {}, skipping",
                unit_name,
                settings.contract.name()
            );
            return Ok(None);
        }
        UnitValidation::NotConcrete => {
            debug!("Unit {} is not instantiable, skipping", unit_name);
            return Ok(None);
        }
        UnitValidation::MissingOperations(missing) => {
            return Err(ModuleError::ContractViolation {
                unit: unit_name.to_string(),
                missing,
            });
        }
    }

    let descriptor = match &unit.metadata {
        Some(metadata) => Descriptor::from_metadata(metadata).map_err(|e| ModuleError::InvalidUnit {
            unit: unit_name.to_string(),
            reason: e.to_string(),
        })?,
        None => Descriptor::synthetic(unit_name),
    };

    match settings.validator.validate(&descriptor) {
        ValidationResult::Valid => {}
        ValidationResult::Warnings(warnings) => {
            for warning in warnings {
                warn!("Module {}: {}", descriptor.id, warning);
            }
        }
        ValidationResult::Invalid(errors) => {
            return Err(ModuleError::InvalidUnit {
                unit: unit_name.to_string(),
                reason: errors.join("; "),
            });
        }
    }

    let host_tag = settings.host.platform_tag();
    if !descriptor.platform_tag.is_empty() && !host_tag.is_empty() && descriptor.platform_tag != host_tag {
        warn!(
            "Module {} targets platform {} but the host is {}",
            descriptor.id, descriptor.platform_tag, host_tag
        );
    }

    let symbol = unit.entry.as_deref().ok_or_else(|| {
        ModuleError::EntryPointMissing(format!("{} declares no entry symbol", unit_name))
    })?;
    let factory = settings
        .host_scope
        .entry_point(symbol)
        .ok_or_else(|| ModuleError::EntryPointMissing(symbol.to_string()))?;

    let entries = context
        .resource_names()
        .into_iter()
        .filter(|name| settings.extractor.qualifies(name))
        .filter_map(|name| context.local_resource(&name).map(|bytes| (name, bytes)));
    let staged = settings
        .extractor
        .stage(entries, &settings.data_dir.join(STAGING_DIR))?;

    let descriptor = Arc::new(descriptor);
    let module_context = ModuleContext::new(
        Arc::clone(&descriptor),
        ModuleFiles::new(descriptor.data_dir(&settings.data_dir)),
        Arc::clone(&settings.host),
        Arc::clone(context),
    );

    let instance = match catch_unwind(AssertUnwindSafe(|| factory.create(module_context))) {
        Ok(result) => result?,
        Err(payload) => {
            return Err(ModuleError::InitializationError(format!(
                "factory {} panicked: {}",
                symbol,
                panic_message(payload.as_ref())
            )));
        }
    };

    Ok(Some(DiscoveredModule {
        descriptor,
        instance,
        unit_name: unit_name.to_string(),
        staged,
    }))
}
