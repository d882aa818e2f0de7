//! Test utilities for module system testing
//!
//! Provides a fixture with isolated directories, builders for directory and zip
//! bundles, and recording modules that log every lifecycle call.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::time::{sleep, Duration};

use bllvm_module_host::config::ModuleHostConfig;
use bllvm_module_host::module::{
    ExtensionModule, HostScope, LifecycleStatus, LoadingContext, ModuleContext, ModuleError,
    ModuleFactory, ModuleManager, StaticHost, DEFAULT_CONTRACT, LIFECYCLE_HOOK_SIGNATURE,
};

/// Shared, ordered record of module events (`"<id>:<event>"`)
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Entry symbol of a well-behaved module
pub const RECORDING: &str = "recording";
/// Entry symbol of a module whose enable hook returns an error
pub const FAILING_ENABLE: &str = "failing-enable";
/// Entry symbol of a module whose enable hook panics
pub const PANICKING_ENABLE: &str = "panicking-enable";
/// Entry symbol of a module whose disable hook returns an error
pub const FAILING_DISABLE: &str = "failing-disable";
/// Entry symbol whose factory panics
pub const PANICKING_FACTORY: &str = "panicking-factory";

/// How a recording module reacts to lifecycle calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    FailOnEnable,
    PanicOnEnable,
    FailOnDisable,
}

/// Factory producing recording modules
pub struct RecordingFactory {
    log: EventLog,
    scopes: Arc<Mutex<Vec<Arc<LoadingContext>>>>,
    behavior: Behavior,
}

impl ModuleFactory for RecordingFactory {
    fn create(&self, context: ModuleContext) -> Result<Box<dyn ExtensionModule>, ModuleError> {
        let id = context.descriptor().id.clone();
        record(&self.log, format!("{}:created", id));
        self.scopes.lock().unwrap().push(Arc::clone(context.scope()));
        context.logger().debug("created");

        Ok(Box::new(RecordingModule {
            id,
            log: Arc::clone(&self.log),
            behavior: self.behavior,
            context,
        }))
    }
}

/// Module that logs every call it receives
pub struct RecordingModule {
    id: String,
    log: EventLog,
    behavior: Behavior,
    context: ModuleContext,
}

impl ExtensionModule for RecordingModule {
    fn on_lifecycle_status_changed(&mut self, status: LifecycleStatus) -> Result<(), ModuleError> {
        match status {
            LifecycleStatus::Enabled => {
                record(&self.log, format!("{}:enabling", self.id));
                match self.behavior {
                    Behavior::FailOnEnable => {
                        return Err(ModuleError::OperationError("refusing to start".to_string()))
                    }
                    Behavior::PanicOnEnable => panic!("module {} exploded", self.id),
                    _ => {}
                }
                self.context.files().write("state.txt", b"enabled")?;
                record(&self.log, format!("{}:enabled", self.id));
            }
            LifecycleStatus::Disabled => {
                if self.behavior == Behavior::FailOnDisable {
                    return Err(ModuleError::OperationError("refusing to stop".to_string()));
                }
                record(&self.log, format!("{}:disabled", self.id));
            }
        }
        Ok(())
    }
}

impl Drop for RecordingModule {
    fn drop(&mut self) {
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        record(&self.log, format!("{}:dropped@{}", self.id, thread));
    }
}

fn record(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

/// Test fixture for module system tests
pub struct ModuleTestFixture {
    /// Temporary directory for test data
    pub temp_dir: TempDir,
    /// Bundles directory path
    pub bundles_dir: PathBuf,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Events recorded by every module created through this fixture
    pub log: EventLog,
    /// Loading contexts handed to module factories
    pub scopes: Arc<Mutex<Vec<Arc<LoadingContext>>>>,
}

impl ModuleTestFixture {
    /// Create a new test fixture with isolated directories
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let bundles_dir = temp_dir.path().join("modules");
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&bundles_dir).unwrap();

        Self {
            temp_dir,
            bundles_dir,
            data_dir,
            log: Arc::new(Mutex::new(Vec::new())),
            scopes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> ModuleHostConfig {
        ModuleHostConfig::with_dirs(&self.bundles_dir, &self.data_dir)
    }

    fn factory(&self, behavior: Behavior) -> RecordingFactory {
        RecordingFactory {
            log: Arc::clone(&self.log),
            scopes: Arc::clone(&self.scopes),
            behavior,
        }
    }

    /// Host scope with every test entry point registered
    pub fn host_scope(&self) -> HostScope {
        HostScope::new("test-host")
            .with_contract_base("host.Extension", DEFAULT_CONTRACT)
            .with_entry_point(RECORDING, self.factory(Behavior::Normal))
            .with_entry_point(FAILING_ENABLE, self.factory(Behavior::FailOnEnable))
            .with_entry_point(PANICKING_ENABLE, self.factory(Behavior::PanicOnEnable))
            .with_entry_point(FAILING_DISABLE, self.factory(Behavior::FailOnDisable))
            .with_entry_point(
                PANICKING_FACTORY,
                |_context: ModuleContext| -> Result<Box<dyn ExtensionModule>, ModuleError> {
                    panic!("factory exploded")
                },
            )
    }

    /// Manager over this fixture's directories
    pub fn manager(&self) -> ModuleManager {
        self.manager_with(self.config())
    }

    pub fn manager_with(&self, config: ModuleHostConfig) -> ModuleManager {
        ModuleManager::new(config, Arc::new(StaticHost::new("test-host", "1.0.0")))
            .unwrap()
            .with_host_scope(self.host_scope())
    }

    /// Start a bundle named `<name>.bundle` in the bundles directory
    pub fn bundle(&self, name: &str) -> BundleBuilder {
        BundleBuilder::new(&self.bundles_dir, name)
    }

    /// Write a one-module directory bundle
    pub fn simple_bundle(&self, name: &str, id: &str, dependencies: &[&str]) -> PathBuf {
        self.bundle(name)
            .unit(
                &format!("acme.{}.Module", name),
                UnitSpec::module(id).depends_on(dependencies),
            )
            .write_dir()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Ids of the events ending in `:<event>`, in order
    pub fn ids_with_event(&self, event: &str) -> Vec<String> {
        let suffix = format!(":{}", event);
        self.events()
            .iter()
            .filter_map(|e| e.strip_suffix(suffix.as_str()).map(str::to_string))
            .collect()
    }

    /// Contexts handed to factories for modules from the given bundle
    pub fn scopes_for(&self, bundle: &str) -> Vec<Arc<LoadingContext>> {
        let file_name = format!("{}.bundle", bundle);
        self.scopes
            .lock()
            .unwrap()
            .iter()
            .filter(|scope| {
                scope
                    .bundle_path()
                    .file_name()
                    .map_or(false, |name| name == file_name.as_str())
            })
            .cloned()
            .collect()
    }
}

impl Default for ModuleTestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Declarative code unit for test bundles
#[derive(Debug, Clone)]
pub struct UnitSpec {
    kind: String,
    implements: Vec<String>,
    operations: Vec<String>,
    entry: Option<String>,
    id: Option<String>,
    dependencies: Vec<String>,
    priority: Option<i32>,
    version: Option<String>,
    folder: Option<String>,
    platform: Option<String>,
}

impl UnitSpec {
    /// A valid module unit with metadata
    pub fn module(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            version: Some("1.0.0".to_string()),
            ..Self::anonymous()
        }
    }

    /// A valid module unit without a `[module]` table
    pub fn anonymous() -> Self {
        Self {
            kind: "module".to_string(),
            implements: vec![DEFAULT_CONTRACT.to_string()],
            operations: vec![LIFECYCLE_HOOK_SIGNATURE.to_string()],
            entry: Some(RECORDING.to_string()),
            id: None,
            dependencies: Vec::new(),
            priority: None,
            version: None,
            folder: None,
            platform: None,
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn entry(mut self, entry: &str) -> Self {
        self.entry = Some(entry.to_string());
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn folder(mut self, folder: &str) -> Self {
        self.folder = Some(folder.to_string());
        self
    }

    pub fn platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn without_operations(mut self) -> Self {
        self.operations.clear();
        self
    }

    pub fn not_an_extension(mut self) -> Self {
        self.implements.clear();
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("kind = {:?}\n", self.kind));
        out.push_str(&format!("implements = {}\n", toml_array(&self.implements)));
        out.push_str(&format!("operations = {}\n", toml_array(&self.operations)));
        if let Some(entry) = &self.entry {
            out.push_str(&format!("entry = {:?}\n", entry));
        }

        if let Some(id) = &self.id {
            out.push_str("\n[module]\n");
            out.push_str(&format!("id = {:?}\n", id));
            if let Some(version) = &self.version {
                out.push_str(&format!("version = {:?}\n", version));
            }
            out.push_str(&format!("dependencies = {}\n", toml_array(&self.dependencies)));
            if let Some(priority) = self.priority {
                out.push_str(&format!("priority = {}\n", priority));
            }
            if let Some(folder) = &self.folder {
                out.push_str(&format!("folder = {:?}\n", folder));
            }
            if let Some(platform) = &self.platform {
                out.push_str(&format!("platform = {:?}\n", platform));
            }
        }
        out
    }
}

fn toml_array(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", items.join(", "))
}

/// Builds a bundle as a directory or a zip file
pub struct BundleBuilder {
    root: PathBuf,
    name: String,
    entries: Vec<(String, Vec<u8>)>,
}

impl BundleBuilder {
    pub fn new(root: &Path, name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Add a code unit (`a.b.C` is stored at `a/b/C.unit`)
    pub fn unit(self, unit_name: &str, spec: UnitSpec) -> Self {
        let source = spec.render();
        self.raw_unit(unit_name, &source)
    }

    pub fn raw_unit(self, unit_name: &str, source: &str) -> Self {
        let path = format!("{}.unit", unit_name.replace('.', "/"));
        self.entry(&path, source.as_bytes())
    }

    /// Add a file under `resources/`
    pub fn resource(self, name: &str, contents: &str) -> Self {
        self.entry(&format!("resources/{}", name), contents.as_bytes())
    }

    /// Add a raw entry (zip entry names are kept verbatim)
    pub fn entry(mut self, name: &str, contents: &[u8]) -> Self {
        self.entries.push((name.to_string(), contents.to_vec()));
        self
    }

    /// Write as a `<name>.bundle` directory
    pub fn write_dir(self) -> PathBuf {
        let dir = self.root.join(format!("{}.bundle", self.name));
        for (name, contents) in &self.entries {
            let path = dir.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write as a `<name>.bundle` zip file
    pub fn write_zip(self) -> PathBuf {
        let path = self.root.join(format!("{}.bundle", self.name));
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in &self.entries {
            writer.start_file(name.as_str(), options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
        path
    }
}

/// Wait for a condition with timeout
pub async fn wait_for_condition<F>(
    mut condition: F,
    timeout_secs: u64,
    interval_ms: u64,
) -> Result<(), String>
where
    F: FnMut() -> bool,
{
    let timeout = Duration::from_secs(timeout_secs);
    let interval = Duration::from_millis(interval_ms);
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        sleep(interval).await;
    }

    Err(format!("Condition not met within {} seconds", timeout_secs))
}
