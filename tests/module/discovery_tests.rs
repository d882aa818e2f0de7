//! Bundle discovery tests
//!
//! Tests for bundle enumeration, unit qualification, descriptor synthesis, duplicate
//! handling and resource extraction.

use std::fs;
use std::sync::Arc;

use bllvm_module_host::config::ModuleHostConfig;
use bllvm_module_host::module::{ModuleError, ModuleManager, ModuleState, StaticHost};

use super::test_utils::*;

#[tokio::test]
async fn test_directory_and_zip_bundles_load() {
    let fixture = ModuleTestFixture::new();
    fixture.simple_bundle("core", "core", &[]);
    fixture
        .bundle("packed")
        .unit("acme.packed.Packed", UnitSpec::module("packed").depends_on(&["core"]))
        .resource("settings.toml", "mode = \"zip\"")
        .write_zip();

    let manager = fixture.manager();
    manager.initialize().await;

    assert_eq!(manager.get_module_state("core").await, Some(ModuleState::Enabled));
    assert_eq!(manager.get_module_state("packed").await, Some(ModuleState::Enabled));
    assert_eq!(
        fs::read_to_string(fixture.data_dir.join("packed").join("settings.toml")).unwrap(),
        "mode = \"zip\""
    );

    let snapshot = manager.module("packed").await.unwrap();
    assert_eq!(snapshot.bundle_path, fixture.bundles_dir.join("packed.bundle"));
}

#[tokio::test]
async fn test_non_bundle_entries_ignored() {
    let fixture = ModuleTestFixture::new();
    fixture.simple_bundle("core", "core", &[]);
    fs::write(fixture.bundles_dir.join("notes.txt"), "not a bundle").unwrap();
    fs::create_dir_all(fixture.bundles_dir.join("stray").join("acme")).unwrap();
    fs::write(
        fixture.bundles_dir.join("stray").join("acme").join("Stray.unit"),
        UnitSpec::module("stray").render(),
    )
    .unwrap();

    let manager = fixture.manager();
    let report = manager.load_all().await;

    assert_eq!(report.bundles_scanned, 1);
    assert_eq!(report.loaded, vec!["core"]);
}

#[tokio::test]
async fn test_missing_bundles_directory_loads_nothing() {
    let fixture = ModuleTestFixture::new();
    let manager = fixture.manager();
    fs::remove_dir_all(&fixture.bundles_dir).unwrap();

    let report = manager.load_all().await;
    assert_eq!(report.bundles_scanned, 0);
    assert!(report.loaded.is_empty());
    assert!(manager.list_modules().await.is_empty());
}

#[tokio::test]
async fn test_unit_qualification() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("mixed")
        .unit("acme.mixed.Good", UnitSpec::module("good"))
        .unit("acme.mixed.Helper", UnitSpec::module("helper").kind("library"))
        .unit("acme.mixed.Base", UnitSpec::module("base").kind("abstract"))
        .unit("acme.mixed.Contract", UnitSpec::module("contract").kind("interface"))
        .unit("acme.mixed.Partial", UnitSpec::module("partial").without_operations())
        .unit("acme.mixed.Unrelated", UnitSpec::module("unrelated").not_an_extension())
        .unit("acme.mixed.BadId", UnitSpec::module("-bad"))
        .unit("acme.mixed.Orphan", UnitSpec::module("orphan").entry("no-such-entry"))
        .unit("acme.mixed.Exploding", UnitSpec::module("exploding").entry(PANICKING_FACTORY))
        .write_dir();

    let manager = fixture.manager();
    let report = manager.load_all().await;

    assert_eq!(report.loaded, vec!["good"]);
    assert_eq!(fixture.ids_with_event("created"), vec!["good"]);

    // Nothing staged for rejected units survives
    let staging = fixture.data_dir.join(".staging");
    assert!(!staging.exists() || fs::read_dir(&staging).unwrap().next().is_none());
}

#[tokio::test]
async fn test_soft_descriptor_problems_only_warn() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("loose")
        .unit("acme.loose.Odd", UnitSpec::module("odd").version("not-a-version"))
        .unit("acme.loose.Elsewhere", UnitSpec::module("elsewhere").platform("other-os"))
        .write_dir();

    let manager = ModuleManager::new(
        fixture.config(),
        Arc::new(StaticHost::new("test-host", "1.0.0").with_platform_tag("linux-x86_64")),
    )
    .unwrap()
    .with_host_scope(fixture.host_scope());
    manager.initialize().await;

    assert_eq!(manager.get_module_state("odd").await, Some(ModuleState::Enabled));
    assert_eq!(manager.get_module_state("elsewhere").await, Some(ModuleState::Enabled));
    assert_eq!(
        manager.module("elsewhere").await.unwrap().descriptor.platform_tag,
        "other-os"
    );
}

#[tokio::test]
async fn test_unit_without_metadata_gets_synthetic_descriptor() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("plain")
        .unit("acme.plain.PlainModule", UnitSpec::anonymous())
        .write_dir();

    let manager = fixture.manager();
    manager.initialize().await;

    let snapshot = manager.module("PlainModule").await.unwrap();
    assert!(!snapshot.descriptor.found);
    assert_eq!(snapshot.descriptor.name, "PlainModule");
    assert_eq!(snapshot.descriptor.version, "");
    assert_eq!(snapshot.descriptor.priority, 0);
    assert!(snapshot.descriptor.dependencies.is_empty());
    assert_eq!(snapshot.state, ModuleState::Enabled);
}

#[tokio::test]
async fn test_broken_bundles_do_not_abort_discovery() {
    let fixture = ModuleTestFixture::new();
    fs::write(fixture.bundles_dir.join("garbage.bundle"), b"definitely not a zip").unwrap();
    fixture
        .bundle("partly")
        .raw_unit("acme.partly.Broken", "kind = [")
        .unit("acme.partly.Fine", UnitSpec::module("fine"))
        .write_dir();
    fixture
        .bundle("broken")
        .raw_unit("acme.broken.Broken", "implements = 7")
        .write_zip();
    fixture.simple_bundle("zzz", "last", &[]);

    let manager = fixture.manager();
    let report = manager.load_all().await;

    assert_eq!(report.bundles_scanned, 4);
    assert_eq!(report.loaded, vec!["fine", "last"]);
}

#[tokio::test]
async fn test_duplicate_id_across_bundles_keeps_first() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("first")
        .unit("acme.first.Dup", UnitSpec::module("dup"))
        .resource("config.toml", "origin = \"first\"")
        .write_dir();
    fixture
        .bundle("second")
        .unit("acme.second.Dup", UnitSpec::module("dup"))
        .resource("config.toml", "origin = \"second\"")
        .resource("extra.toml", "only = \"second\"")
        .write_dir();

    let manager = fixture.manager();
    let report = manager.load_all().await;

    assert_eq!(report.loaded, vec!["dup"]);
    assert_eq!(report.duplicates, vec!["dup"]);
    assert_eq!(
        manager.module("dup").await.unwrap().bundle_path,
        fixture.bundles_dir.join("first.bundle")
    );

    let data = fixture.data_dir.join("dup");
    assert_eq!(
        fs::read_to_string(data.join("config.toml")).unwrap(),
        "origin = \"first\""
    );
    assert!(!data.join("extra.toml").exists());

    // The loser was dropped on the lifecycle thread and its bundle released
    assert_eq!(fixture.ids_with_event("created"), vec!["dup", "dup"]);
    assert_eq!(fixture.ids_with_event("dropped@module-lifecycle"), vec!["dup"]);
    let second = fixture.scopes_for("second");
    assert_eq!(second.len(), 1);
    assert!(second[0].is_closed());
    assert!(!fixture.scopes_for("first")[0].is_closed());
}

#[tokio::test]
async fn test_duplicate_id_within_bundle_keeps_first_unit() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("twice")
        .unit("acme.twice.One", UnitSpec::module("same").version("1.0.0"))
        .unit("acme.twice.Two", UnitSpec::module("same").version("2.0.0"))
        .write_dir();

    let manager = fixture.manager();
    let report = manager.load_all().await;

    assert_eq!(report.loaded, vec!["same"]);
    assert_eq!(report.duplicates, vec!["same"]);
    assert_eq!(manager.module("same").await.unwrap().descriptor.version, "1.0.0");

    // The bundle still backs the kept module
    assert!(!manager.loading_context("same").await.unwrap().is_closed());
}

#[tokio::test]
async fn test_duplicate_of_registered_module_rejected_on_reload() {
    let fixture = ModuleTestFixture::new();
    fixture.simple_bundle("core", "core", &[]);

    let manager = fixture.manager();
    manager.initialize().await;

    fixture.simple_bundle("impostor", "core", &[]);
    let report = manager.reload().await;

    assert!(report.loaded.is_empty());
    assert_eq!(report.duplicates, vec!["core"]);
    assert_eq!(
        manager.module("core").await.unwrap().bundle_path,
        fixture.bundles_dir.join("core.bundle")
    );
    assert_eq!(manager.get_module_state("core").await, Some(ModuleState::Enabled));
}

#[tokio::test]
async fn test_losing_bundle_not_rescanned_until_id_is_free() {
    let fixture = ModuleTestFixture::new();
    let core = fixture.simple_bundle("core", "core", &[]);

    let manager = fixture.manager();
    manager.initialize().await;

    fixture.simple_bundle("impostor", "core", &[]);
    assert_eq!(manager.reload().await.duplicates, vec!["core"]);
    for _ in 0..3 {
        let report = manager.reload().await;
        assert_eq!(report.bundles_scanned, 0);
        assert!(report.duplicates.is_empty());
    }
    assert_eq!(fixture.ids_with_event("created"), vec!["core", "core"]);

    // Freeing the id lets the losing bundle in on the next pass
    manager.unload_module("core").await.unwrap();
    fs::remove_dir_all(&core).unwrap();
    let report = manager.reload().await;

    assert_eq!(report.loaded, vec!["core"]);
    assert_eq!(fixture.ids_with_event("created"), vec!["core", "core", "core"]);
    assert_eq!(
        manager.module("core").await.unwrap().bundle_path,
        fixture.bundles_dir.join("impostor.bundle")
    );
    assert_eq!(manager.get_module_state("core").await, Some(ModuleState::Enabled));
}

#[tokio::test]
async fn test_resources_extracted_by_extension_without_overwrite() {
    let fixture = ModuleTestFixture::new();
    let data = fixture.data_dir.join("core");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("config.toml"), "edited = true").unwrap();

    fixture
        .bundle("core")
        .unit("acme.core.Core", UnitSpec::module("core"))
        .resource("config.toml", "edited = false")
        .resource("nested/settings.YML", "level: 2")
        .resource("README.md", "# not extracted")
        .resource("logo.png", "binary")
        .write_dir();

    let manager = fixture.manager();
    manager.load_all().await;

    assert_eq!(fs::read_to_string(data.join("config.toml")).unwrap(), "edited = true");
    assert_eq!(
        fs::read_to_string(data.join("nested").join("settings.YML")).unwrap(),
        "level: 2"
    );
    assert!(!data.join("README.md").exists());
    assert!(!data.join("logo.png").exists());
    let staging = fixture.data_dir.join(".staging");
    assert!(!staging.exists() || fs::read_dir(&staging).unwrap().next().is_none());
}

#[tokio::test]
async fn test_folder_override_redirects_data_directory() {
    let fixture = ModuleTestFixture::new();
    fixture
        .bundle("addon")
        .unit("acme.addon.Addon", UnitSpec::module("addon").folder("AddonData"))
        .resource("config.toml", "x = 1")
        .write_dir();

    let manager = fixture.manager();
    manager.initialize().await;

    let data = fixture.data_dir.join("AddonData");
    assert!(data.join("config.toml").exists());
    // Written by the module through its own file handle while enabling
    assert_eq!(fs::read_to_string(data.join("state.txt")).unwrap(), "enabled");
    assert!(!fixture.data_dir.join("addon").exists());
}

#[tokio::test]
async fn test_custom_bundle_extension() {
    let fixture = ModuleTestFixture::new();
    fixture.simple_bundle("core", "core", &[]);
    let plugin = fixture.bundles_dir.join("extra.plugin");
    fs::create_dir_all(plugin.join("acme")).unwrap();
    fs::write(plugin.join("acme").join("Extra.unit"), UnitSpec::module("extra").render()).unwrap();

    let config = ModuleHostConfig {
        bundle_extension: ".plugin".to_string(),
        ..fixture.config()
    };
    let manager = fixture.manager_with(config);
    let report = manager.load_all().await;

    assert_eq!(report.loaded, vec!["extra"]);
}

#[tokio::test]
async fn test_bounded_scan_pool_loads_everything() {
    let fixture = ModuleTestFixture::new();
    for i in 0..6 {
        let name = format!("b{}", i);
        fixture.simple_bundle(&name, &format!("m{}", i), &[]);
    }

    let config = ModuleHostConfig {
        max_concurrent_scans: 2,
        ..fixture.config()
    };
    let manager = fixture.manager_with(config);
    manager.initialize().await;

    assert_eq!(
        manager.list_modules().await,
        vec!["m0", "m1", "m2", "m3", "m4", "m5"]
    );
    assert_eq!(manager.activation_order().await.len(), 6);
}

#[tokio::test]
async fn test_stale_staging_purged_on_construction() {
    let fixture = ModuleTestFixture::new();
    let leftover = fixture.data_dir.join(".staging").join("0000-stale");
    fs::create_dir_all(&leftover).unwrap();
    fs::write(leftover.join("config.toml"), "stale").unwrap();

    let _manager = fixture.manager();

    assert!(!fixture.data_dir.join(".staging").exists());
}

#[tokio::test]
async fn test_uncreatable_directory_is_a_configuration_error() {
    let fixture = ModuleTestFixture::new();
    let blocker = fixture.temp_dir.path().join("blocker");
    fs::write(&blocker, "a file, not a directory").unwrap();

    let config = ModuleHostConfig::with_dirs(blocker.join("modules"), &fixture.data_dir);
    let result = ModuleManager::new(config, Arc::new(StaticHost::new("test-host", "1.0.0")));

    assert!(matches!(result, Err(ModuleError::Configuration(_))));
}
