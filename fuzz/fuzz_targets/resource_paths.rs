#![no_main]
use libfuzzer_sys::fuzz_target;
use bllvm_module_host::module::loader::unit::unit_name_from_path;
use bllvm_module_host::module::sandbox::FileSystemSandbox;

fuzz_target!(|data: &[u8]| {
    // Archive entry names are attacker controlled
    let Ok(entry) = std::str::from_utf8(data) else {
        return;
    };

    let sandbox = FileSystemSandbox::new("/sandbox/module");
    if let Ok(path) = sandbox.resolve(entry) {
        assert!(path.starts_with("/sandbox/module"), "{:?} escaped", entry);
        assert!(sandbox.is_within_sandbox(&path));
    }

    let _ = unit_name_from_path(entry);
});
