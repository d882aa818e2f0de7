#![no_main]
use libfuzzer_sys::fuzz_target;
use bllvm_module_host::module::loader::{CodeUnit, UnitOrigin};
use bllvm_module_host::module::validation::{DescriptorValidator, ExtensionContract};
use bllvm_module_host::module::Descriptor;

fuzz_target!(|data: &[u8]| {
    // Unit documents come straight out of third-party bundles
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(unit) = CodeUnit::parse("fuzz.Unit", source, UnitOrigin::Host) else {
        return;
    };

    let _ = ExtensionContract::default().check(&unit);

    // Descriptor construction and validation must never panic
    let descriptor = match &unit.metadata {
        Some(metadata) => match Descriptor::from_metadata(metadata) {
            Ok(descriptor) => descriptor,
            Err(_) => return,
        },
        None => Descriptor::synthetic(&unit.name),
    };
    let _ = DescriptorValidator::new().validate(&descriptor);
    let _ = descriptor.declared_dependencies().count();
});
