//! Parse and validate every kernel with naga.
//!
//! Catches WGSL errors without a GPU: type mismatches, reserved identifiers,
//! barriers in non-uniform control flow and bindings that disagree with the
//! kernel table.

use fluidx::kernels::{self, KernelDesc, SlotKind};

fn parse(kernel: &KernelDesc) -> naga::Module {
    naga::front::wgsl::parse_str(kernel.source)
        .unwrap_or_else(|e| panic!("{}: WGSL parse error: {}", kernel.name, e.emit_to_string(kernel.source)))
}

fn validate_wgsl(kernel: &KernelDesc) -> Result<(), String> {
    let module = parse(kernel);
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| format!("{}: WGSL validation error: {:?}", kernel.name, e))?;
    Ok(())
}

#[test]
fn test_all_kernels_validate() {
    let failures: Vec<String> = kernels::ALL
        .iter()
        .filter_map(|kernel| validate_wgsl(kernel).err())
        .collect();
    assert!(failures.is_empty(), "{}", failures.join("\n"));
}

#[test]
fn test_entry_points_match_kind() {
    for kernel in kernels::ALL {
        let module = parse(kernel);
        let stages: Vec<(naga::ShaderStage, &str)> = module
            .entry_points
            .iter()
            .map(|ep| (ep.stage, ep.name.as_str()))
            .collect();

        if kernel.is_compute() {
            assert_eq!(stages, vec![(naga::ShaderStage::Compute, "main")], "{}", kernel.name);
        } else {
            assert!(stages.contains(&(naga::ShaderStage::Vertex, "vs_main")), "{}", kernel.name);
            assert!(stages.contains(&(naga::ShaderStage::Fragment, "fs_main")), "{}", kernel.name);
        }
    }
}

#[test]
fn test_bindings_match_slot_table() {
    for kernel in kernels::ALL {
        let module = parse(kernel);
        let mut bound: Vec<u32> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| var.binding.as_ref())
            .inspect(|binding| assert_eq!(binding.group, 0, "{}", kernel.name))
            .map(|binding| binding.binding)
            .collect();
        bound.sort_unstable();

        let expected: Vec<u32> = (0..kernel.slots.len() as u32).collect();
        assert_eq!(bound, expected, "{}", kernel.name);
    }
}

#[test]
fn test_storage_slots_are_storage_globals() {
    for kernel in kernels::ALL {
        let module = parse(kernel);
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let slot = kernel.slots[binding.binding as usize];
            let is_storage_buffer = matches!(var.space, naga::AddressSpace::Storage { .. });
            let expects_storage_buffer = matches!(
                slot,
                SlotKind::Structured | SlotKind::OptionalStructured | SlotKind::StructuredRw
            );
            assert_eq!(
                is_storage_buffer, expects_storage_buffer,
                "{} slot {}",
                kernel.name, binding.binding
            );

            let is_uniform = matches!(var.space, naga::AddressSpace::Uniform);
            let expects_uniform = matches!(slot, SlotKind::Constants | SlotKind::Values);
            assert_eq!(is_uniform, expects_uniform, "{} slot {}", kernel.name, binding.binding);
        }
    }
}

#[test]
fn test_cube_marches_write_every_dispatched_texel() {
    // Texels that are skipped must still be cleared, so the store sits in the
    // entry point's top-level block rather than behind a branch.
    for name in ["ray_march", "ray_march_view"] {
        let kernel = kernels::ALL
            .iter()
            .find(|k| k.name == name)
            .unwrap_or_else(|| panic!("missing kernel {}", name));
        let module = parse(kernel);
        let entry = &module.entry_points[0];
        let top_level_store = entry
            .function
            .body
            .iter()
            .any(|statement| matches!(statement, naga::Statement::ImageStore { .. }));
        assert!(top_level_store, "{}: store is conditional", name);
    }
}
