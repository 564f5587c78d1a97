//! Reflection check that a validated module exposes the interface the host
//! binds: six storage arrays, one uniform block and an 8x8x1 `main` kernel.
//!
//! Every mismatch is collected, so a single link log lists all of them.

use std::mem::offset_of;

use naga::{AddressSpace, Module, ScalarKind, ShaderStage, StorageAccess, TypeInner, VectorSize};

use crate::error::{RenderError, RenderResult};

use super::resources::BufferSlot;
use super::{Params, ENTRY_POINT, UNIFORM_BINDING, WORKGROUP_SIZE};

/// Bind group every resource lives in.
pub const BIND_GROUP: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UniformType {
    Float,
    Int,
    Float3,
    Int3,
}

fn expected_uniforms() -> [(&'static str, UniformType, usize); 10] {
    [
        ("cam", UniformType::Float3, offset_of!(Params, cam)),
        ("tanFov", UniformType::Float, offset_of!(Params, tan_fov)),
        ("forward", UniformType::Float3, offset_of!(Params, forward)),
        ("voxCount", UniformType::Int, offset_of!(Params, vox_count)),
        ("right", UniformType::Float3, offset_of!(Params, right)),
        ("width", UniformType::Int, offset_of!(Params, width)),
        ("up", UniformType::Float3, offset_of!(Params, up)),
        ("height", UniformType::Int, offset_of!(Params, height)),
        ("worldMin", UniformType::Int3, offset_of!(Params, world_min)),
        ("worldSize", UniformType::Int3, offset_of!(Params, world_size)),
    ]
}

fn element_kinds(slot: BufferSlot) -> &'static [ScalarKind] {
    match slot {
        BufferSlot::Pixels | BufferSlot::Color | BufferSlot::TextureAtlas => {
            &[ScalarKind::Uint, ScalarKind::Sint]
        }
        BufferSlot::VoxelGrid | BufferSlot::TextureLocation => &[ScalarKind::Sint],
        BufferSlot::Opacity => &[ScalarKind::Float],
    }
}

/// Parts of the module the host adapts to rather than requires.
#[derive(Debug, Clone, Default)]
pub struct ShaderInterface {
    /// Names of the pipeline-overridable constants the module declares.
    pub overrides: Vec<String>,
}

impl ShaderInterface {
    pub fn declares_override(&self, name: &str) -> bool {
        self.overrides.iter().any(|o| o == name)
    }
}

/// Checks `module` against the host interface.
pub fn check(module: &Module) -> RenderResult<ShaderInterface> {
    let mut problems = Vec::new();
    check_entry_point(module, &mut problems);
    for slot in BufferSlot::ALL {
        check_storage(module, slot, &mut problems);
    }
    check_uniforms(module, &mut problems);

    if !problems.is_empty() {
        return Err(RenderError::Link {
            log: problems.join("\n"),
        });
    }
    Ok(ShaderInterface {
        overrides: module.overrides.iter().filter_map(|(_, o)| o.name.clone()).collect(),
    })
}

fn check_entry_point(module: &Module, problems: &mut Vec<String>) {
    let Some(entry) = module.entry_points.iter().find(|ep| ep.name == ENTRY_POINT) else {
        problems.push(format!("missing entry point `{ENTRY_POINT}`"));
        return;
    };
    if entry.stage != ShaderStage::Compute {
        problems.push(format!("entry point `{ENTRY_POINT}` is not a compute kernel"));
    }
    if entry.workgroup_size != WORKGROUP_SIZE {
        problems.push(format!(
            "workgroup size {:?}, expected {:?}",
            entry.workgroup_size, WORKGROUP_SIZE
        ));
    }
}

fn global_at(module: &Module, binding: u32) -> Option<&naga::GlobalVariable> {
    module.global_variables.iter().map(|(_, gv)| gv).find(|gv| {
        gv.binding
            .as_ref()
            .is_some_and(|rb| rb.group == BIND_GROUP && rb.binding == binding)
    })
}

fn check_storage(module: &Module, slot: BufferSlot, problems: &mut Vec<String>) {
    let binding = slot.binding();
    let name = slot.shader_name();
    let Some(global) = global_at(module, binding) else {
        problems.push(format!("binding {binding} ({name}) is not declared"));
        return;
    };

    match global.space {
        AddressSpace::Storage { access } => {
            let writes = access.contains(StorageAccess::STORE);
            if slot.writable() && !writes {
                problems.push(format!("binding {binding} ({name}) must be read_write"));
            } else if !slot.writable() && writes {
                problems.push(format!("binding {binding} ({name}) must be read-only"));
            }
        }
        other => {
            problems.push(format!("binding {binding} ({name}) is in {other:?}, expected storage"));
            return;
        }
    }

    let element = match module.types[global.ty].inner {
        TypeInner::Array { base, .. } => match module.types[base].inner {
            TypeInner::Scalar(scalar) if scalar.width == 4 => Some(scalar.kind),
            _ => None,
        },
        _ => None,
    };
    match element {
        Some(kind) if element_kinds(slot).contains(&kind) => {}
        _ => problems.push(format!(
            "binding {binding} ({name}) must be an array of 32-bit {:?}",
            element_kinds(slot)
        )),
    }
}

fn uniform_type(inner: &TypeInner) -> Option<UniformType> {
    match *inner {
        TypeInner::Scalar(s) if s.width == 4 => match s.kind {
            ScalarKind::Float => Some(UniformType::Float),
            ScalarKind::Sint => Some(UniformType::Int),
            _ => None,
        },
        TypeInner::Vector {
            size: VectorSize::Tri,
            scalar,
        } if scalar.width == 4 => match scalar.kind {
            ScalarKind::Float => Some(UniformType::Float3),
            ScalarKind::Sint => Some(UniformType::Int3),
            _ => None,
        },
        _ => None,
    }
}

fn check_uniforms(module: &Module, problems: &mut Vec<String>) {
    let Some(global) = global_at(module, UNIFORM_BINDING) else {
        problems.push(format!("uniform block at binding {UNIFORM_BINDING} is not declared"));
        return;
    };
    if global.space != AddressSpace::Uniform {
        problems.push(format!("binding {UNIFORM_BINDING} must be a uniform block"));
        return;
    }
    let TypeInner::Struct { ref members, span } = module.types[global.ty].inner else {
        problems.push(format!("binding {UNIFORM_BINDING} must be a struct"));
        return;
    };
    if span as usize > std::mem::size_of::<Params>() {
        problems.push(format!(
            "uniform block spans {span} bytes, host provides {}",
            std::mem::size_of::<Params>()
        ));
    }

    for (name, expected, offset) in expected_uniforms() {
        let Some(member) = members.iter().find(|m| m.name.as_deref() == Some(name)) else {
            problems.push(format!("uniform `{name}` is not declared"));
            continue;
        };
        if uniform_type(&module.types[member.ty].inner) != Some(expected) {
            problems.push(format!("uniform `{name}` must be {expected:?}"));
        }
        if member.offset as usize != offset {
            problems.push(format!(
                "uniform `{name}` sits at offset {}, host writes it at {offset}",
                member.offset
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::program::parse_and_validate;
    use crate::gpu::shaders::RAYMARCH_WGSL;

    fn link_log(src: &str) -> String {
        let module = parse_and_validate(src, "test").expect("shader compiles");
        match check(&module) {
            Err(RenderError::Link { log }) => log,
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn builtin_program_satisfies_contract() {
        let module = parse_and_validate(RAYMARCH_WGSL, "builtin").expect("builtin compiles");
        let interface = check(&module).expect("builtin links");
        assert!(interface.declares_override("SKY_COLOR"));
        assert!(interface.declares_override("RENDER_DISTANCE"));
        assert!(!interface.declares_override("WORKGROUP_SIZE"));
    }

    #[test]
    fn params_layout_matches_wgsl_packing() {
        assert_eq!(std::mem::size_of::<Params>(), 96);
        assert_eq!(offset_of!(Params, tan_fov), 12);
        assert_eq!(offset_of!(Params, world_min), 64);
        assert_eq!(offset_of!(Params, world_size), 80);
    }

    #[test]
    fn wrong_workgroup_size_is_reported() {
        let src = RAYMARCH_WGSL.replace("@workgroup_size(8, 8, 1)", "@workgroup_size(16, 16, 1)");
        assert!(link_log(&src).contains("workgroup size"));
    }

    #[test]
    fn missing_uniform_is_reported() {
        let src = RAYMARCH_WGSL.replace("tanFov", "fovTangent");
        assert!(link_log(&src).contains("uniform `tanFov` is not declared"));
    }

    #[test]
    fn writable_scene_buffer_is_reported() {
        let src = RAYMARCH_WGSL.replace(
            "var<storage, read> voxelGrid",
            "var<storage, read_write> voxelGrid",
        );
        assert!(link_log(&src).contains("binding 1 (voxelGrid) must be read-only"));
    }

    #[test]
    fn wrong_element_type_is_reported() {
        let src = RAYMARCH_WGSL
            .replace("var<storage, read> opacity: array<f32>", "var<storage, read> opacity: array<u32>")
            .replace("let alpha = opacity[voxel];", "let alpha = f32(opacity[voxel]);");
        assert!(link_log(&src).contains("binding 3 (opacity)"));
    }

    #[test]
    fn every_problem_lands_in_one_log() {
        let src = RAYMARCH_WGSL
            .replace("@workgroup_size(8, 8, 1)", "@workgroup_size(4, 4, 1)")
            .replace("tanFov", "fovTangent");
        let log = link_log(&src);
        assert_eq!(log.lines().count(), 2, "{log}");
    }

    #[test]
    fn module_without_main_is_reported() {
        let src = RAYMARCH_WGSL.replace("fn main(", "fn kernel(");
        assert!(link_log(&src).contains("missing entry point `main`"));
    }
}
