use std::borrow::Cow;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::core::RaymarchSettings;
use crate::error::{RenderError, RenderResult};

use super::context::GpuContext;
use super::contract::{self, ShaderInterface};
use super::resources::BufferSlot;
use super::shaders::RAYMARCH_WGSL;
use super::{Params, ENTRY_POINT, UNIFORM_BINDING};

/// Where a compute program's WGSL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// WGSL file read on first use.
    Path(PathBuf),
    /// WGSL text held in memory.
    Inline(Cow<'static, str>),
}

impl ShaderSource {
    /// The ray-march program shipped with the crate.
    pub fn builtin() -> Self {
        ShaderSource::Inline(Cow::Borrowed(RAYMARCH_WGSL))
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        ShaderSource::Path(path.into())
    }

    pub fn inline(text: impl Into<Cow<'static, str>>) -> Self {
        ShaderSource::Inline(text.into())
    }

    /// Cache key: the path itself, or a hash of inline text.
    pub fn key(&self) -> ProgramKey {
        match self {
            ShaderSource::Path(path) => ProgramKey::Path(path.clone()),
            ShaderSource::Inline(text) => {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                ProgramKey::Inline(hasher.finish())
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ShaderSource::Path(path) => path.display().to_string(),
            ShaderSource::Inline(text) if text.as_ref() == RAYMARCH_WGSL => "builtin raymarch".to_string(),
            ShaderSource::Inline(_) => "inline WGSL".to_string(),
        }
    }

    fn load(&self) -> RenderResult<Cow<'_, str>> {
        match self {
            ShaderSource::Path(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| RenderError::ShaderNotFound {
                    path: path.clone(),
                    source,
                }),
            ShaderSource::Inline(text) => Ok(Cow::Borrowed(text.as_ref())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    Path(PathBuf),
    Inline(u64),
}

/// A linked compute pipeline and the layout its bind group must follow.
pub struct CompiledProgram {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) interface: ShaderInterface,
}

impl CompiledProgram {
    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }
}

/// Linked programs keyed by source. A program that fails to compile or link
/// is never stored, so the next request retries from scratch.
#[derive(Default)]
pub struct ProgramCache {
    programs: HashMap<ProgramKey, CompiledProgram>,
    compile_count: u32,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful compile-and-link runs so far.
    pub fn compile_count(&self) -> u32 {
        self.compile_count
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get(&self, source: &ShaderSource) -> Option<&CompiledProgram> {
        self.programs.get(&source.key())
    }

    /// Returns the linked program for `source`, building it on first use.
    pub async fn ensure(
        &mut self,
        gpu: &GpuContext,
        source: &ShaderSource,
        settings: &RaymarchSettings,
    ) -> RenderResult<&CompiledProgram> {
        match self.programs.entry(source.key()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let label = source.describe();
                let text = source.load()?;
                let program = build_program(gpu, &text, &label, settings).await?;
                self.compile_count += 1;
                log::info!("compiled compute program {label} (compile #{})", self.compile_count);
                Ok(entry.insert(program))
            }
        }
    }

    pub fn clear(&mut self) {
        self.programs.clear();
    }
}

/// Parses and validates WGSL, formatting any failure as a compile log.
pub fn parse_and_validate(src: &str, label: &str) -> RenderResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(src).map_err(|e| RenderError::Compile {
        log: e.emit_to_string_with_path(src, label),
    })?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| RenderError::Compile {
        log: e.emit_to_string_with_path(src, label),
    })?;
    Ok(module)
}

fn storage_entry(slot: BufferSlot) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: slot.binding(),
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage {
                read_only: !slot.writable(),
            },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry() -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: UNIFORM_BINDING,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<Params>() as u64),
        },
        count: None,
    }
}

/// Values for the overridable constants the module actually declares.
fn pipeline_constants(interface: &ShaderInterface, settings: &RaymarchSettings) -> HashMap<String, f64> {
    let mut constants = HashMap::new();
    if interface.declares_override("SKY_COLOR") {
        constants.insert("SKY_COLOR".to_string(), settings.sky_color as f64);
    }
    if interface.declares_override("RENDER_DISTANCE") {
        constants.insert("RENDER_DISTANCE".to_string(), settings.render_distance as f64);
    }
    constants
}

async fn build_program(
    gpu: &GpuContext,
    src: &str,
    label: &str,
    settings: &RaymarchSettings,
) -> RenderResult<CompiledProgram> {
    let device = gpu.device();

    // Compile.
    let module = parse_and_validate(src, label)?;
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(src)),
    });
    if let Some(err) = device.pop_error_scope().await {
        return Err(RenderError::Compile {
            log: err.to_string(),
        });
    }
    for message in shader.get_compilation_info().await.messages {
        if matches!(message.message_type, wgpu::CompilationMessageType::Warning) {
            log::warn!("{label}: {}", message.message);
        }
    }

    // Link.
    let interface = contract::check(&module)?;
    let mut entries: Vec<_> = BufferSlot::ALL.into_iter().map(storage_entry).collect();
    entries.push(uniform_entry());
    let constants = pipeline_constants(&interface, settings);

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("voxel_raymarch.bind_group_layout"),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("voxel_raymarch.pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: ENTRY_POINT,
        compilation_options: wgpu::PipelineCompilationOptions {
            constants: &constants,
            ..Default::default()
        },
        cache: None,
    });
    if let Some(err) = device.pop_error_scope().await {
        return Err(RenderError::Link {
            log: err.to_string(),
        });
    }

    Ok(CompiledProgram {
        pipeline,
        bind_group_layout,
        interface,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_sources_are_keyed_by_text() {
        let a = ShaderSource::inline("fn a() {}");
        let b = ShaderSource::inline(String::from("fn a() {}"));
        let c = ShaderSource::inline("fn b() {}");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_ne!(ShaderSource::builtin().key(), a.key());
    }

    #[test]
    fn path_sources_are_keyed_by_path() {
        let a = ShaderSource::path("shaders/raymarch.wgsl");
        assert_eq!(a.key(), ProgramKey::Path(PathBuf::from("shaders/raymarch.wgsl")));
        assert_ne!(a.key(), ShaderSource::path("other.wgsl").key());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let source = ShaderSource::path("does/not/exist.wgsl");
        match source.load() {
            Err(RenderError::ShaderNotFound { path, .. }) => {
                assert_eq!(path, PathBuf::from("does/not/exist.wgsl"));
            }
            other => panic!("expected ShaderNotFound, got {other:?}"),
        }
    }

    #[test]
    fn syntax_errors_become_compile_logs() {
        let err = parse_and_validate("fn main( {", "broken.wgsl").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Compile);
        match err {
            RenderError::Compile { log } => assert!(log.contains("broken.wgsl"), "{log}"),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn type_errors_fail_validation() {
        let src = RAYMARCH_WGSL.replace("return color[voxel];", "return opacity[voxel];");
        assert!(matches!(
            parse_and_validate(&src, "mistyped"),
            Err(RenderError::Compile { .. })
        ));
    }

    #[test]
    fn constants_cover_declared_overrides_only() {
        let settings = RaymarchSettings {
            sky_color: 0xFF00_0000,
            render_distance: 42.0,
        };
        let interface = ShaderInterface {
            overrides: vec!["RENDER_DISTANCE".to_string()],
        };
        let constants = pipeline_constants(&interface, &settings);
        assert_eq!(constants.len(), 1);
        assert_eq!(constants["RENDER_DISTANCE"], 42.0);

        let module = parse_and_validate(RAYMARCH_WGSL, "builtin").expect("builtin compiles");
        let interface = contract::check(&module).expect("builtin links");
        let constants = pipeline_constants(&interface, &settings);
        assert_eq!(constants["SKY_COLOR"], 0xFF00_0000u32 as f64);
    }
}
