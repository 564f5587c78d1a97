pub mod atlas;
pub mod core;
pub mod error;
pub mod gpu;
pub mod host;
pub mod reference_cpu;
pub mod scene;

pub use crate::atlas::TextureAtlas;
pub use crate::core::{CameraBasis, FrameStats, RaymarchSettings, RenderRequest, EMPTY_CELL};
pub use crate::error::{ErrorKind, RenderError, RenderResult};
pub use crate::gpu::{RenderContext, RendererConfig, ShaderSource, UploadPolicy};
pub use crate::host::{execute_kernel, KernelArgs};
pub use crate::scene::{Camera, Material, SceneSnapshot, Voxel};
