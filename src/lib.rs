//! Headless driver for a glint ray-tracing compute shader.
//!
//! A render job describes a spherical camera, a handful of texture images
//! and a WGSL module. The pipeline derives the camera basis, decodes and
//! normalizes the images, hands everything to a [`Renderer`] for a single
//! dispatch and writes the resulting frame as PNG. The GPU sits behind the
//! [`Renderer`] trait so the rest of the crate runs without one.

pub mod camera;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod pixels;
pub mod render;
pub mod uniforms;

pub use camera::{update_camera, CameraBasis, SphericalCamera};
pub use error::{Error, Result};
pub use job::{RenderJob, TextureInput};
pub use output::{read_png, write_png};
pub use pipeline::{render_to_file, PreparedJob};
pub use pixels::{load_image, load_texture_image, normalize_image, PixelBuffer};
pub use render::{
    AddressMode, BindingKind, DeviceOptions, DispatchCall, FilterMode, GpuRenderer, Renderer,
    ResourceUsage, SamplerDesc, SamplerHandle, ShaderBinding, ShaderLibrary, ShaderModuleSource,
    TextureDesc, TextureFormat, TextureHandle,
};
pub use uniforms::{GpuUniforms, RenderUniforms};
