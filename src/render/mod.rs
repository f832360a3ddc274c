//! Boundary between the pipeline and the GPU.
//!
//! The pipeline only talks to [`Renderer`]; [`GpuRenderer`] implements it on
//! top of wgpu and tests substitute their own implementation.

mod native;
mod shader;

use std::ops::BitOr;
use std::path::Path;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::uniforms::RenderUniforms;

pub use native::{DeviceOptions, GpuRenderer};
pub use shader::{ShaderBinding, ShaderLibrary, ShaderModuleSource};

/// Resource allocation and dispatch capability used by the pipeline.
pub trait Renderer {
    /// Loads the shader module providing `entry_point`.
    fn load_module(&mut self, path: &Path, entry_point: &str) -> Result<()>;

    /// Creates a sampled texture initialized with `data`.
    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<TextureHandle>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle>;

    /// Allocates the surface the entry point writes into.
    fn create_surface(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;

    /// Runs the loaded entry point once over the output surface.
    fn dispatch(&mut self, call: &DispatchCall<'_>) -> Result<()>;

    /// Copies a surface back into row-major RGBA8 pixels.
    fn read_surface(&mut self, surface: TextureHandle) -> Result<RgbaImage>;
}

/// Opaque reference to a texture or surface owned by a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

/// Opaque reference to a sampler owned by a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub usize);

/// Resources bound for a single dispatch, in binding order.
#[derive(Debug, Clone, Copy)]
pub struct DispatchCall<'a> {
    pub uniforms: &'a RenderUniforms,
    pub textures: &'a [TextureHandle],
    pub samplers: &'a [SamplerHandle],
    pub output: TextureHandle,
}

impl DispatchCall<'_> {
    /// Number of bindings the call provides: uniforms, textures, samplers
    /// and the output surface.
    pub fn binding_count(&self) -> u32 {
        (2 + self.textures.len() + self.samplers.len()) as u32
    }

    /// Kind of resource at each group 0 binding, indexed by binding number.
    pub fn binding_layout(&self) -> Vec<BindingKind> {
        std::iter::once(BindingKind::Uniform)
            .chain(self.textures.iter().map(|_| BindingKind::SampledTexture))
            .chain(self.samplers.iter().map(|_| BindingKind::Sampler))
            .chain(std::iter::once(BindingKind::StorageTexture))
            .collect()
    }
}

/// Resource kinds a dispatch can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Uniform,
    /// Filterable float `texture_2d`.
    SampledTexture,
    /// Non-comparison sampler.
    Sampler,
    /// Write-only `texture_storage_2d<rgba8unorm>`.
    StorageTexture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    R8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb => 4,
            Self::R8Unorm => 1,
        }
    }
}

/// How a texture may be accessed from shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    pub shader_resource: bool,
    pub unordered_access: bool,
}

impl ResourceUsage {
    pub const SHADER_RESOURCE: Self = Self {
        shader_resource: true,
        unordered_access: false,
    };
    pub const UNORDERED_ACCESS: Self = Self {
        shader_resource: false,
        unordered_access: true,
    };

    pub fn contains(self, other: Self) -> bool {
        (self.shader_resource || !other.shader_resource)
            && (self.unordered_access || !other.unordered_access)
    }
}

impl BitOr for ResourceUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            shader_resource: self.shader_resource || rhs.shader_resource,
            unordered_access: self.unordered_access || rhs.unordered_access,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: ResourceUsage,
}

impl TextureDesc {
    /// Byte length of tightly packed data for this texture.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_layout_orders_bindings() {
        let uniforms = RenderUniforms::new(4, 4);
        let call = DispatchCall {
            uniforms: &uniforms,
            textures: &[TextureHandle(0), TextureHandle(1)],
            samplers: &[SamplerHandle(0)],
            output: TextureHandle(2),
        };
        assert_eq!(call.binding_count(), 5);
        assert_eq!(
            call.binding_layout(),
            vec![
                BindingKind::Uniform,
                BindingKind::SampledTexture,
                BindingKind::SampledTexture,
                BindingKind::Sampler,
                BindingKind::StorageTexture,
            ]
        );
    }

    #[test]
    fn usage_flags_combine() {
        let usage = ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS;
        assert!(usage.contains(ResourceUsage::SHADER_RESOURCE));
        assert!(usage.contains(ResourceUsage::UNORDERED_ACCESS));
        assert!(!ResourceUsage::SHADER_RESOURCE.contains(usage));
    }

    #[test]
    fn texture_byte_len_follows_format() {
        let desc = TextureDesc {
            label: "roughness".into(),
            width: 4,
            height: 2,
            format: TextureFormat::R8Unorm,
            usage: ResourceUsage::SHADER_RESOURCE,
        };
        assert_eq!(desc.byte_len(), 8);
    }

    #[test]
    fn formats_use_snake_case_names() {
        let json = serde_json::to_string(&TextureFormat::Rgba8UnormSrgb).unwrap();
        assert_eq!(json, "\"rgba8_unorm_srgb\"");
    }
}
