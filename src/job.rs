use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::camera::SphericalCamera;
use crate::render::{ResourceUsage, SamplerDesc, TextureFormat};
use crate::uniforms::RenderUniforms;

/// Everything needed to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub name: String,
    pub shader: PathBuf,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    /// Output `[width, height]` in pixels.
    pub output_size: [u32; 2],
    #[serde(default = "default_focal_length")]
    pub focal_length: f32,
    #[serde(default = "default_frame_height")]
    pub frame_height: f32,
    #[serde(default)]
    pub camera: SphericalCamera,
    pub textures: Vec<TextureInput>,
    #[serde(default)]
    pub sampler: SamplerDesc,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

/// An image file uploaded as a shader input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureInput {
    pub path: PathBuf,
    pub format: TextureFormat,
    #[serde(default = "default_usage")]
    pub usage: ResourceUsage,
    /// `[width, height]` the image is required to have, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

impl TextureInput {
    fn new(path: &str, format: TextureFormat, usage: ResourceUsage, size: u32) -> Self {
        Self {
            path: PathBuf::from(path),
            format,
            usage,
            size: Some([size, size]),
        }
    }
}

fn default_entry_point() -> String {
    "raytraceScene".to_string()
}

fn default_focal_length() -> f32 {
    RenderUniforms::DEFAULT_FOCAL_LENGTH
}

fn default_frame_height() -> f32 {
    RenderUniforms::DEFAULT_FRAME_HEIGHT
}

fn default_output() -> PathBuf {
    PathBuf::from("out.png")
}

fn default_usage() -> ResourceUsage {
    ResourceUsage::SHADER_RESOURCE
}

impl RenderJob {
    pub const PRESETS: [&'static str; 2] = ["glints", "glints2016"];

    /// Full HD render of a normal-mapped surface with albedo, normal and
    /// roughness maps.
    pub fn glints() -> Self {
        Self {
            name: "glints".to_string(),
            shader: PathBuf::from("glints.wgsl"),
            entry_point: default_entry_point(),
            include_paths: Vec::new(),
            output_size: [1920, 1080],
            focal_length: default_focal_length(),
            frame_height: default_frame_height(),
            camera: SphericalCamera::default(),
            textures: vec![
                TextureInput::new(
                    "albedo.jpg",
                    TextureFormat::Rgba8UnormSrgb,
                    ResourceUsage::SHADER_RESOURCE,
                    4096,
                ),
                TextureInput::new(
                    "normal.jpg",
                    TextureFormat::Rgba8Unorm,
                    ResourceUsage::SHADER_RESOURCE,
                    4096,
                ),
                TextureInput::new(
                    "roughness.jpg",
                    TextureFormat::R8Unorm,
                    ResourceUsage::SHADER_RESOURCE,
                    4096,
                ),
            ],
            sampler: SamplerDesc::default(),
            output: default_output(),
        }
    }

    /// Square render of a single brick texture.
    pub fn glints2016() -> Self {
        Self {
            name: "glints2016".to_string(),
            shader: PathBuf::from("glints2016.wgsl"),
            output_size: [512, 512],
            textures: vec![TextureInput::new(
                "bricks.jpg",
                TextureFormat::Rgba8Unorm,
                ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
                512,
            )],
            ..Self::glints()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "glints" => Some(Self::glints()),
            "glints2016" => Some(Self::glints2016()),
            _ => None,
        }
    }

    /// Parses a JSON job description.
    pub fn from_json(json: &str) -> Result<Self> {
        let job: Self = serde_json::from_str(json).context("invalid render job JSON")?;
        job.validate()?;
        Ok(job)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize render job")
    }

    pub fn validate(&self) -> Result<()> {
        let [width, height] = self.output_size;
        if width == 0 || height == 0 {
            return Err(anyhow!("output size must be non-zero, got {width}x{height}"));
        }
        if self.entry_point.is_empty() {
            return Err(anyhow!("entry point must not be empty"));
        }
        Ok(())
    }

    /// Resolves relative shader and texture paths against `dir` and adds it
    /// to the shader search paths.
    pub fn rebase(&mut self, dir: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        };
        join(&mut self.shader);
        for texture in &mut self.textures {
            join(&mut texture.path);
        }
        for include in &mut self.include_paths {
            join(include);
        }
        if !self.include_paths.iter().any(|p| p == dir) {
            self.include_paths.insert(0, dir.to_path_buf());
        }
    }

    pub fn width(&self) -> u32 {
        self.output_size[0]
    }

    pub fn height(&self) -> u32 {
        self.output_size[1]
    }
}
