use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::camera::{CameraBasis, SphericalCamera};

/// Per-run parameters passed to the ray tracing entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderUniforms {
    pub screen_size: Vec2,
    pub focal_length: f32,
    pub frame_height: f32,
    pub camera: CameraBasis,
}

impl RenderUniforms {
    pub const DEFAULT_FOCAL_LENGTH: f32 = 24.0;
    pub const DEFAULT_FRAME_HEIGHT: f32 = 24.0;

    /// Uniforms for an output of the given size with the default lens and
    /// camera.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen_size: Vec2::new(width as f32, height as f32),
            focal_length: Self::DEFAULT_FOCAL_LENGTH,
            frame_height: Self::DEFAULT_FRAME_HEIGHT,
            camera: SphericalCamera::default().basis(),
        }
    }

    pub fn with_lens(mut self, focal_length: f32, frame_height: f32) -> Self {
        self.focal_length = focal_length;
        self.frame_height = frame_height;
        self
    }

    pub fn with_camera(mut self, camera: CameraBasis) -> Self {
        self.camera = camera;
        self
    }

    /// Packs the uniforms into the layout expected by the shader.
    pub fn to_gpu(&self) -> GpuUniforms {
        GpuUniforms {
            screen_size: self.screen_size.into(),
            focal_length: self.focal_length,
            frame_height: self.frame_height,
            camera_dir: direction4(self.camera.direction),
            camera_up: direction4(self.camera.up),
            camera_right: direction4(self.camera.right),
            camera_position: self.camera.position.extend(1.0).into(),
        }
    }
}

fn direction4(v: Vec3) -> [f32; 4] {
    v.extend(0.0).into()
}

/// WGSL-compatible uniform block.
///
/// ```wgsl
/// struct Uniforms {
///     screen_size: vec2<f32>,
///     focal_length: f32,
///     frame_height: f32,
///     camera_dir: vec4<f32>,
///     camera_up: vec4<f32>,
///     camera_right: vec4<f32>,
///     camera_position: vec4<f32>,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuUniforms {
    pub screen_size: [f32; 2],
    pub focal_length: f32,
    pub frame_height: f32,
    pub camera_dir: [f32; 4],
    pub camera_up: [f32; 4],
    pub camera_right: [f32; 4],
    pub camera_position: [f32; 4],
}
