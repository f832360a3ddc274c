use std::path::PathBuf;

use image::RgbaImage;
use log::info;

use crate::error::Result;
use crate::job::{RenderJob, TextureInput};
use crate::output::write_png;
use crate::pixels::{load_texture_image, PixelBuffer};
use crate::render::{
    DispatchCall, Renderer, ResourceUsage, TextureDesc, TextureFormat, TextureHandle,
};
use crate::uniforms::RenderUniforms;

/// CPU-side state of a job: uniforms and decoded texture images.
///
/// Preparing needs no GPU, so input problems surface before a device is
/// requested.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub job: RenderJob,
    pub uniforms: RenderUniforms,
    pub textures: Vec<(TextureInput, PixelBuffer)>,
}

impl PreparedJob {
    pub fn prepare(job: RenderJob) -> Result<Self> {
        let camera = job.camera.basis();
        let uniforms = RenderUniforms::new(job.width(), job.height())
            .with_lens(job.focal_length, job.frame_height)
            .with_camera(camera);
        info!(
            "{}: camera at ({:.3}, {:.3}, {:.3})",
            job.name, camera.position.x, camera.position.y, camera.position.z
        );

        let mut textures = Vec::with_capacity(job.textures.len());
        for input in &job.textures {
            let declared = input.size.map(|[w, h]| (w, h));
            let pixels = load_texture_image(&input.path, declared)?;
            info!(
                "loaded {} ({}x{}, {} channel(s))",
                input.path.display(),
                pixels.width(),
                pixels.height(),
                pixels.channels()
            );
            textures.push((input.clone(), pixels));
        }

        Ok(Self {
            job,
            uniforms,
            textures,
        })
    }

    /// Uploads the inputs, dispatches the entry point once and reads the
    /// output surface back.
    pub fn execute<R: Renderer + ?Sized>(&self, renderer: &mut R) -> Result<RgbaImage> {
        renderer.load_module(&self.job.shader, &self.job.entry_point)?;

        let mut handles: Vec<TextureHandle> = Vec::with_capacity(self.textures.len());
        for (input, pixels) in &self.textures {
            let desc = TextureDesc {
                label: texture_label(&input.path),
                width: pixels.width(),
                height: pixels.height(),
                format: input.format,
                usage: input.usage,
            };
            let data = pixels.texture_bytes(input.format)?;
            handles.push(renderer.create_texture(&desc, &data)?);
        }
        let sampler = renderer.create_sampler(&self.job.sampler)?;
        let output = renderer.create_surface(&TextureDesc {
            label: "output".to_string(),
            width: self.job.width(),
            height: self.job.height(),
            format: TextureFormat::Rgba8Unorm,
            usage: ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
        })?;

        renderer.dispatch(&DispatchCall {
            uniforms: &self.uniforms,
            textures: &handles,
            samplers: &[sampler],
            output,
        })?;
        renderer.read_surface(output)
    }
}

fn texture_label(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs a job end to end and writes the frame to `job.output`.
pub fn render_to_file<R: Renderer + ?Sized>(renderer: &mut R, job: RenderJob) -> Result<PathBuf> {
    let prepared = PreparedJob::prepare(job)?;
    let image = prepared.execute(renderer)?;
    write_png(&prepared.job.output, &image)?;
    Ok(prepared.job.output)
}
