use std::path::{Path, PathBuf};
use std::time::Instant;

use bytemuck::bytes_of;
use futures_intrusive::channel::shared::oneshot_channel;
use image::RgbaImage;
use log::{debug, info};
use pollster::block_on;
use wgpu::util::DeviceExt;

use super::shader::{ShaderLibrary, ShaderModuleSource};
use super::{
    AddressMode, DispatchCall, FilterMode, Renderer, ResourceUsage, SamplerDesc, SamplerHandle,
    TextureDesc, TextureFormat, TextureHandle,
};
use crate::error::{Error, Result};

/// Settings used when creating the GPU device.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Directories searched for shader files and their includes.
    pub include_paths: Vec<PathBuf>,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// Headless wgpu renderer running a single compute entry point.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: ShaderLibrary,
    module: Option<LoadedModule>,
    textures: Vec<GpuTexture>,
    samplers: Vec<wgpu::Sampler>,
}

struct LoadedModule {
    source: ShaderModuleSource,
    module: wgpu::ShaderModule,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

impl GpuRenderer {
    /// Acquires an adapter and device without any presentation surface.
    pub async fn new(options: DeviceOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .map_err(|err| Error::device(format!("failed to acquire GPU adapter: {err}")))?;
        let adapter_info = adapter.get_info();
        info!(
            "using adapter {} ({:?}, {:?})",
            adapter_info.name, adapter_info.device_type, adapter_info.backend
        );

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("glint-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .await
            .map_err(|err| Error::device(format!("failed to create GPU device: {err}")))?;

        Ok(Self {
            device,
            queue,
            shaders: ShaderLibrary::new(options.include_paths),
            module: None,
            textures: Vec::new(),
            samplers: Vec::new(),
        })
    }

    /// Blocking variant of [`GpuRenderer::new`].
    pub fn new_blocking(options: DeviceOptions) -> Result<Self> {
        block_on(Self::new(options))
    }

    fn texture(&self, handle: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(handle.0)
            .ok_or_else(|| Error::device(format!("unknown texture handle {}", handle.0)))
    }

    fn sampler(&self, handle: SamplerHandle) -> Result<&wgpu::Sampler> {
        self.samplers
            .get(handle.0)
            .ok_or_else(|| Error::device(format!("unknown sampler handle {}", handle.0)))
    }

    /// Runs `create` inside a validation error scope so wgpu failures come
    /// back as errors instead of reaching the uncaptured-error handler.
    fn with_validation<T>(&self, what: &str, create: impl FnOnce() -> Result<T>) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = create();
        match block_on(self.device.pop_error_scope()) {
            Some(err) => Err(Error::device(format!("{what} failed validation: {err}"))),
            None => result,
        }
    }

    fn push_texture(&mut self, texture: wgpu::Texture, desc: &TextureDesc) -> TextureHandle {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.push(GpuTexture {
            texture,
            view,
            desc: desc.clone(),
        });
        TextureHandle(self.textures.len() - 1)
    }
}

impl Renderer for GpuRenderer {
    fn load_module(&mut self, path: &Path, entry_point: &str) -> Result<()> {
        let source = self.shaders.load(path, entry_point)?;
        source.check_workgroup(&self.device.limits())?;
        let label = source.path.display().to_string();
        let module = self.with_validation(&label, || {
            Ok(self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&label),
                    source: wgpu::ShaderSource::Wgsl(source.source.as_str().into()),
                }))
        })?;
        info!("loaded shader module {label} (entry point {entry_point})");
        self.module = Some(LoadedModule { source, module });
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<TextureHandle> {
        validate_texture(desc, self.device.features(), &self.device.limits())?;
        if data.len() != desc.byte_len() {
            return Err(Error::format(format!(
                "{} needs {} bytes of {:?} data, got {}",
                desc.label,
                desc.byte_len(),
                desc.format,
                data.len()
            )));
        }
        let texture = self.with_validation(&desc.label, || {
            Ok(self.device.create_texture_with_data(
                &self.queue,
                &wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: extent(desc.width, desc.height),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu_format(desc.format),
                    usage: wgpu_usage(desc.usage) | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                data,
            ))
        })?;
        debug!(
            "uploaded {} ({}x{} {:?})",
            desc.label, desc.width, desc.height, desc.format
        );
        Ok(self.push_texture(texture, desc))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let filter = match desc.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address_mode = match desc.address_mode {
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("glint-sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            ..Default::default()
        });
        self.samplers.push(sampler);
        Ok(SamplerHandle(self.samplers.len() - 1))
    }

    fn create_surface(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        validate_surface(desc)?;
        validate_texture(desc, self.device.features(), &self.device.limits())?;
        let texture = self.with_validation(&desc.label, || {
            Ok(self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: extent(desc.width, desc.height),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu_format(desc.format),
                usage: wgpu_usage(desc.usage) | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            }))
        })?;
        Ok(self.push_texture(texture, desc))
    }

    fn dispatch(&mut self, call: &DispatchCall<'_>) -> Result<()> {
        self.with_validation("dispatch", || self.encode_dispatch(call))
    }

    fn read_surface(&mut self, surface: TextureHandle) -> Result<RgbaImage> {
        let surface = self.texture(surface)?;
        check_readback(
            &surface.desc.label,
            surface.texture.format(),
            surface.texture.usage(),
        )?;
        self.with_validation("readback", || self.copy_surface(surface))
    }
}

impl GpuRenderer {
    fn encode_dispatch(&self, call: &DispatchCall<'_>) -> Result<()> {
        let loaded = self
            .module
            .as_ref()
            .ok_or_else(|| Error::device("dispatch without a loaded shader module"))?;
        loaded.source.check_bindings(&call.binding_layout())?;

        let output = self.texture(call.output)?;
        let mut layout_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        let mut views = Vec::with_capacity(call.textures.len());
        for handle in call.textures {
            let texture = self.texture(*handle)?;
            if !texture.desc.usage.shader_resource {
                return Err(Error::device(format!(
                    "{} is bound for sampling but lacks shader resource usage",
                    texture.desc.label
                )));
            }
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: layout_entries.len() as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            views.push(&texture.view);
        }
        let mut samplers = Vec::with_capacity(call.samplers.len());
        for handle in call.samplers {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: layout_entries.len() as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
            samplers.push(self.sampler(*handle)?);
        }
        let output_binding = layout_entries.len() as u32;
        layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding: output_binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("dispatch-bind-layout"),
                entries: &layout_entries,
            });

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("dispatch-uniforms"),
                contents: bytes_of(&call.uniforms.to_gpu()),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for view in views {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for sampler in samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: output_binding,
            resource: wgpu::BindingResource::TextureView(&output.view),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("dispatch-bind-group"),
            layout: &layout,
            entries: &entries,
        });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("dispatch-pipeline-layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("dispatch-pipeline"),
                layout: Some(&pipeline_layout),
                module: &loaded.module,
                entry_point: Some(loaded.source.entry_point.as_str()),
                compilation_options: Default::default(),
                cache: None,
            });

        let (groups_x, groups_y) = loaded
            .source
            .workgroups_for(output.desc.width, output.desc.height);
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        if groups_x > max_groups || groups_y > max_groups {
            return Err(Error::device(format!(
                "{groups_x}x{groups_y} workgroups exceed the per-dimension limit of {max_groups}"
            )));
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dispatch-encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("dispatch-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        let started = Instant::now();
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| Error::device(format!("dispatch did not complete: {err}")))?;
        info!(
            "dispatched {} over {groups_x}x{groups_y} workgroups in {:.2?}",
            loaded.source.entry_point,
            started.elapsed()
        );
        Ok(())
    }

    fn copy_surface(&self, surface: &GpuTexture) -> Result<RgbaImage> {
        let (width, height) = (surface.desc.width, surface.desc.height);
        let tight_bpr = width as usize * 4;
        let padded_bpr = align_bytes_per_row(tight_bpr);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-staging"),
            size: (padded_bpr * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr as u32),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| Error::device(format!("readback did not complete: {err}")))?;
        block_on(receiver.receive())
            .ok_or_else(|| Error::device("readback callback was dropped"))?
            .map_err(|err| Error::device(format!("failed to map readback buffer: {err}")))?;

        let padded = slice.get_mapped_range();
        let tight = depad_rows(&padded, tight_bpr, padded_bpr, height as usize);
        drop(padded);
        staging.unmap();

        RgbaImage::from_raw(width, height, tight)
            .ok_or_else(|| Error::format("readback produced a short buffer"))
    }
}

/// Checks a texture's size and usage against what the device guarantees.
fn validate_texture(
    desc: &TextureDesc,
    features: wgpu::Features,
    limits: &wgpu::Limits,
) -> Result<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(Error::format(format!("{} has zero area", desc.label)));
    }
    let max = limits.max_texture_dimension_2d;
    if desc.width > max || desc.height > max {
        return Err(Error::device(format!(
            "{} is {}x{}, larger than the device limit of {max}",
            desc.label, desc.width, desc.height
        )));
    }
    let allowed = wgpu_format(desc.format)
        .guaranteed_format_features(features)
        .allowed_usages;
    let wanted = wgpu_usage(desc.usage);
    if !allowed.contains(wanted) {
        return Err(Error::device(format!(
            "{} ({:?}) does not support usage {wanted:?}",
            desc.label, desc.format
        )));
    }
    Ok(())
}

fn validate_surface(desc: &TextureDesc) -> Result<()> {
    if desc.format != TextureFormat::Rgba8Unorm {
        return Err(Error::format(format!(
            "output surface must be rgba8_unorm, got {:?}",
            desc.format
        )));
    }
    if !desc.usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        return Err(Error::device("output surface needs unordered access"));
    }
    Ok(())
}

/// Only surfaces created for readback can be copied out as RGBA8.
fn check_readback(
    label: &str,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> Result<()> {
    let readable = usage.contains(wgpu::TextureUsages::COPY_SRC);
    if format != wgpu::TextureFormat::Rgba8Unorm || !readable {
        return Err(Error::device(format!(
            "{label} is not an output surface and cannot be read back"
        )));
    }
    Ok(())
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
    }
}

fn wgpu_usage(usage: ResourceUsage) -> wgpu::TextureUsages {
    let mut flags = wgpu::TextureUsages::empty();
    if usage.shader_resource {
        flags |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.unordered_access {
        flags |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    flags
}

/// Rounds a row size up to wgpu's copy alignment (256 bytes).
fn align_bytes_per_row(bytes: usize) -> usize {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    bytes.div_ceil(align) * align
}

fn depad_rows(padded: &[u8], tight_bpr: usize, padded_bpr: usize, rows: usize) -> Vec<u8> {
    let mut tight = Vec::with_capacity(tight_bpr * rows);
    for row in padded.chunks(padded_bpr).take(rows) {
        tight.extend_from_slice(&row[..tight_bpr]);
    }
    tight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_to_copy_alignment() {
        assert_eq!(align_bytes_per_row(4), 256);
        assert_eq!(align_bytes_per_row(512 * 4), 2048);
        assert_eq!(align_bytes_per_row(1920 * 4), 7680);
        assert_eq!(align_bytes_per_row(65 * 4), 512);
    }

    #[test]
    fn depad_drops_row_padding() {
        let mut padded = vec![0u8; 2 * 256];
        padded[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        padded[256..264].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let tight = depad_rows(&padded, 8, 256, 2);
        assert_eq!(tight, (1..=16).collect::<Vec<u8>>());
    }

    fn desc(format: TextureFormat, usage: ResourceUsage, size: u32) -> TextureDesc {
        TextureDesc {
            label: "texture".to_string(),
            width: size,
            height: size,
            format,
            usage,
        }
    }

    fn validate(desc: &TextureDesc) -> Result<()> {
        validate_texture(desc, wgpu::Features::empty(), &wgpu::Limits::default())
    }

    #[test]
    fn texture_usage_follows_guaranteed_format_features() {
        let rw = ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS;
        let sampled = ResourceUsage::SHADER_RESOURCE;

        assert!(validate(&desc(TextureFormat::Rgba8Unorm, rw, 512)).is_ok());
        assert!(validate(&desc(TextureFormat::R8Unorm, sampled, 4096)).is_ok());

        let err = validate(&desc(TextureFormat::R8Unorm, rw, 16)).unwrap_err();
        assert!(matches!(err, Error::Device(_)), "{err}");
        let err = validate(&desc(TextureFormat::Rgba8UnormSrgb, rw, 16)).unwrap_err();
        assert!(matches!(err, Error::Device(_)), "{err}");
    }

    #[test]
    fn texture_size_is_bounded() {
        let sampled = ResourceUsage::SHADER_RESOURCE;
        let err = validate(&desc(TextureFormat::Rgba8Unorm, sampled, 0)).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");

        let oversized = wgpu::Limits::default().max_texture_dimension_2d + 1;
        let err = validate(&desc(TextureFormat::Rgba8Unorm, sampled, oversized)).unwrap_err();
        assert!(err.to_string().contains("device limit"), "{err}");
    }

    #[test]
    fn surface_must_be_writable_rgba8() {
        let rw = ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS;
        assert!(validate_surface(&desc(TextureFormat::Rgba8Unorm, rw, 8)).is_ok());
        assert!(matches!(
            validate_surface(&desc(TextureFormat::Rgba8UnormSrgb, rw, 8)),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            validate_surface(&desc(TextureFormat::Rgba8Unorm, ResourceUsage::SHADER_RESOURCE, 8)),
            Err(Error::Device(_))
        ));
    }

    #[test]
    fn only_output_surfaces_are_read_back() {
        let surface = wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC;
        assert!(check_readback("output", wgpu::TextureFormat::Rgba8Unorm, surface).is_ok());

        let input = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_DST;
        assert!(check_readback("bricks", wgpu::TextureFormat::Rgba8Unorm, input).is_err());
        assert!(check_readback("roughness", wgpu::TextureFormat::R8Unorm, surface).is_err());
        assert!(check_readback("albedo", wgpu::TextureFormat::Rgba8UnormSrgb, surface).is_err());
    }

    #[test]
    fn usage_maps_to_wgpu_flags() {
        let usage = ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS;
        assert_eq!(
            wgpu_usage(usage),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING
        );
        assert_eq!(
            wgpu_usage(ResourceUsage::default()),
            wgpu::TextureUsages::empty()
        );
    }
}
