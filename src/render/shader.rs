use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::BindingKind;
use crate::error::{Error, Result};

/// Locates WGSL sources and inlines their `#include` directives.
///
/// WGSL has no preprocessor, so a line of the form `#include "file.wgsl"`
/// is replaced by the referenced file. Includes are looked up next to the
/// including file first and then in each search path. Every file is
/// inlined at most once.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    include_paths: Vec<PathBuf>,
}

impl ShaderLibrary {
    pub fn new(include_paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            include_paths: include_paths.into_iter().collect(),
        }
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Finds `path` as given or below one of the search paths.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        self.resolve_from(None, path)
    }

    /// Reads `path`, expands its includes and validates the result.
    pub fn load(&self, path: &Path, entry_point: &str) -> Result<ShaderModuleSource> {
        let resolved = self.resolve(path)?;
        let mut seen = HashSet::new();
        let mut source = String::new();
        self.expand(&resolved, &mut seen, &mut source)?;
        debug!(
            "assembled {} ({} bytes, {} file(s))",
            resolved.display(),
            source.len(),
            seen.len()
        );
        ShaderModuleSource::parse(resolved, source, entry_point)
    }

    fn resolve_from(&self, base: Option<&Path>, path: &Path) -> Result<PathBuf> {
        let candidates = base
            .map(|dir| dir.join(path))
            .into_iter()
            .chain(std::iter::once(path.to_path_buf()))
            .chain(self.include_paths.iter().map(|dir| dir.join(path)));
        for candidate in candidates {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(Error::device(format!(
            "shader {} not found (search paths: {:?})",
            path.display(),
            self.include_paths
        )))
    }

    fn expand(&self, path: &Path, seen: &mut HashSet<PathBuf>, out: &mut String) -> Result<()> {
        let key = fs::canonicalize(path).map_err(|err| Error::io(path, err))?;
        if !seen.insert(key) {
            return Ok(());
        }
        let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let dir = path.parent();
        for line in text.lines() {
            match parse_include(line) {
                Some(target) => {
                    let included = self.resolve_from(dir, Path::new(target))?;
                    self.expand(&included, seen, out)?;
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }
}

fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    rest.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')))
}

/// A group 0 resource declared by a shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    pub binding: u32,
    pub kind: BindingKind,
}

/// A validated WGSL module with the facts needed to dispatch it.
#[derive(Debug, Clone)]
pub struct ShaderModuleSource {
    pub path: PathBuf,
    pub source: String,
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    /// Group 0 resources declared by the module, sorted by binding.
    pub bindings: Vec<ShaderBinding>,
}

impl ShaderModuleSource {
    /// Parses and validates `source`, requiring a compute entry point.
    ///
    /// Validation runs without optional capabilities, matching a device
    /// created with no extra features.
    pub fn parse(path: PathBuf, source: String, entry_point: &str) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(&source).map_err(|err| {
            Error::device(format!(
                "failed to parse {}:\n{}",
                path.display(),
                err.emit_to_string(&source)
            ))
        })?;
        Validator::new(ValidationFlags::all(), Capabilities::empty())
            .validate(&module)
            .map_err(|err| Error::device(format!("{} failed validation: {err}", path.display())))?;

        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| {
                Error::device(format!(
                    "{} has no compute entry point named {entry_point}",
                    path.display()
                ))
            })?;
        let workgroup_size = entry.workgroup_size;

        let mut bindings = Vec::new();
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            if binding.group != 0 {
                return Err(Error::device(format!(
                    "{} binds group {}; only group 0 is supported",
                    path.display(),
                    binding.group
                )));
            }
            let kind = binding_kind(&module, var).ok_or_else(|| {
                Error::device(format!(
                    "{} binding {} ({}) has an unsupported resource type",
                    path.display(),
                    binding.binding,
                    var.name.as_deref().unwrap_or("unnamed")
                ))
            })?;
            bindings.push(ShaderBinding {
                binding: binding.binding,
                kind,
            });
        }
        bindings.sort_unstable_by_key(|b| b.binding);

        Ok(Self {
            path,
            source,
            entry_point: entry_point.to_string(),
            workgroup_size,
            bindings,
        })
    }

    /// Checks every declared binding against the resources a dispatch
    /// supplies, indexed by binding number.
    pub fn check_bindings(&self, layout: &[BindingKind]) -> Result<()> {
        for declared in &self.bindings {
            match layout.get(declared.binding as usize) {
                None => {
                    return Err(Error::device(format!(
                        "{} declares binding {} but the dispatch provides only {}",
                        self.path.display(),
                        declared.binding,
                        layout.len()
                    )));
                }
                Some(&provided) if provided != declared.kind => {
                    return Err(Error::device(format!(
                        "{} declares binding {} as {:?} but the dispatch binds {:?}",
                        self.path.display(),
                        declared.binding,
                        declared.kind,
                        provided
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Checks the entry point's workgroup size against device limits.
    pub fn check_workgroup(&self, limits: &wgpu::Limits) -> Result<()> {
        let [x, y, z] = self.workgroup_size;
        let invocations = u64::from(x) * u64::from(y) * u64::from(z);
        if x > limits.max_compute_workgroup_size_x
            || y > limits.max_compute_workgroup_size_y
            || z > limits.max_compute_workgroup_size_z
            || invocations > u64::from(limits.max_compute_invocations_per_workgroup)
        {
            return Err(Error::device(format!(
                "{} workgroup size {x}x{y}x{z} exceeds the device limits \
                 ({}x{}x{}, {} invocations)",
                self.path.display(),
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
                limits.max_compute_invocations_per_workgroup
            )));
        }
        Ok(())
    }

    /// Workgroup counts covering a `width × height` output.
    pub fn workgroups_for(&self, width: u32, height: u32) -> (u32, u32) {
        let [x, y, _] = self.workgroup_size;
        (width.div_ceil(x.max(1)), height.div_ceil(y.max(1)))
    }
}

/// Maps a bound global onto the resource kinds a dispatch can provide.
fn binding_kind(module: &naga::Module, var: &naga::GlobalVariable) -> Option<BindingKind> {
    match var.space {
        naga::AddressSpace::Uniform => return Some(BindingKind::Uniform),
        naga::AddressSpace::Handle => {}
        _ => return None,
    }
    match module.types[var.ty].inner {
        naga::TypeInner::Sampler { comparison: false } => Some(BindingKind::Sampler),
        naga::TypeInner::Image {
            dim: naga::ImageDimension::D2,
            arrayed: false,
            class,
        } => match class {
            naga::ImageClass::Sampled {
                kind: naga::ScalarKind::Float,
                multi: false,
            } => Some(BindingKind::SampledTexture),
            naga::ImageClass::Storage {
                format: naga::StorageFormat::Rgba8Unorm,
                access,
            } if access == naga::StorageAccess::STORE => Some(BindingKind::StorageTexture),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = r#"
#include "common.wgsl"

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var albedo: texture_2d<f32>;
@group(0) @binding(2) var albedo_sampler: sampler;
@group(0) @binding(3) var output: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8, 1)
fn raytraceScene(@builtin(global_invocation_id) id: vec3<u32>) {
    let uv = vec2<f32>(id.xy) / uniforms.screen_size;
    let color = textureSampleLevel(albedo, albedo_sampler, uv, 0.0);
    textureStore(output, vec2<i32>(id.xy), shade(color));
}
"#;

    const COMMON: &str = r#"
#include "common.wgsl"

struct Uniforms {
    screen_size: vec2<f32>,
    focal_length: f32,
    frame_height: f32,
    camera_dir: vec4<f32>,
    camera_up: vec4<f32>,
    camera_right: vec4<f32>,
    camera_position: vec4<f32>,
}

fn shade(color: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(color.rgb, 1.0);
}
"#;

    fn write_sources(dir: &Path) {
        fs::write(dir.join("kernel.wgsl"), KERNEL).unwrap();
        let lib = dir.join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("common.wgsl"), COMMON).unwrap();
    }

    #[test]
    fn expands_includes_from_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let library = ShaderLibrary::new([dir.path().to_path_buf(), dir.path().join("lib")]);

        let module = library
            .load(Path::new("kernel.wgsl"), "raytraceScene")
            .unwrap();
        assert!(!module.source.contains("#include"));
        assert_eq!(module.source.matches("struct Uniforms").count(), 1);
        let kinds: Vec<_> = module.bindings.iter().map(|b| (b.binding, b.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, BindingKind::Uniform),
                (1, BindingKind::SampledTexture),
                (2, BindingKind::Sampler),
                (3, BindingKind::StorageTexture),
            ]
        );
        assert_eq!(module.workgroup_size, [8, 8, 1]);
        assert_eq!(module.workgroups_for(1920, 1080), (240, 135));
        assert_eq!(module.workgroups_for(513, 1), (65, 1));
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let library = ShaderLibrary::new([dir.path().to_path_buf(), dir.path().join("lib")]);

        let err = library
            .load(Path::new("kernel.wgsl"), "main")
            .unwrap_err();
        assert!(matches!(err, Error::Device(_)), "{err}");
    }

    #[test]
    fn unresolved_include_is_a_device_error() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let library = ShaderLibrary::new([dir.path().to_path_buf()]);

        let err = library
            .load(Path::new("kernel.wgsl"), "raytraceScene")
            .unwrap_err();
        assert!(err.to_string().contains("common.wgsl"), "{err}");
    }

    #[test]
    fn invalid_wgsl_is_reported() {
        let err = ShaderModuleSource::parse(
            PathBuf::from("broken.wgsl"),
            "fn oops( {".to_string(),
            "raytraceScene",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn undersized_dispatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let library = ShaderLibrary::new([dir.path().join("lib"), dir.path().to_path_buf()]);
        let module = library
            .load(Path::new("kernel.wgsl"), "raytraceScene")
            .unwrap();

        let layout = [
            BindingKind::Uniform,
            BindingKind::SampledTexture,
            BindingKind::Sampler,
            BindingKind::StorageTexture,
        ];
        assert!(module.check_bindings(&layout).is_ok());
        assert!(module.check_bindings(&layout[..3]).is_err());
    }

    const SWAPPED: &str = r#"
@group(0) @binding(0) var<uniform> size: vec4<f32>;
@group(0) @binding(1) var output: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var albedo_sampler: sampler;
@group(0) @binding(3) var albedo: texture_2d<f32>;

@compute @workgroup_size(32, 32, 1)
fn raytraceScene(@builtin(global_invocation_id) id: vec3<u32>) {
    let color = textureSampleLevel(albedo, albedo_sampler, vec2<f32>(0.5), 0.0);
    textureStore(output, vec2<i32>(id.xy), color * size.x);
}
"#;

    #[test]
    fn mismatched_binding_types_are_rejected() {
        let module = ShaderModuleSource::parse(
            PathBuf::from("swapped.wgsl"),
            SWAPPED.to_string(),
            "raytraceScene",
        )
        .unwrap();
        let layout = [
            BindingKind::Uniform,
            BindingKind::SampledTexture,
            BindingKind::Sampler,
            BindingKind::StorageTexture,
        ];
        let err = module.check_bindings(&layout).unwrap_err();
        assert!(matches!(err, Error::Device(_)), "{err}");
        assert!(err.to_string().contains("binding 1"), "{err}");
    }

    #[test]
    fn oversized_workgroup_is_rejected() {
        let module = ShaderModuleSource::parse(
            PathBuf::from("swapped.wgsl"),
            SWAPPED.to_string(),
            "raytraceScene",
        )
        .unwrap();
        assert_eq!(module.workgroup_size, [32, 32, 1]);
        let err = module.check_workgroup(&wgpu::Limits::default()).unwrap_err();
        assert!(matches!(err, Error::Device(_)), "{err}");

        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path());
        let library = ShaderLibrary::new([dir.path().join("lib")]);
        let kernel = library
            .load(&dir.path().join("kernel.wgsl"), "raytraceScene")
            .unwrap();
        assert!(kernel.check_workgroup(&wgpu::Limits::default()).is_ok());
    }

    #[test]
    fn unsupported_resource_types_are_rejected() {
        let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(8, 8, 1)
fn raytraceScene(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = id.y;
}
"#;
        let err = ShaderModuleSource::parse(
            PathBuf::from("buffer.wgsl"),
            source.to_string(),
            "raytraceScene",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported resource type"), "{err}");
    }

    #[test]
    fn include_syntax() {
        assert_eq!(parse_include("#include \"a.wgsl\""), Some("a.wgsl"));
        assert_eq!(parse_include("  #include <b.wgsl>"), Some("b.wgsl"));
        assert_eq!(parse_include("// #include \"c.wgsl\""), None);
        assert_eq!(parse_include("let x = 1;"), None);
    }
}
