use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::info;

use glint_render::{DeviceOptions, GpuRenderer, PreparedJob, RenderJob};

const USAGE: &str = "Usage: glint-render [glints|glints2016 | --config <job.json>] \
[--assets <dir>] [--output <file.png>] [--alpha <rad>] [--beta <rad>] [--radius <r>] \
[--dump-config]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    if options.help {
        println!("{USAGE}");
        return Ok(());
    }
    let job = options.build_job()?;

    if options.dump_config {
        println!("{}", job.to_json()?);
        return Ok(());
    }

    let prepared = PreparedJob::prepare(job).context("failed to load render inputs")?;
    let mut renderer = GpuRenderer::new_blocking(DeviceOptions {
        include_paths: prepared.job.include_paths.clone(),
        ..Default::default()
    })
    .context("failed to initialize GPU renderer")?;
    let image = prepared
        .execute(&mut renderer)
        .with_context(|| format!("failed to render {}", prepared.job.name))?;
    glint_render::write_png(&prepared.job.output, &image)
        .with_context(|| format!("failed to save {}", prepared.job.output.display()))?;

    println!(
        "Rendered {} ({}x{}) to {}",
        prepared.job.name,
        image.width(),
        image.height(),
        prepared.job.output.display()
    );
    Ok(())
}

#[derive(Debug, Default)]
struct CliOptions {
    preset: Option<String>,
    config: Option<PathBuf>,
    assets: Option<PathBuf>,
    output: Option<PathBuf>,
    alpha: Option<f32>,
    beta: Option<f32>,
    radius: Option<f32>,
    dump_config: bool,
    help: bool,
}

impl CliOptions {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{name} expects a value\n{USAGE}"))
            };
            match arg.as_str() {
                "--config" => options.config = Some(value("--config")?.into()),
                "--assets" => options.assets = Some(value("--assets")?.into()),
                "--output" => options.output = Some(value("--output")?.into()),
                "--alpha" => options.alpha = Some(parse_f32("--alpha", &value("--alpha")?)?),
                "--beta" => options.beta = Some(parse_f32("--beta", &value("--beta")?)?),
                "--radius" => options.radius = Some(parse_f32("--radius", &value("--radius")?)?),
                "--dump-config" => options.dump_config = true,
                "-h" | "--help" => options.help = true,
                other if other.starts_with('-') => {
                    return Err(anyhow!("Unknown argument: {other}\n{USAGE}"));
                }
                preset => {
                    if options.preset.replace(preset.to_string()).is_some() {
                        return Err(anyhow!("only one preset may be given\n{USAGE}"));
                    }
                }
            }
        }
        if options.preset.is_some() && options.config.is_some() {
            return Err(anyhow!("a preset and --config are mutually exclusive"));
        }
        Ok(options)
    }

    fn build_job(&self) -> Result<RenderJob> {
        let mut job = match (&self.config, &self.preset) {
            (Some(path), _) => RenderJob::from_file(path)?,
            (None, Some(name)) => RenderJob::preset(name).ok_or_else(|| {
                anyhow!(
                    "unknown preset {name}; expected one of {:?}",
                    RenderJob::PRESETS
                )
            })?,
            (None, None) => RenderJob::glints(),
        };

        if let Some(alpha) = self.alpha {
            job.camera.azimuth = alpha;
        }
        if let Some(beta) = self.beta {
            job.camera.polar = beta;
        }
        if let Some(radius) = self.radius {
            job.camera.radius = radius;
        }
        if let Some(output) = &self.output {
            job.output = output.clone();
        }

        let assets = match (&self.assets, &self.config) {
            (Some(dir), _) => Some(dir.clone()),
            (None, Some(config)) => config.parent().map(|dir| dir.to_path_buf()),
            (None, None) => None,
        };
        if let Some(dir) = assets.filter(|dir| !dir.as_os_str().is_empty()) {
            info!("resolving job paths against {}", dir.display());
            job.rebase(&dir);
        }
        job.validate()?;
        Ok(job)
    }
}

fn parse_f32(name: &str, value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .with_context(|| format!("{name} expects a number, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_to_glints_preset() {
        let job = parse(&[]).unwrap().build_job().unwrap();
        assert_eq!(job.name, "glints");
        assert!(job.include_paths.is_empty());
    }

    #[test]
    fn camera_overrides_apply() {
        let job = parse(&["glints2016", "--alpha", "0.5", "--radius", "20"])
            .unwrap()
            .build_job()
            .unwrap();
        assert_eq!(job.camera.azimuth, 0.5);
        assert_eq!(job.camera.radius, 20.0);
        assert_eq!(job.output_size, [512, 512]);
    }

    #[test]
    fn assets_directory_rebases_paths() {
        let job = parse(&["--assets", "scenes/bricks", "glints2016"])
            .unwrap()
            .build_job()
            .unwrap();
        assert_eq!(job.textures[0].path, PathBuf::from("scenes/bricks/bricks.jpg"));
        assert_eq!(job.include_paths, vec![PathBuf::from("scenes/bricks")]);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&["--frobnicate"]).is_err());
        assert!(parse(&["--alpha"]).is_err());
        assert!(parse(&["--beta", "steep"]).is_err());
        assert!(parse(&["glints", "glints2016"]).is_err());
        assert!(parse(&["nope"]).unwrap().build_job().is_err());
    }
}
