//! PNG serialization of rendered frames.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use log::info;

use crate::error::{Error, Result};

/// Writes an 8-bit RGBA image as a lossless PNG.
///
/// The image is encoded in memory first, so encoder failures never touch
/// the file system. A failed write removes the partial file.
pub fn write_png(path: &Path, image: &RgbaImage) -> Result<()> {
    let mut encoded = Vec::new();
    PngEncoder::new(&mut encoded)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|err| Error::from_image(path, err))?;

    if let Err(err) = write_file(path, &encoded) {
        if fs::metadata(path).is_ok_and(|meta| meta.is_file()) {
            let _ = fs::remove_file(path);
        }
        return Err(Error::io(path, err));
    }
    info!(
        "wrote {}x{} image to {}",
        image.width(),
        image.height(),
        path.display()
    );
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()
}

/// Reads a PNG back as 8-bit RGBA.
pub fn read_png(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path).map_err(|err| Error::from_image(path, err))?;
    Ok(image.into_rgba8())
}
