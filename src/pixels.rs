use std::borrow::Cow;
use std::path::Path;

use image::{DynamicImage, ImageReader};
use log::debug;

use crate::error::{Error, Result};
use crate::render::TextureFormat;

/// Interleaved 8-bit image samples laid out as `height × width × channels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps raw samples, checking that their length matches the shape.
    pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
        if channels == 0 {
            return Err(Error::format("pixel buffers need at least one channel"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(channels))
            .ok_or_else(|| Error::format("image dimensions overflow"))?;
        if data.len() != expected {
            return Err(Error::format(format!(
                "{width}x{height}x{channels} buffer needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Converts a decoded image to 8-bit samples, keeping its channel count.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let color = image.color();
        let (channels, data) = match color.channel_count() {
            1 => (1, image.into_luma8().into_raw()),
            2 => (2, image.into_luma_alpha8().into_raw()),
            3 => (3, image.into_rgb8().into_raw()),
            _ => (4, image.into_rgba8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// `(height, width, channels)`, outermost dimension first.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, self.channels)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Packs the samples for upload into a texture of `format`.
    ///
    /// RGBA formats take the buffer as-is and need four channels. `r8_unorm`
    /// takes a single-channel buffer directly or the red channel of anything
    /// wider.
    pub fn texture_bytes(&self, format: TextureFormat) -> Result<Cow<'_, [u8]>> {
        match format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
                if self.channels != 4 {
                    return Err(Error::format(format!(
                        "{format:?} textures need 4 channels, image has {}",
                        self.channels
                    )));
                }
                Ok(Cow::Borrowed(&self.data))
            }
            TextureFormat::R8Unorm if self.channels == 1 => Ok(Cow::Borrowed(&self.data)),
            TextureFormat::R8Unorm => Ok(Cow::Owned(
                self.data.chunks_exact(self.channels).map(|px| px[0]).collect(),
            )),
        }
    }
}

/// Decodes an image file into 8-bit samples.
pub fn load_image(path: &Path) -> Result<PixelBuffer> {
    let image = ImageReader::open(path)
        .map_err(|err| Error::io(path, err))?
        .with_guessed_format()
        .map_err(|err| Error::io(path, err))?
        .decode()
        .map_err(|err| Error::from_image(path, err))?;
    let pixels = PixelBuffer::from_dynamic(image);
    debug!("decoded {} with shape {:?}", path.display(), pixels.shape());
    Ok(pixels)
}

/// Expands three-channel images with an opaque alpha channel.
///
/// Every other channel count is returned untouched. The fill is sized from
/// the buffer itself.
pub fn normalize_image(pixels: PixelBuffer) -> PixelBuffer {
    if pixels.channels != 3 {
        return pixels;
    }
    let mut data = Vec::with_capacity(pixels.data.len() / 3 * 4);
    for rgb in pixels.data.chunks_exact(3) {
        data.extend_from_slice(rgb);
        data.push(u8::MAX);
    }
    PixelBuffer {
        channels: 4,
        data,
        ..pixels
    }
}

/// Loads, size-checks and normalizes one texture image.
///
/// `declared_size` is an optional `(width, height)` the caller expects; a
/// decoded image of any other size is rejected.
pub fn load_texture_image(path: &Path, declared_size: Option<(u32, u32)>) -> Result<PixelBuffer> {
    let pixels = load_image(path)?;
    if let Some((width, height)) = declared_size {
        if (pixels.width, pixels.height) != (width, height) {
            return Err(Error::format(format!(
                "{} is {}x{}, expected {width}x{height}",
                path.display(),
                pixels.width,
                pixels.height
            )));
        }
    }
    Ok(normalize_image(pixels))
}
