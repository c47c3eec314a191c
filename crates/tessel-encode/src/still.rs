use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tessel_core::{FrameWriter, OutputImage, TesselError, TesselResult};

/// PNG text chunk keyword the stamp is stored under.
pub const STAMP_KEYWORD: &str = "Comment";

fn check_size(image: &OutputImage) -> TesselResult<()> {
    let expected = image.width as usize * image.height as usize * 4;
    if image.width == 0 || image.height == 0 || image.rgba.len() != expected {
        return Err(TesselError::Encode(format!(
            "image is {}x{} with {} bytes, expected {}",
            image.width,
            image.height,
            image.rgba.len(),
            expected
        )));
    }
    Ok(())
}

/// Write an 8-bit RGBA PNG, with the stamp as a `Comment` text chunk.
pub fn write_png(path: &Path, image: &OutputImage) -> TesselResult<()> {
    check_size(image)?;
    let file = File::create(path)
        .map_err(|e| TesselError::Encode(format!("failed to create {}: {}", path.display(), e)))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), image.width, image.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    if let Some(stamp) = &image.stamp {
        encoder
            .add_text_chunk(STAMP_KEYWORD.to_string(), stamp.clone())
            .map_err(|e| TesselError::Encode(format!("failed to add stamp: {}", e)))?;
    }

    let mut writer = encoder
        .write_header()
        .map_err(|e| TesselError::Encode(format!("failed to write PNG header: {}", e)))?;
    writer
        .write_image_data(&image.rgba)
        .map_err(|e| TesselError::Encode(format!("failed to write PNG data: {}", e)))?;
    writer
        .finish()
        .map_err(|e| TesselError::Encode(format!("failed to finalize PNG: {}", e)))?;
    Ok(())
}

/// Write through the `image` crate, picking the format from the extension.
/// Formats without alpha get the RGB channels only.
pub fn write_with_image(path: &Path, image: &OutputImage) -> TesselResult<()> {
    check_size(image)?;
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.rgba.clone())
        .ok_or_else(|| TesselError::Encode("pixel buffer does not match image size".into()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let saved = match extension.as_str() {
        "jpg" | "jpeg" | "bmp" | "ppm" => image::DynamicImage::ImageRgba8(buffer).to_rgb8().save(path),
        _ => buffer.save(path),
    };
    saved.map_err(|e| TesselError::Encode(format!("failed to save {}: {}", path.display(), e)))
}

/// Still image writer. `.png` files are written with the stamp attached,
/// every other extension goes through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngWriter;

impl PngWriter {
    pub fn new() -> Self {
        Self
    }
}

impl FrameWriter for PngWriter {
    fn is_movie(&self) -> bool {
        false
    }

    fn write(&mut self, path: &Path, image: &OutputImage) -> TesselResult<()> {
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(true, |e| e.eq_ignore_ascii_case("png"));
        if is_png {
            write_png(path, image)
        } else {
            write_with_image(path, image)
        }
    }
}
