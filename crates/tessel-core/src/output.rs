//! Frame output seam: the image handed to writers, the writer trait and
//! output file naming.

use std::path::{Path, PathBuf};

use crate::result::ResultImage;
use crate::TesselResult;

/// 8-bit RGBA pixels of one finished view, top row first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    /// Metadata text stored next to the pixels when the format allows it.
    pub stamp: Option<String>,
}

impl OutputImage {
    /// Convert a result image. Results are stored bottom row first, so rows
    /// are flipped here.
    pub fn from_result_image(image: &ResultImage) -> Self {
        let width = image.rectx.max(0) as u32;
        let height = image.recty.max(0) as u32;
        let src = image.to_rgba8();
        let stride = width as usize * 4;
        let mut rgba = Vec::with_capacity(src.len());
        if stride > 0 {
            for row in src.chunks_exact(stride).rev() {
                rgba.extend_from_slice(row);
            }
        }
        Self {
            width,
            height,
            rgba,
            stamp: image.stamp.clone(),
        }
    }
}

/// Sink for finished frames. Still writers get one `write` per file, movie
/// writers get `start`, then `append` per frame, then `end`.
pub trait FrameWriter: Send {
    fn is_movie(&self) -> bool;

    fn start(&mut self, _path: &Path, _width: u32, _height: u32) -> TesselResult<()> {
        Ok(())
    }

    fn append(&mut self, _frame: i32, _image: &OutputImage) -> TesselResult<()> {
        Ok(())
    }

    fn write(&mut self, path: &Path, image: &OutputImage) -> TesselResult<()>;

    fn end(&mut self) -> TesselResult<()> {
        Ok(())
    }
}

/// Output path for `frame`: the last run of `#` in `pattern` becomes the
/// zero-padded frame number, otherwise a four digit number is appended.
/// `suffix` is the view suffix, empty for single-view output.
pub fn make_pic_path(pattern: &str, frame: i32, extension: &str, suffix: &str) -> PathBuf {
    let mut name = match pattern.rfind('#') {
        Some(end) => {
            let start = pattern[..=end]
                .rfind(|c: char| c != '#')
                .map(|i| i + 1)
                .unwrap_or(0);
            let width = end + 1 - start;
            format!(
                "{}{:0width$}{}",
                &pattern[..start],
                frame,
                &pattern[end + 1..],
                width = width
            )
        }
        None => format!("{}{:04}", pattern, frame),
    };
    name.push_str(suffix);
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension.trim_start_matches('.'));
    }
    PathBuf::from(name)
}
