//! # tessel-encode
//!
//! Frame writers for the Tessel pipeline: still images (PNG with the render
//! stamp, other formats through `image`) and animated PNG movies.

pub mod apng;
pub mod still;

pub use apng::ApngWriter;
pub use still::{write_png, PngWriter};

use tessel_core::{FrameWriter, OutputSettings};

/// Writer matching `output`: an APNG movie when the movie flag is set,
/// otherwise stills.
pub fn writer_for(output: &OutputSettings, fps: u16) -> Box<dyn FrameWriter> {
    if output.movie {
        Box::new(ApngWriter::new(fps))
    } else {
        Box::new(PngWriter::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_for_movie_flag() {
        let mut output = OutputSettings::default();
        assert!(!writer_for(&output, 24).is_movie());
        output.movie = true;
        assert!(writer_for(&output, 24).is_movie());
    }
}
