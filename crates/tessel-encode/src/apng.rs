use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tessel_core::{FrameWriter, OutputImage, TesselError, TesselResult};

/// Animated PNG movie writer. Frames are kept in memory and encoded when
/// the animation ends, since the frame count goes into the header.
pub struct ApngWriter {
    fps: u16,
    loop_count: u32,
    path: Option<PathBuf>,
    width: u32,
    height: u32,
    frames: Vec<Vec<u8>>,
}

impl ApngWriter {
    pub fn new(fps: u16) -> Self {
        Self {
            fps: fps.max(1),
            loop_count: 0,
            path: None,
            width: 0,
            height: 0,
            frames: Vec::new(),
        }
    }

    /// Number of plays, 0 loops forever.
    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn encode(&self, path: &Path) -> TesselResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .map_err(|e| TesselError::Encode(format!("failed to create APNG file: {}", e)))?;

        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .set_animated(self.frames.len() as u32, self.loop_count)
            .map_err(|e| TesselError::Encode(format!("failed to set APNG animation: {}", e)))?;
        encoder
            .set_frame_delay(1, self.fps)
            .map_err(|e| TesselError::Encode(format!("failed to set APNG frame delay: {}", e)))?;

        let mut writer = encoder
            .write_header()
            .map_err(|e| TesselError::Encode(format!("failed to write APNG header: {}", e)))?;
        for (i, frame) in self.frames.iter().enumerate() {
            writer
                .write_image_data(frame)
                .map_err(|e| TesselError::Encode(format!("failed to write APNG frame {}: {}", i, e)))?;
        }
        writer
            .finish()
            .map_err(|e| TesselError::Encode(format!("failed to finalize APNG: {}", e)))?;
        Ok(())
    }
}

impl FrameWriter for ApngWriter {
    fn is_movie(&self) -> bool {
        true
    }

    fn start(&mut self, path: &Path, width: u32, height: u32) -> TesselResult<()> {
        if width == 0 || height == 0 {
            return Err(TesselError::Encode(format!(
                "cannot start a {}x{} animation",
                width, height
            )));
        }
        self.path = Some(path.to_path_buf());
        self.width = width;
        self.height = height;
        self.frames.clear();
        tracing::info!("Created APNG {} ({}x{})", path.display(), width, height);
        Ok(())
    }

    fn append(&mut self, frame: i32, image: &OutputImage) -> TesselResult<()> {
        if self.path.is_none() {
            return Err(TesselError::Encode("APNG writer was not started".into()));
        }
        if image.width != self.width || image.height != self.height {
            return Err(TesselError::Encode(format!(
                "frame {} has dimensions {}x{}, expected {}x{}",
                frame, image.width, image.height, self.width, self.height
            )));
        }
        self.frames.push(image.rgba.clone());
        Ok(())
    }

    fn write(&mut self, path: &Path, _image: &OutputImage) -> TesselResult<()> {
        Err(TesselError::Encode(format!(
            "cannot write still {} with an animation writer",
            path.display()
        )))
    }

    fn end(&mut self) -> TesselResult<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        if self.frames.is_empty() {
            tracing::warn!("no frames to encode for {}", path.display());
            return Ok(());
        }
        self.encode(&path)?;
        tracing::info!(
            "Encoded {} frames to APNG at {} ({}x{} @ {}fps)",
            self.frames.len(),
            path.display(),
            self.width,
            self.height,
            self.fps
        );
        self.frames.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> OutputImage {
        OutputImage {
            width: 4,
            height: 2,
            rgba: vec![value; 4 * 2 * 4],
            stamp: None,
        }
    }

    #[test]
    fn test_apng_has_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim_0001-0003.png");
        let mut writer = ApngWriter::new(24);
        writer.start(&path, 4, 2).unwrap();
        for i in 1..=3 {
            writer.append(i, &frame(i as u8 * 60)).unwrap();
        }
        assert_eq!(writer.frame_count(), 3);
        writer.end().unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let actl = reader.info().animation_control.unwrap();
        assert_eq!(actl.num_frames, 3);
        assert_eq!(actl.num_plays, 0);
    }

    #[test]
    fn test_mismatched_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ApngWriter::new(24);
        writer.start(&dir.path().join("a.png"), 8, 8).unwrap();
        assert!(writer.append(1, &frame(0)).is_err());
    }

    #[test]
    fn test_end_without_frames_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        let mut writer = ApngWriter::new(24);
        writer.start(&path, 4, 2).unwrap();
        writer.end().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_append_before_start_fails() {
        let mut writer = ApngWriter::new(24);
        assert!(writer.append(1, &frame(0)).is_err());
        assert!(writer.is_movie());
    }
}
