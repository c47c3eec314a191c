//! Spill file for tile-file storage.
//!
//! When a frame result is created with [`StorageMode::TileFile`] its passes
//! stay unallocated. Every finished part is appended to a temporary file as a
//! bincode record keyed by (part number, view), and the records are read back
//! into a resident result once the pass is done.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rect::Rect;
use crate::result::{PassType, RenderLayer, RenderPass, RenderResult, StorageMode};
use crate::{TesselError, TesselResult};

#[derive(Debug, Serialize, Deserialize)]
struct PassRecord {
    pass_type: PassType,
    view_id: usize,
    channels: usize,
    rect: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerRecord {
    name: String,
    passes: Vec<PassRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TileRecord {
    part: usize,
    view: usize,
    tilerect: Rect,
    crop: i32,
    layers: Vec<LayerRecord>,
}

impl TileRecord {
    fn into_result(self) -> RenderResult {
        let mut result = RenderResult::empty(self.tilerect.width(), self.tilerect.height());
        result.xof = self.tilerect.xmin;
        result.yof = self.tilerect.ymin;
        result.tilerect = self.tilerect;
        result.crop = self.crop;
        result.layers = self
            .layers
            .into_iter()
            .map(|layer| RenderLayer {
                name: layer.name,
                passes: layer
                    .passes
                    .into_iter()
                    .map(|p| RenderPass {
                        pass_type: p.pass_type,
                        view_id: p.view_id,
                        channels: p.channels,
                        rect: p.rect,
                    })
                    .collect(),
            })
            .collect();
        result
    }
}

/// Temporary on-disk tile store for one frame result.
#[derive(Debug)]
pub struct TileFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rectx: i32,
    recty: i32,
    records: usize,
}

/// File name of the spill file for one scene and full-sample index.
pub fn spill_path(dir: &Path, session: &uuid::Uuid, scene: &str, sample: u32) -> PathBuf {
    let scene: String = scene
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!("{}_{}_{}.tiles", session.simple(), scene, sample))
}

/// True when a file can be created in `dir`.
pub fn is_dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let marker = dir.join(format!(".tessel-write-{}", uuid::Uuid::new_v4().simple()));
    match File::create(&marker) {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

impl TileFile {
    /// Create the spill file for a `rectx` × `recty` frame.
    pub fn begin(path: impl Into<PathBuf>, rectx: i32, recty: i32) -> TesselResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TesselError::tile_file(e.to_string(), parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TesselError::tile_file(format!("cannot create: {}", e), &path))?;
        tracing::debug!("opened tile file {:?} for {}x{}", path, rectx, recty);
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            rectx,
            recty,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of parts written so far.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Append the resident passes of a finished part.
    pub fn merge(&mut self, part: &RenderResult, part_nr: usize, view: usize) -> TesselResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TesselError::tile_file("file is closed", &self.path))?;
        let record = TileRecord {
            part: part_nr,
            view,
            tilerect: part.tilerect,
            crop: part.crop,
            layers: part
                .layers
                .iter()
                .map(|layer| LayerRecord {
                    name: layer.name.clone(),
                    passes: layer
                        .passes
                        .iter()
                        .filter(|p| p.is_resident())
                        .map(|p| PassRecord {
                            pass_type: p.pass_type,
                            view_id: p.view_id,
                            channels: p.channels,
                            rect: p.rect.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };
        bincode::serialize_into(writer, &record)
            .map_err(|e| TesselError::tile_file(format!("write part {}: {}", part_nr, e), &self.path))?;
        self.records += 1;
        Ok(())
    }

    /// Flush pending writes; the file stays on disk for [`TileFile::read`].
    pub fn close(&mut self) -> TesselResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| TesselError::tile_file(e.to_string(), &self.path))?;
        }
        Ok(())
    }

    /// Read every record (or only those of `view`) into `result`, allocating
    /// its passes first. The file is kept.
    pub fn read(&mut self, result: &mut RenderResult, view: Option<usize>) -> TesselResult<()> {
        if result.rectx != self.rectx || result.recty != self.recty {
            return Err(TesselError::tile_file(
                format!(
                    "size mismatch: file is {}x{}, result is {}x{}",
                    self.rectx, self.recty, result.rectx, result.recty
                ),
                &self.path,
            ));
        }
        self.close()?;
        result.make_resident()?;

        let file = File::open(&self.path)
            .map_err(|e| TesselError::tile_file(format!("cannot open: {}", e), &self.path))?;
        let mut reader = BufReader::new(file);
        for _ in 0..self.records {
            let record: TileRecord = bincode::deserialize_from(&mut reader)
                .map_err(|e| TesselError::tile_file(format!("read: {}", e), &self.path))?;
            if view.is_some_and(|v| v != record.view) {
                continue;
            }
            tracing::trace!("tile file part {} view {}", record.part, record.view);
            result.merge(&record.into_result());
        }
        Ok(())
    }

    /// Read everything back into `result` and delete the file.
    pub fn end(mut self, result: &mut RenderResult) -> TesselResult<()> {
        self.read(result, None)?;
        result.storage = StorageMode::Memory;
        tracing::debug!("merged {} parts from {:?}", self.records, self.path);
        Ok(())
    }
}

impl Drop for TileFile {
    fn drop(&mut self) {
        self.writer = None;
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("could not remove tile file {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{LayerSelector, ResultLayout, ViewSelector};

    fn part(rect: Rect, value: f32) -> RenderResult {
        let mut rr = RenderResult::new(
            &ResultLayout::simple("L"),
            rect,
            0,
            StorageMode::Memory,
            LayerSelector::All,
            ViewSelector::One(0),
        )
        .unwrap();
        for pass in &mut rr.layers[0].passes {
            if pass.pass_type == PassType::Combined {
                pass.rect.iter_mut().for_each(|v| *v = value);
            }
        }
        rr
    }

    fn spilled_frame() -> RenderResult {
        RenderResult::new(
            &ResultLayout::simple("L"),
            Rect::from_size(4, 4),
            0,
            StorageMode::TileFile,
            LayerSelector::All,
            ViewSelector::All,
        )
        .unwrap()
    }

    #[test]
    fn test_end_reads_parts_and_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = spill_path(dir.path(), &uuid::Uuid::new_v4(), "Scene", 0);
        let mut tf = TileFile::begin(&path, 4, 4).unwrap();
        tf.merge(&part(Rect::new(0, 2, 0, 4), 0.25), 0, 0).unwrap();
        tf.merge(&part(Rect::new(2, 4, 0, 4), 0.75), 1, 0).unwrap();
        assert_eq!(tf.len(), 2);

        let mut frame = spilled_frame();
        tf.end(&mut frame).unwrap();
        assert!(!path.exists());
        assert_eq!(frame.storage, StorageMode::Memory);

        let combined = frame.layers[0].pass(PassType::Combined, 0).unwrap();
        assert_eq!(combined[0], 0.25);
        assert_eq!(combined[3 * 4], 0.75);
    }

    #[test]
    fn test_read_keeps_file_and_filters_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.tiles");
        let mut tf = TileFile::begin(&path, 4, 4).unwrap();
        tf.merge(&part(Rect::from_size(4, 4), 1.0), 0, 1).unwrap();

        let mut frame = spilled_frame();
        tf.read(&mut frame, Some(0)).unwrap();
        assert!(path.exists());
        let combined = frame.layers[0].pass(PassType::Combined, 0).unwrap();
        assert!(combined.iter().all(|v| *v == 0.0));

        tf.read(&mut frame, None).unwrap();
        let combined = frame.layers[0].pass(PassType::Combined, 0).unwrap();
        assert!(combined.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_read_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut tf = TileFile::begin(dir.path().join("x.tiles"), 8, 8).unwrap();
        let mut frame = spilled_frame();
        let err = tf.read(&mut frame, None).unwrap_err();
        assert!(matches!(err, TesselError::TileFile { .. }));
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.tiles");
        {
            let _tf = TileFile::begin(&path, 2, 2).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_spill_path_sanitizes_scene() {
        let id = uuid::Uuid::nil();
        let path = spill_path(Path::new("/tmp"), &id, "My Scene/1", 3);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_My_Scene_1_3.tiles"));
    }

    #[test]
    fn test_is_dir_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_dir_writable(dir.path()));
        assert!(!is_dir_writable(&dir.path().join("missing")));
    }
}
