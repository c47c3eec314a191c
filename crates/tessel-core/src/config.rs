use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rect::Rect;
use crate::result::PassType;
use crate::{TesselError, TesselResult};

/// Hard cap on render worker threads.
pub const MAX_THREADS: usize = 64;

/// Hard cap on oversampling level.
pub const MAX_OSA: u32 = 16;

/// Normalised border region, fractions of the full frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BorderSettings {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
}

impl BorderSettings {
    /// True when the border encloses no area.
    pub fn is_degenerate(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    /// Border in pixel coordinates of a `winx` × `winy` frame.
    pub fn to_rect(&self, winx: i32, winy: i32) -> Rect {
        Rect::new(
            (self.xmin * winx as f32) as i32,
            (self.xmax * winx as f32) as i32,
            (self.ymin * winy as f32) as i32,
            (self.ymax * winy as f32) as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TileSize {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MotionBlurSettings {
    /// Number of full renders accumulated per frame.
    pub samples: u32,
    /// Shutter length in frames.
    pub shutter: f32,
}

impl Default for MotionBlurSettings {
    fn default() -> Self {
        Self {
            samples: 1,
            shutter: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FieldSettings {
    /// Render the odd field first.
    #[serde(default)]
    pub odd: bool,
    /// Both fields at the same time (no half-frame offset).
    #[serde(default)]
    pub still: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ViewSettings {
    pub name: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayerSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Passes on top of the always-present combined and Z passes.
    #[serde(default)]
    pub passes: Vec<PassType>,
    #[serde(default)]
    pub freestyle: bool,
}

impl LayerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            passes: Vec::new(),
            freestyle: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Path pattern; runs of `#` are replaced with the zero-padded frame number.
    pub path: String,
    pub extension: String,
    /// Frames are appended to a single movie file instead of written as stills.
    #[serde(default)]
    pub movie: bool,
    /// Skip frames whose output file already exists.
    #[serde(default)]
    pub no_overwrite: bool,
    /// Create an empty placeholder file before rendering a frame.
    #[serde(default)]
    pub touch: bool,
    /// Write all views into one file instead of one file per view.
    #[serde(default)]
    pub multiview_file: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: "output/frame_####".to_string(),
            extension: "png".to_string(),
            movie: false,
            no_overwrite: false,
            touch: false,
            multiview_file: false,
        }
    }
}

/// Snapshot of everything that drives one render.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSettings {
    pub resolution_x: i32,
    pub resolution_y: i32,
    /// Resolution scale in percent.
    pub size_percent: i32,
    pub border: Option<BorderSettings>,
    /// Crop the output to the border instead of inserting it into a black frame.
    pub crop: bool,
    pub threads: Option<usize>,
    pub tile_size: Option<TileSize>,
    /// Oversampling level, 0 disables anti-aliasing.
    pub osa: u32,
    pub full_sample: bool,
    /// Spill finished tiles to a temporary file instead of keeping them resident.
    pub tile_file: bool,
    pub motion_blur: Option<MotionBlurSettings>,
    pub fields: Option<FieldSettings>,
    pub panorama: bool,
    pub ortho: bool,
    pub edge: bool,
    pub freestyle: bool,
    pub multiview: bool,
    pub views: Vec<ViewSettings>,
    pub layers: Vec<LayerSettings>,
    pub active_layer: usize,
    pub single_layer: bool,
    pub use_compositor: bool,
    pub use_sequencer: bool,
    pub stamp: bool,
    pub frame_current: i32,
    pub frame_start: i32,
    pub frame_end: i32,
    pub frame_step: i32,
    pub output: OutputSettings,
    /// Preview renders keep their previous result and skip merging on cancel.
    pub preview: bool,
    pub engine: Option<String>,
    pub temp_dir: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution_x: 1920,
            resolution_y: 1080,
            size_percent: 100,
            border: None,
            crop: false,
            threads: None,
            tile_size: None,
            osa: 0,
            full_sample: false,
            tile_file: false,
            motion_blur: None,
            fields: None,
            panorama: false,
            ortho: false,
            edge: false,
            freestyle: false,
            multiview: false,
            views: Vec::new(),
            layers: vec![LayerSettings::new("RenderLayer")],
            active_layer: 0,
            single_layer: false,
            use_compositor: false,
            use_sequencer: false,
            stamp: false,
            frame_current: 1,
            frame_start: 1,
            frame_end: 250,
            frame_step: 1,
            output: OutputSettings::default(),
            preview: false,
            engine: None,
            temp_dir: None,
        }
    }
}

/// Full-sample and tile-file flags after their mutual constraints are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleModes {
    pub full_sample: bool,
    pub tile_file: bool,
}

impl RenderSettings {
    /// Settings for a `width` × `height` frame with everything else default.
    pub fn with_size(width: i32, height: i32) -> Self {
        Self {
            resolution_x: width,
            resolution_y: height,
            ..Self::default()
        }
    }

    /// Output frame size after the percentage scale.
    pub fn window_size(&self) -> (i32, i32) {
        (
            (self.size_percent * self.resolution_x) / 100,
            (self.size_percent * self.resolution_y) / 100,
        )
    }

    /// Display rectangle: the border region if enabled, else the whole frame.
    pub fn display_rect(&self, winx: i32, winy: i32) -> Rect {
        match &self.border {
            Some(border) => border.to_rect(winx, winy),
            None => Rect::from_size(winx, winy),
        }
    }

    /// Full sample needs oversampling and implies the tile file; border
    /// renders fall back to plain in-memory rendering.
    pub fn sample_modes(&self) -> SampleModes {
        let mut modes = SampleModes {
            full_sample: self.full_sample && self.osa > 0,
            tile_file: self.tile_file,
        };
        if modes.full_sample {
            modes.tile_file = true;
        }
        if self.border.is_some() {
            modes.full_sample = false;
            modes.tile_file = false;
        }
        modes
    }

    /// Effective oversampling level, 0 when disabled.
    pub fn osa_level(&self) -> u32 {
        self.osa.min(MAX_OSA)
    }

    /// Worker thread count, auto-detected when unset.
    pub fn thread_count(&self) -> usize {
        self.threads
            .unwrap_or_else(num_cpus::get)
            .clamp(1, MAX_THREADS)
    }

    /// Views that take part in this render, in declaration order.
    pub fn active_views(&self) -> Vec<&ViewSettings> {
        if !self.multiview {
            return Vec::new();
        }
        self.views.iter().filter(|v| v.enabled).collect()
    }

    pub fn motion_blur_enabled(&self) -> bool {
        self.motion_blur.is_some_and(|mb| mb.samples > 0)
    }

    pub fn frame_step(&self) -> i32 {
        self.frame_step.max(1)
    }
}

fn default_true() -> bool {
    true
}

/// Top-level `tessel.toml` file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TesselConfig {
    #[serde(default)]
    pub render: RenderSettings,
}

impl TesselConfig {
    pub fn load_from_file(path: &Path) -> TesselResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TesselConfig =
            toml::from_str(&contents).map_err(|e| TesselError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> TesselResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| TesselError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_applies_percentage() {
        let settings = RenderSettings {
            size_percent: 50,
            ..RenderSettings::with_size(1920, 1080)
        };
        assert_eq!(settings.window_size(), (960, 540));
    }

    #[test]
    fn test_full_sample_requires_osa() {
        let mut settings = RenderSettings::with_size(64, 64);
        settings.full_sample = true;
        assert_eq!(settings.sample_modes(), SampleModes::default());

        settings.osa = 8;
        let modes = settings.sample_modes();
        assert!(modes.full_sample);
        assert!(modes.tile_file);
    }

    #[test]
    fn test_border_disables_full_sample_and_tile_file() {
        let mut settings = RenderSettings::with_size(64, 64);
        settings.osa = 8;
        settings.full_sample = true;
        settings.tile_file = true;
        settings.border = Some(BorderSettings {
            xmin: 0.25,
            xmax: 0.75,
            ymin: 0.0,
            ymax: 1.0,
        });
        assert_eq!(settings.sample_modes(), SampleModes::default());
        assert_eq!(settings.display_rect(64, 64), Rect::new(16, 48, 0, 64));
    }

    #[test]
    fn test_thread_count_is_clamped() {
        let mut settings = RenderSettings::default();
        settings.threads = Some(0);
        assert_eq!(settings.thread_count(), 1);
        settings.threads = Some(1000);
        assert_eq!(settings.thread_count(), MAX_THREADS);
    }

    #[test]
    fn test_active_views_skip_disabled() {
        let mut settings = RenderSettings::default();
        settings.views = vec![
            ViewSettings {
                name: "left".into(),
                suffix: "_L".into(),
                enabled: true,
            },
            ViewSettings {
                name: "right".into(),
                suffix: "_R".into(),
                enabled: false,
            },
        ];
        assert!(settings.active_views().is_empty());
        settings.multiview = true;
        let names: Vec<_> = settings.active_views().iter().map(|v| v.name.clone()).collect();
        assert_eq!(names, vec!["left".to_string()]);
    }

    #[test]
    fn test_config_roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessel.toml");
        let mut config = TesselConfig::default();
        config.render.osa = 8;
        config.render.motion_blur = Some(MotionBlurSettings {
            samples: 4,
            shutter: 0.5,
        });
        config.save_to_file(&path).unwrap();

        let loaded = TesselConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.render.osa, 8);
        assert_eq!(loaded.render.motion_blur.unwrap().samples, 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TesselConfig = toml::from_str(
            r#"
            [render]
            resolution_x = 320
            resolution_y = 240
            "#,
        )
        .unwrap();
        assert_eq!(config.render.window_size(), (320, 240));
        assert_eq!(config.render.layers.len(), 1);
    }
}
