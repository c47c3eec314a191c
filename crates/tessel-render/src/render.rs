//! The render session: settings snapshot, window and camera state, the
//! shared frame result and the callback sink.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use tessel_core::tile_file::spill_path;
use tessel_core::{
    LayerSelector, Rect, RenderResult, RenderSettings, RenderStats, ReportList, ResultImage,
    ResultLayout, SampleModes, StorageMode, TesselError, TesselResult, TileFile, TileSize,
    ViewPlane, ViewSelector,
};

use crate::callbacks::{BackgroundCallbacks, RenderCallbacks};
use crate::external::RenderEngine;
use crate::parts::tile_size;
use crate::scene::{Camera, Scene};

/// Column-major 4x4 matrix, `m[column][row]`.
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Frames smaller than this cannot be written to movie files.
pub const MIN_MOVIE_SIZE: i32 = 16;

/// The frame result shared between the render thread and display readers.
pub type SharedResult = Arc<RwLock<Option<RenderResult>>>;

fn perspective(vp: &ViewPlane, near: f32, far: f32) -> Mat4 {
    let (w, h, d) = (vp.width(), vp.height(), far - near);
    let mut m = [[0.0; 4]; 4];
    m[0][0] = 2.0 * near / w;
    m[1][1] = 2.0 * near / h;
    m[2][0] = (vp.xmax + vp.xmin) / w;
    m[2][1] = (vp.ymax + vp.ymin) / h;
    m[2][2] = -(far + near) / d;
    m[2][3] = -1.0;
    m[3][2] = -2.0 * far * near / d;
    m
}

fn orthographic(vp: &ViewPlane, near: f32, far: f32) -> Mat4 {
    let (w, h, d) = (vp.width(), vp.height(), far - near);
    let mut m = [[0.0; 4]; 4];
    m[0][0] = 2.0 / w;
    m[1][1] = 2.0 / h;
    m[2][2] = -2.0 / d;
    m[3][0] = -(vp.xmax + vp.xmin) / w;
    m[3][1] = -(vp.ymax + vp.ymin) / h;
    m[3][2] = -(far + near) / d;
    m[3][3] = 1.0;
    m
}

pub struct Render {
    name: String,
    pub(crate) settings: RenderSettings,
    pub(crate) scene: Option<Scene>,
    pub(crate) camera: Option<Camera>,

    pub(crate) winx: i32,
    pub(crate) winy: i32,
    pub(crate) disprect: Rect,
    pub(crate) rectx: i32,
    pub(crate) recty: i32,

    pub(crate) viewplane: ViewPlane,
    pub(crate) clip_start: f32,
    pub(crate) clip_end: f32,
    pub(crate) winmat: Mat4,
    pub(crate) viewmat: Mat4,
    pub(crate) ortho: bool,

    pub(crate) osa: u32,
    pub(crate) modes: SampleModes,
    pub(crate) threads: usize,
    pub(crate) tile: TileSize,
    pub(crate) layout: ResultLayout,
    pub(crate) actview: usize,

    pub(crate) result: SharedResult,
    pub(crate) pushed_result: Option<RenderResult>,
    /// Per-sample spill files of a full-sample render, kept until the next
    /// render so samples can be composited again.
    pub(crate) sample_files: Vec<TileFile>,
    pub(crate) current_sample: Option<usize>,

    pub(crate) stats: RenderStats,
    pub(crate) reports: ReportList,
    callbacks: Arc<dyn RenderCallbacks>,
    break_flag: Arc<AtomicBool>,

    pub(crate) mblur_offs: f32,
    pub(crate) field_offs: f32,
    pub(crate) second_field: bool,
    pub(crate) start_time: Instant,
    pub(crate) session: Uuid,
    pub(crate) engine: Option<Arc<dyn RenderEngine>>,
    pub(crate) engine_rendering: bool,
    pub(crate) animation: bool,
    pub(crate) ok: bool,
}

impl Render {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: RenderSettings::default(),
            scene: None,
            camera: None,
            winx: 0,
            winy: 0,
            disprect: Rect::default(),
            rectx: 0,
            recty: 0,
            viewplane: ViewPlane::default(),
            clip_start: 0.1,
            clip_end: 100.0,
            winmat: IDENTITY,
            viewmat: IDENTITY,
            ortho: false,
            osa: 0,
            modes: SampleModes::default(),
            threads: 1,
            tile: TileSize { x: 1, y: 1 },
            layout: ResultLayout {
                layers: Vec::new(),
                views: vec![String::new()],
            },
            actview: 0,
            result: Arc::new(RwLock::new(None)),
            pushed_result: None,
            sample_files: Vec::new(),
            current_sample: None,
            stats: RenderStats::default(),
            reports: ReportList::new(),
            callbacks: Arc::new(BackgroundCallbacks),
            break_flag: Arc::new(AtomicBool::new(false)),
            mblur_offs: 0.0,
            field_offs: 0.0,
            second_field: false,
            start_time: Instant::now(),
            session: Uuid::new_v4(),
            engine: None,
            engine_rendering: false,
            animation: false,
            ok: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn reports(&self) -> &ReportList {
        &self.reports
    }

    pub fn reports_mut(&mut self) -> &mut ReportList {
        &mut self.reports
    }

    pub fn active_view_id(&self) -> usize {
        self.actview
    }

    pub fn window_size(&self) -> (i32, i32) {
        (self.winx, self.winy)
    }

    pub fn disprect(&self) -> Rect {
        self.disprect
    }

    pub fn sample_modes(&self) -> SampleModes {
        self.modes
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn osa(&self) -> u32 {
        self.osa
    }

    // ---- callbacks ----

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn RenderCallbacks>) {
        self.callbacks = callbacks;
    }

    /// Back to the default sink: stats go to the log, nothing is displayed.
    pub fn init_callbacks(&mut self) {
        self.callbacks = Arc::new(BackgroundCallbacks);
    }

    pub fn callbacks(&self) -> &Arc<dyn RenderCallbacks> {
        &self.callbacks
    }

    /// Cancel the running render at the next check.
    pub fn request_break(&self) {
        self.break_flag.store(true, Ordering::Relaxed);
    }

    pub fn clear_break(&self) {
        self.break_flag.store(false, Ordering::Relaxed);
    }

    /// Flag another thread can set to cancel this render.
    pub fn break_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.break_flag)
    }

    /// Use `flag` as this render's break flag, so cancelling the owner of the
    /// flag also cancels this render.
    pub(crate) fn share_break(&mut self, flag: Arc<AtomicBool>) {
        self.break_flag = flag;
    }

    pub fn test_break(&self) -> bool {
        self.break_flag.load(Ordering::Relaxed) || self.callbacks.test_break()
    }

    pub(crate) fn stats_draw(&self) {
        self.callbacks.stats_draw(&self.stats);
    }

    /// Show a transient status line.
    pub(crate) fn stats_info(&mut self, info: String) {
        self.stats.infostr = Some(info);
        self.callbacks.stats_draw(&self.stats);
        self.stats.infostr = None;
    }

    pub(crate) fn display_draw_result(&self, view: usize) {
        let guard = self.result.read();
        if let Some(rr) = guard.as_ref() {
            self.callbacks.display_draw(rr, None, view);
        }
    }

    pub(crate) fn display_init_result(&self) {
        let guard = self.result.read();
        if let Some(rr) = guard.as_ref() {
            self.callbacks.display_init(rr);
            self.callbacks.display_clear(rr);
        }
    }

    // ---- state ----

    /// Set up everything that stays fixed for a whole render: settings,
    /// window and display rectangle, sample modes and thread count.
    /// `source` shares its border and size with this render, `layer`
    /// restricts rendering to one layer.
    pub fn init_state(
        &mut self,
        source: Option<&Render>,
        settings: &RenderSettings,
        layer: Option<usize>,
        winx: i32,
        winy: i32,
        disprect: Option<Rect>,
    ) -> TesselResult<()> {
        let had_freestyle = self.settings.freestyle;

        self.ok = true;
        self.start_time = Instant::now();
        self.settings = settings.clone();

        if let Some(src) = source {
            self.settings.border = src.settings.border;
            self.settings.crop = src.settings.crop;
            self.settings.resolution_x = src.settings.resolution_x;
            self.settings.resolution_y = src.settings.resolution_y;
            self.settings.size_percent = src.settings.size_percent;
        }

        self.winx = winx;
        self.winy = winy;
        self.disprect = match (source.and_then(|s| s.settings.border), disprect) {
            (Some(border), _) => border.to_rect(winx, winy),
            (None, Some(rect)) => rect,
            (None, None) => Rect::from_size(winx, winy),
        };
        self.rectx = self.disprect.width();
        self.recty = self.disprect.height();

        let movie_too_small = self.settings.output.movie
            && (self.rectx < MIN_MOVIE_SIZE || self.recty < MIN_MOVIE_SIZE);
        if self.rectx < 1 || self.recty < 1 || movie_too_small {
            self.reports.error("Image too small");
            self.ok = false;
            return Err(TesselError::ImageTooSmall {
                width: self.rectx,
                height: self.recty,
            });
        }

        self.modes = self.settings.sample_modes();
        match source {
            Some(src) if self.modes.full_sample => {
                if src.modes.full_sample {
                    self.osa = src.osa;
                } else {
                    self.modes.full_sample = false;
                }
            }
            _ => self.osa = self.settings.osa_level(),
        }
        if !self.modes.full_sample && source.is_some() {
            self.osa = self.settings.osa_level();
        }

        if let Some(index) = layer.filter(|&i| i < self.settings.layers.len()) {
            self.settings.active_layer = index;
            self.settings.single_layer = true;
        }
        self.layout = ResultLayout::from_settings(&self.settings);

        {
            let mut guard = self.result.write();
            if self.settings.preview {
                let keep = !(had_freestyle || self.settings.freestyle)
                    && guard
                        .as_ref()
                        .is_some_and(|rr| rr.rectx == self.rectx && rr.recty == self.recty);
                if !keep {
                    *guard = None;
                }
            } else {
                *guard = Some(RenderResult::empty(self.rectx, self.recty));
            }
        }

        self.threads = self.settings.thread_count();
        self.tile = tile_size(self.disprect, self.threads, self.settings.tile_size);
        self.mblur_offs = 0.0;
        self.field_offs = 0.0;
        self.sample_files.clear();
        self.current_sample = None;
        Ok(())
    }

    /// Perspective window matrix for `viewplane`.
    pub fn set_window(&mut self, viewplane: ViewPlane, clip_start: f32, clip_end: f32) {
        self.viewplane = viewplane;
        self.clip_start = clip_start;
        self.clip_end = clip_end;
        self.ortho = false;
        self.winmat = perspective(&viewplane, clip_start, clip_end);
    }

    /// Orthographic window matrix for `viewplane`.
    pub fn set_ortho(&mut self, viewplane: ViewPlane, clip_start: f32, clip_end: f32) {
        self.viewplane = viewplane;
        self.clip_start = clip_start;
        self.clip_end = clip_end;
        self.ortho = true;
        self.winmat = orthographic(&viewplane, clip_start, clip_end);
    }

    pub fn set_view(&mut self, mat: Mat4) {
        self.viewmat = mat;
    }

    pub fn view_plane(&self) -> (ViewPlane, Rect) {
        (self.viewplane, self.disprect)
    }

    pub fn window_matrix(&self) -> Mat4 {
        self.winmat
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.viewmat
    }

    pub fn set_camera(&mut self, camera: &Camera) {
        if camera.ortho || self.settings.ortho {
            self.set_ortho(camera.viewplane, camera.clip_start, camera.clip_end);
        } else {
            self.set_window(camera.viewplane, camera.clip_start, camera.clip_end);
        }
        self.set_view(camera.view_matrix);
        self.camera = Some(camera.clone());
    }

    pub(crate) fn is_panorama(&self) -> bool {
        self.settings.panorama || self.camera.as_ref().is_some_and(|c| c.panorama)
    }

    // ---- result access ----

    /// Shared access to the frame result for as long as the guard lives.
    pub fn acquire_result_read(&self) -> RwLockReadGuard<'_, Option<RenderResult>> {
        self.result.read()
    }

    /// Exclusive access to the frame result for as long as the guard lives.
    pub fn acquire_result_write(&self) -> RwLockWriteGuard<'_, Option<RenderResult>> {
        self.result.write()
    }

    /// Exchange the frame result with `other`.
    pub fn swap_result(&self, other: &mut Option<RenderResult>) {
        std::mem::swap(&mut *self.result.write(), other);
    }

    /// Handle for display threads that outlive a borrow of the session.
    pub fn result_handle(&self) -> SharedResult {
        Arc::clone(&self.result)
    }

    /// Index in `rr.layers` of the active render layer.
    pub(crate) fn active_layer_index(&self, rr: &RenderResult) -> usize {
        self.settings
            .layers
            .get(self.settings.active_layer)
            .and_then(|layer| rr.layers.iter().position(|l| l.name == layer.name))
            .unwrap_or(0)
    }

    /// Display pixels of one view: composited output when present, else the
    /// active layer's combined and Z passes.
    pub fn acquire_result_image(&self, view_id: usize) -> ResultImage {
        let guard = self.result.read();
        match guard.as_ref() {
            Some(rr) => {
                let mut image = rr.image(view_id, self.active_layer_index(rr));
                image.xof = self.disprect.xmin;
                image.yof = self.disprect.ymin;
                image
            }
            None => ResultImage::default(),
        }
    }

    /// Images of every view, in view order.
    pub fn acquire_result_views(&self) -> Vec<ResultImage> {
        let guard = self.result.read();
        match guard.as_ref() {
            Some(rr) => {
                let active = self.active_layer_index(rr);
                rr.images(active)
                    .into_iter()
                    .map(|mut image| {
                        image.xof = self.disprect.xmin;
                        image.yof = self.disprect.ymin;
                        image
                    })
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// 8-bit RGBA display pixels of one view, black before anything is
    /// rendered.
    pub fn result_rgba8(&self, view_id: usize) -> Vec<u8> {
        let image = self.acquire_result_image(view_id);
        if image.rectx == 0 {
            return vec![0; (self.rectx.max(0) * self.recty.max(0) * 4) as usize];
        }
        image.to_rgba8()
    }

    /// Keep the current result aside while a single layer is rendered.
    pub fn single_layer_begin(&mut self) {
        let mut guard = self.result.write();
        if let Some(rr) = guard.take() {
            if !rr.layers.is_empty() {
                self.pushed_result = Some(rr);
            }
        }
    }

    /// Put the layers kept by [`Render::single_layer_begin`] back around the
    /// freshly rendered one.
    pub fn single_layer_end(&mut self) {
        let Some(pushed) = self.pushed_result.take() else {
            return;
        };
        let mut guard = self.result.write();
        if let Some(rr) = guard.as_mut() {
            if rr.layers.len() == 1 {
                rr.restore_pushed_layers(pushed);
            }
        }
    }

    /// Drop the frame result and any kept layers.
    pub fn free_result(&mut self) {
        *self.result.write() = None;
        self.pushed_result = None;
        self.sample_files.clear();
    }

    pub fn set_engine(&mut self, engine: Option<Arc<dyn RenderEngine>>) {
        self.engine = engine;
    }

    pub fn engine_name(&self) -> Option<&str> {
        self.engine.as_ref().map(|e| e.name())
    }

    /// Release the kept engine unless it is rendering right now.
    pub fn free_engine(&mut self) -> bool {
        if self.engine_rendering {
            return false;
        }
        self.engine = None;
        true
    }

    pub(crate) fn temp_dir(&self) -> PathBuf {
        self.settings
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub(crate) fn scene_name(&self) -> String {
        self.scene
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    // ---- frame result lifecycle ----

    /// Replace the frame result with a fresh one covering the display
    /// rectangle, and open spill files when tiles go to disk. Preview
    /// renders keep an existing result.
    pub(crate) fn main_result_new(&mut self) -> TesselResult<()> {
        let storage = if self.modes.tile_file {
            StorageMode::TileFile
        } else {
            StorageMode::Memory
        };
        {
            let mut guard = self.result.write();
            if guard.is_none() || !self.settings.preview {
                *guard = None;
                let rr = RenderResult::new(
                    &self.layout,
                    self.disprect,
                    0,
                    storage,
                    LayerSelector::All,
                    ViewSelector::All,
                )?;
                *guard = Some(rr);
            }
        }

        let spilled = self
            .result
            .read()
            .as_ref()
            .is_some_and(|rr| rr.storage == StorageMode::TileFile);
        if !spilled {
            return Ok(());
        }

        let dir = self.temp_dir();
        let scene = self.scene_name();
        if self.modes.full_sample {
            self.sample_files.clear();
            for sample in 0..self.osa.max(1) {
                let path = spill_path(&dir, &self.session, &scene, sample);
                self.sample_files
                    .push(TileFile::begin(path, self.rectx, self.recty)?);
            }
        } else {
            let path = spill_path(&dir, &self.session, &scene, 0);
            let file = TileFile::begin(path, self.rectx, self.recty)?;
            if let Some(rr) = self.result.write().as_mut() {
                rr.tile_file = Some(file);
            }
        }
        Ok(())
    }

    /// Read spilled tiles back into the frame result.
    pub(crate) fn main_result_end(&mut self) -> TesselResult<()> {
        for file in &mut self.sample_files {
            file.close()?;
        }
        let mut guard = self.result.write();
        if let Some(rr) = guard.as_mut() {
            if let Some(file) = rr.tile_file.take() {
                file.end(rr)?;
            }
        }
        Ok(())
    }

    /// Load full-sample pass `sample` into the frame result.
    pub(crate) fn read_sample(&mut self, sample: usize) -> TesselResult<()> {
        let Some(file) = self.sample_files.get_mut(sample) else {
            return Ok(());
        };
        let mut guard = self.result.write();
        if let Some(rr) = guard.as_mut() {
            file.read(rr, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{BorderSettings, LayerSettings, PassType};

    fn settings(w: i32, h: i32) -> RenderSettings {
        let mut s = RenderSettings::with_size(w, h);
        s.threads = Some(2);
        s
    }

    #[test]
    fn test_init_state_sets_window_and_threads() {
        let mut re = Render::new("r");
        re.init_state(None, &settings(32, 16), None, 32, 16, None)
            .unwrap();
        assert_eq!(re.window_size(), (32, 16));
        assert_eq!(re.disprect(), Rect::from_size(32, 16));
        assert_eq!(re.thread_count(), 2);
        let guard = re.acquire_result_read();
        let rr = guard.as_ref().unwrap();
        assert_eq!((rr.rectx, rr.recty), (32, 16));
        assert!(rr.layers.is_empty());
    }

    #[test]
    fn test_init_state_rejects_tiny_movie() {
        let mut re = Render::new("r");
        let mut s = settings(8, 8);
        s.output.movie = true;
        let err = re.init_state(None, &s, None, 8, 8, None).unwrap_err();
        assert!(matches!(err, TesselError::ImageTooSmall { .. }));
        assert_eq!(re.reports().last_error(), Some("Image too small"));
        assert!(!re.ok);
    }

    #[test]
    fn test_init_state_reuses_source_border() {
        let mut source = Render::new("main");
        let mut s = settings(40, 40);
        s.border = Some(BorderSettings {
            xmin: 0.25,
            xmax: 0.75,
            ymin: 0.0,
            ymax: 0.5,
        });
        source.init_state(None, &s, None, 40, 40, None).unwrap();

        let mut nested = Render::new("nested");
        nested
            .init_state(Some(&source), &settings(40, 40), None, 40, 40, None)
            .unwrap();
        assert_eq!(nested.disprect(), Rect::new(10, 30, 0, 20));
    }

    #[test]
    fn test_full_sample_follows_source() {
        let mut source = Render::new("main");
        source
            .init_state(None, &settings(16, 16), None, 16, 16, None)
            .unwrap();

        let mut s = settings(16, 16);
        s.osa = 8;
        s.full_sample = true;
        let mut nested = Render::new("nested");
        nested
            .init_state(Some(&source), &s, None, 16, 16, None)
            .unwrap();
        assert!(!nested.sample_modes().full_sample);
        assert_eq!(nested.osa(), 8);
    }

    #[test]
    fn test_osa_is_capped() {
        let mut re = Render::new("r");
        let mut s = settings(16, 16);
        s.osa = 64;
        re.init_state(None, &s, None, 16, 16, None).unwrap();
        assert_eq!(re.osa(), 16);
    }

    #[test]
    fn test_preview_keeps_result_of_same_size() {
        let mut re = Render::new("r");
        let mut s = settings(16, 16);
        s.preview = true;
        re.init_state(None, &s, None, 16, 16, None).unwrap();
        assert!(re.acquire_result_read().is_none());
        re.main_result_new().unwrap();
        re.init_state(None, &s, None, 16, 16, None).unwrap();
        assert!(re.acquire_result_read().as_ref().is_some_and(|rr| !rr.layers.is_empty()));
        re.init_state(None, &s, None, 8, 8, None).unwrap();
        assert!(re.acquire_result_read().is_none());
    }

    #[test]
    fn test_window_matrices() {
        let mut re = Render::new("r");
        let vp = ViewPlane::new(-1.0, 1.0, -1.0, 1.0);
        re.set_window(vp, 1.0, 10.0);
        assert_eq!(re.window_matrix()[0][0], 1.0);
        assert_eq!(re.window_matrix()[2][3], -1.0);
        re.set_ortho(vp, 1.0, 10.0);
        assert_eq!(re.window_matrix()[0][0], 1.0);
        assert_eq!(re.window_matrix()[3][3], 1.0);
        assert!(re.ortho);
    }

    #[test]
    fn test_swap_result() {
        let re = Render::new("r");
        let mut other = Some(RenderResult::empty(3, 3));
        re.swap_result(&mut other);
        assert!(other.is_none());
        assert_eq!(re.acquire_result_read().as_ref().unwrap().rectx, 3);
    }

    #[test]
    fn test_result_rgba8_before_render_is_black() {
        let mut re = Render::new("r");
        re.init_state(None, &settings(2, 2), None, 2, 2, None).unwrap();
        assert_eq!(re.result_rgba8(0), vec![0; 16]);
    }

    #[test]
    fn test_single_layer_push_pop() {
        let mut s = settings(4, 4);
        s.layers = vec![LayerSettings::new("A"), LayerSettings::new("B")];
        let mut re = Render::new("r");
        re.init_state(None, &s, None, 4, 4, None).unwrap();
        re.main_result_new().unwrap();

        re.single_layer_begin();
        re.init_state(None, &s, Some(1), 4, 4, None).unwrap();
        re.main_result_new().unwrap();
        {
            let mut guard = re.acquire_result_write();
            let rr = guard.as_mut().unwrap();
            assert_eq!(rr.layers.len(), 1);
            rr.layers[0].passes[0].rect.iter_mut().for_each(|v| *v = 1.0);
        }
        re.single_layer_end();

        let guard = re.acquire_result_read();
        let rr = guard.as_ref().unwrap();
        let names: Vec<_> = rr.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(rr.layer_pass("B", PassType::Combined, 0).unwrap()[0], 1.0);
    }

    #[test]
    fn test_tile_file_result_is_not_resident_until_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(8, 8);
        s.tile_file = true;
        s.temp_dir = Some(dir.path().to_path_buf());
        let mut re = Render::new("r");
        re.init_state(None, &s, None, 8, 8, None).unwrap();
        re.main_result_new().unwrap();
        {
            let guard = re.acquire_result_read();
            let rr = guard.as_ref().unwrap();
            assert!(rr.tile_file.is_some());
            assert!(!rr.layers[0].passes[0].is_resident());
        }
        re.main_result_end().unwrap();
        let guard = re.acquire_result_read();
        assert!(guard.as_ref().unwrap().layers[0].passes[0].is_resident());
    }

    #[test]
    fn test_break_flag() {
        let re = Render::new("r");
        assert!(!re.test_break());
        re.break_handle().store(true, Ordering::Relaxed);
        assert!(re.test_break());
        re.clear_break();
        assert!(!re.test_break());
    }
}
