//! Top-level render driver: single frames, animations and previews, the
//! composite / fields / blur / 3D stages, nested scene renders and output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use tessel_core::tile_file::is_dir_writable;
use tessel_core::{
    make_pic_path, FrameWriter, LayerSelector, LayerSettings, OutputImage, OutputSettings,
    PassType, Rect, RenderResult, RenderSettings, RenderStats, ReportList, StorageMode,
    TesselError, TesselResult, ViewSelector,
};

use crate::blur::merge_result_blur;
use crate::callbacks::RenderEvent;
use crate::external::{CompositeInput, Compositor, ConvertContext, RenderEngine, ShadingDatabase};
use crate::fields::{field_height, field_rect, merge_result_fields};
use crate::fullsample::do_merge_fullsample;
use crate::parts::tile_size;
use crate::registry::RenderRegistry;
use crate::render::Render;
use crate::scene::{Camera, NodeTree, Scene, SceneLibrary, Strip};
use crate::threads::threaded_tile_processor;

/// Frames of an animation render, `end` included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: i32,
    pub end: i32,
    pub step: i32,
}

impl FrameRange {
    pub fn new(start: i32, end: i32, step: i32) -> Self {
        Self { start, end, step }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(settings.frame_start, settings.frame_end, settings.frame_step())
    }
}

/// What an animation render did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimSummary {
    pub rendered: usize,
    /// Frames skipped because their output already existed.
    pub skipped: usize,
    pub cancelled: bool,
}

fn refuse(reports: &mut ReportList, message: &str) -> TesselResult<()> {
    reports.error(message);
    Err(TesselError::precondition(message))
}

/// Other scenes read by render-layer nodes of `scene`'s tree, each once,
/// in node order.
pub(crate) fn scenes_for_render(scene: &Scene) -> Vec<String> {
    let Some(tree) = scene.nodetree.as_ref() else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for name in tree.render_layer_scenes().flatten() {
        if name != scene.name && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Run the compositor on one view and store its output as the view's
/// display pixels.
pub(crate) fn composite_view(
    re: &Render,
    compositor: &dyn Compositor,
    tree: &NodeTree,
    scene: &str,
    view_id: usize,
    sample: u32,
    registry: &RenderRegistry,
) -> TesselResult<()> {
    let pixels = {
        let guard = re.result.read();
        let Some(rr) = guard.as_ref() else {
            return Ok(());
        };
        let input = CompositeInput {
            tree,
            scene,
            frame: re.settings.frame_current,
            view_id,
            sample,
            result: rr,
            registry,
        };
        compositor.execute(&input)?
    };
    let Some(pixels) = pixels else {
        return Ok(());
    };
    match re.result.write().as_mut() {
        Some(rr) => rr.rect_from_rgba_f32(view_id, &pixels),
        None => Ok(()),
    }
}

/// Premultiplied RGBA `src` over `dst`.
fn alpha_over(dst: &mut [f32], src: &[f32]) {
    dst.par_chunks_mut(4)
        .zip(src.par_chunks(4))
        .for_each(|(d, s)| {
            let mul = 1.0 - s[3];
            for c in 0..4 {
                d[c] = s[c] + mul * d[c];
            }
        });
}

/// Views placed next to each other, left to right.
fn side_by_side(images: &[OutputImage]) -> OutputImage {
    let width: u32 = images.iter().map(|i| i.width).sum();
    let height = images.iter().map(|i| i.height).max().unwrap_or(0);
    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    let mut x0 = 0usize;
    for image in images.iter().filter(|i| i.width > 0) {
        let stride = image.width as usize * 4;
        for (y, row) in image.rgba.chunks_exact(stride).enumerate() {
            let start = (y * width as usize + x0) * 4;
            rgba[start..start + stride].copy_from_slice(row);
        }
        x0 += image.width as usize;
    }
    OutputImage {
        width,
        height,
        rgba,
        stamp: images.first().and_then(|i| i.stamp.clone()),
    }
}

fn single_image(mut images: Vec<OutputImage>) -> Option<OutputImage> {
    match images.len() {
        0 => None,
        1 => images.pop(),
        _ => Some(side_by_side(&images)),
    }
}

/// Output files of one frame: one per view when views go to separate
/// files, otherwise a single file.
fn frame_paths(settings: &RenderSettings, frame: i32) -> Vec<PathBuf> {
    let output = &settings.output;
    let views = settings.active_views();
    if views.len() >= 2 && !output.multiview_file {
        views
            .iter()
            .map(|v| make_pic_path(&output.path, frame, &output.extension, &v.suffix))
            .collect()
    } else {
        vec![make_pic_path(&output.path, frame, &output.extension, "")]
    }
}

fn movie_path(output: &OutputSettings, start: i32, end: i32) -> PathBuf {
    PathBuf::from(format!(
        "{}{:04}-{:04}.{}",
        output.path.trim_end_matches('#'),
        start,
        end,
        output.extension.trim_start_matches('.')
    ))
}

fn ensure_parent_dir(path: &Path) -> TesselResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn touch(path: &Path) -> TesselResult<()> {
    ensure_parent_dir(path)?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(())
}

/// Remove placeholders left by `touch` for a frame that was never written.
fn remove_touched(paths: &[PathBuf]) {
    for path in paths {
        if std::fs::metadata(path).is_ok_and(|m| m.len() == 0) {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!("could not remove {}: {}", path.display(), err);
            }
        }
    }
}

/// Size of the written frame: the whole window for border renders that are
/// not cropped.
fn output_size(re: &Render) -> (i32, i32) {
    if re.settings.border.is_some() && !re.settings.crop {
        (re.winx, re.winy)
    } else {
        (re.rectx, re.recty)
    }
}

fn disprect_to_full_resolution(re: &mut Render) {
    re.disprect = Rect::from_size(re.winx, re.winy);
    re.rectx = re.winx;
    re.recty = re.winy;
}

fn fresh_result(re: &Render) -> TesselResult<RenderResult> {
    RenderResult::new(
        &re.layout,
        re.disprect,
        0,
        StorageMode::Memory,
        LayerSelector::All,
        ViewSelector::All,
    )
}

fn engine_render(re: &mut Render, scene: &Scene, engine: &dyn RenderEngine) -> TesselResult<()> {
    re.main_result_new()?;
    tracing::debug!("rendering {} with engine {}", scene.name, engine.name());
    re.engine_rendering = true;
    let rendered = engine.render(re, scene);
    re.engine_rendering = false;
    rendered?;
    re.main_result_end()
}

fn stamp_result(re: &mut Render) {
    let camera = re.camera.as_ref().map_or("<none>", |c| c.name.as_str());
    let text = format!(
        "Scene {} | Frame {} | Camera {} | Time {:.2}s",
        re.scene_name(),
        re.settings.frame_current,
        camera,
        re.stats.lastframetime
    );
    if let Some(rr) = re.result.write().as_mut() {
        rr.stamp = Some(text);
    }
}

/// Hand the finished frame to `writer`: appended for movies, otherwise one
/// file per entry of `paths`.
fn write_image_or_movie(
    re: &mut Render,
    writer: &mut dyn FrameWriter,
    frame: i32,
    paths: &[PathBuf],
) -> TesselResult<()> {
    let render_time = re.stats.lastframetime;
    let images: Vec<OutputImage> = re
        .acquire_result_views()
        .iter()
        .map(OutputImage::from_result_image)
        .collect();

    if writer.is_movie() {
        if let Some(image) = single_image(images) {
            writer.append(frame, &image)?;
            tracing::info!("Append frame {}", frame);
        }
    } else if paths.len() > 1 && paths.len() == images.len() {
        for (path, image) in paths.iter().zip(&images) {
            ensure_parent_dir(path)?;
            writer.write(path, image)?;
            tracing::info!("Saved: '{}'", path.display());
        }
    } else if let (Some(path), Some(image)) = (paths.first(), single_image(images)) {
        ensure_parent_dir(path)?;
        writer.write(path, &image)?;
        tracing::info!("Saved: '{}'", path.display());
    }

    re.stats.lastframetime = re.start_time.elapsed().as_secs_f64();
    tracing::info!(
        "Time: {:.2}s (Saving: {:.2}s)",
        re.stats.lastframetime,
        re.stats.lastframetime - render_time
    );
    Ok(())
}

/// Settings that may change from frame to frame of an animation.
fn refresh_anim_settings(re: &mut Render, scene: &Scene) {
    let src = &scene.settings;
    re.settings.frame_current = src.frame_current;
    re.settings.stamp = src.stamp;
    re.settings.freestyle = src.freestyle;
    if re.engine.is_none() {
        re.settings.motion_blur = src.motion_blur;
    }
    // a border render may have grown the display rect to the full frame
    re.disprect = src.display_rect(re.winx, re.winy);
    re.rectx = re.disprect.width();
    re.recty = re.disprect.height();

    re.stats.cfra = src.frame_current;
    re.stats.partsdone = 0;
    re.scene = Some(scene.clone());
}

/// Drives renders of the scenes in a library. Renders of other scenes,
/// needed for compositing, are kept in the registry.
pub struct RenderPipeline {
    library: Arc<SceneLibrary>,
    registry: Arc<RenderRegistry>,
}

impl RenderPipeline {
    pub fn new(library: SceneLibrary) -> Self {
        Self::with_registry(Arc::new(library), Arc::new(RenderRegistry::new()))
    }

    pub fn with_registry(library: Arc<SceneLibrary>, registry: Arc<RenderRegistry>) -> Self {
        Self { library, registry }
    }

    pub fn library(&self) -> &SceneLibrary {
        &self.library
    }

    pub fn registry(&self) -> &Arc<RenderRegistry> {
        &self.registry
    }

    fn scene(&self, name: &str) -> TesselResult<Scene> {
        self.library
            .scene(name)
            .cloned()
            .ok_or_else(|| TesselError::InvalidArgument(format!("unknown scene {}", name)))
    }

    fn scene_has_camera(&self, name: &str) -> bool {
        self.library.scene(name).is_some_and(|s| s.camera.is_some())
    }

    /// Every scene the frame depends on has a camera: sequencer scene strips
    /// without their own camera, and render-layer nodes when compositing.
    fn check_valid_camera(&self, scene: &Scene, camera_override: Option<&Camera>) -> bool {
        let own_camera = camera_override.is_some() || scene.camera.is_some();
        let mut check_comp = true;

        if scene.sequencer_active() {
            check_comp = false;
            for strip in &scene.strips {
                let Strip::Scene {
                    scene: name,
                    has_camera: false,
                } = strip
                else {
                    continue;
                };
                if *name == scene.name {
                    // the compositor may not need it
                    if !own_camera {
                        check_comp = true;
                    }
                } else if !self.scene_has_camera(name) {
                    return false;
                }
            }
        }

        if !check_comp {
            return true;
        }
        match scene.nodetree.as_ref() {
            Some(tree) if scene.settings.use_compositor && scene.use_nodes => {
                tree.render_layer_scenes().all(|name| match name {
                    Some(name) if name != scene.name => self.scene_has_camera(name),
                    _ => own_camera,
                })
            }
            _ => own_camera,
        }
    }

    /// Refuse settings the pipeline cannot render. The reason is added to
    /// `reports` and returned as a precondition error.
    pub fn is_rendering_allowed(
        &self,
        scene: &Scene,
        camera_override: Option<&Camera>,
        reports: &mut ReportList,
    ) -> TesselResult<()> {
        let settings = &scene.settings;
        let modes = settings.sample_modes();

        if settings.border.is_some_and(|b| b.is_degenerate()) {
            return refuse(reports, "No border area selected");
        }

        if let Some(name) = &settings.engine {
            if self.library.engine(name).is_none() {
                return refuse(reports, &format!("Unknown render engine {}", name));
            }
        }

        if modes.tile_file || modes.full_sample {
            let dir = settings.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
            if !is_dir_writable(&dir) {
                return refuse(reports, "Cannot save render buffers, check the temp default path");
            }
            if modes.full_sample && settings.edge {
                return refuse(reports, "Full sample does not support edge enhance");
            }
        }

        if settings.use_compositor && scene.use_nodes {
            let Some(tree) = scene.nodetree.as_ref() else {
                return refuse(reports, "No node tree in scene");
            };
            if !tree.has_composite_output() {
                return refuse(reports, "No render output node in scene");
            }
            if modes.full_sample && !scene.composite_needs_render(false) {
                return refuse(reports, "Full sample AA not supported without 3D rendering");
            }
        }

        if !self.check_valid_camera(scene, camera_override) {
            return refuse(reports, "No camera");
        }

        let camera = camera_override.or(scene.camera.as_ref());
        let panorama = settings.panorama || camera.is_some_and(|c| c.panorama);
        let ortho = settings.ortho || camera.is_some_and(|c| c.ortho);
        if panorama {
            if ortho {
                return refuse(reports, "No ortho render possible for panorama");
            }
            if settings.freestyle {
                return refuse(reports, "Panoramic camera not supported in Freestyle");
            }
        }

        let any_enabled = settings.layers.iter().enumerate().any(|(i, layer)| {
            layer.enabled || (settings.single_layer && i == settings.active_layer)
        });
        if !any_enabled {
            return refuse(reports, "All render layers are disabled");
        }
        Ok(())
    }

    /// Render frame `frame` of `scene_name` into `re`, optionally writing it
    /// through `writer`. `layer` renders only that layer, keeping the other
    /// layers of the previous result.
    pub fn render_frame(
        &self,
        re: &mut Render,
        scene_name: &str,
        layer: Option<usize>,
        camera_override: Option<&Camera>,
        frame: i32,
        writer: Option<&mut dyn FrameWriter>,
    ) -> TesselResult<()> {
        let mut scene = self.scene(scene_name)?;
        scene.settings.frame_current = frame;
        re.clear_break();
        self.is_rendering_allowed(&scene, camera_override, re.reports_mut())?;

        let outcome = self.render_single_frame(re, &scene, layer, camera_override, writer);
        let event = if outcome.is_err() || re.test_break() {
            RenderEvent::Cancel
        } else {
            RenderEvent::Complete
        };
        re.callbacks().on_event(event);
        outcome
    }

    fn render_single_frame(
        &self,
        re: &mut Render,
        scene: &Scene,
        layer: Option<usize>,
        camera_override: Option<&Camera>,
        writer: Option<&mut dyn FrameWriter>,
    ) -> TesselResult<()> {
        self.initialize_from_scene(re, scene, layer, camera_override)?;
        re.callbacks().on_event(RenderEvent::Pre);
        self.do_render_all_options(re, scene)?;

        if let Some(writer) = writer {
            if !re.test_break() {
                if writer.is_movie() {
                    re.reports
                        .error("Cannot write a single file with an animation format selected");
                } else {
                    let paths = frame_paths(&re.settings, scene.settings.frame_current);
                    write_image_or_movie(re, writer, scene.settings.frame_current, &paths)?;
                }
            }
        }
        re.callbacks().on_event(RenderEvent::Post);
        Ok(())
    }

    /// Render every `range.step`-th frame from `range.start` to `range.end`
    /// and write them through `writer`.
    pub fn render_anim(
        &self,
        re: &mut Render,
        scene_name: &str,
        camera_override: Option<&Camera>,
        range: FrameRange,
        writer: &mut dyn FrameWriter,
    ) -> TesselResult<AnimSummary> {
        let mut scene = self.scene(scene_name)?;
        scene.settings.frame_current = range.start;
        re.clear_break();
        self.is_rendering_allowed(&scene, camera_override, re.reports_mut())?;
        self.initialize_from_scene(re, &scene, None, camera_override)?;

        let is_movie = writer.is_movie();
        if is_movie {
            let (w, h) = output_size(re);
            let views = re.layout.views.len().max(1) as i32;
            let path = movie_path(&re.settings.output, range.start, range.end);
            writer.start(&path, (w * views).max(0) as u32, h.max(0) as u32)?;
        }

        re.animation = true;
        let mut summary = AnimSummary::default();
        let outcome = self.render_frames(re, &mut scene, range, writer, &mut summary);
        re.animation = false;

        let ended = if is_movie { writer.end() } else { Ok(()) };
        if summary.skipped > 0 && summary.rendered == 0 {
            re.reports.info("No frames rendered, skipped to not overwrite");
        }
        summary.cancelled |= outcome.is_err();
        let event = if summary.cancelled {
            RenderEvent::Cancel
        } else {
            RenderEvent::Complete
        };
        re.callbacks().on_event(event);

        outcome?;
        ended?;
        Ok(summary)
    }

    fn render_frames(
        &self,
        re: &mut Render,
        scene: &mut Scene,
        range: FrameRange,
        writer: &mut dyn FrameWriter,
        summary: &mut AnimSummary,
    ) -> TesselResult<()> {
        let is_movie = writer.is_movie();
        let output = re.settings.output.clone();
        let step = range.step.max(1) as usize;

        for cfra in (range.start..=range.end).step_by(step) {
            scene.settings.frame_current = cfra;
            refresh_anim_settings(re, scene);

            let paths = frame_paths(&re.settings, cfra);
            if !is_movie {
                if output.no_overwrite && paths.iter().all(|p| p.exists()) {
                    tracing::info!("skipping existing frame \"{}\"", paths[0].display());
                    summary.skipped += 1;
                    continue;
                }
                if output.touch {
                    for path in paths.iter().filter(|p| !p.exists()) {
                        touch(path)?;
                    }
                }
            }

            re.callbacks().on_event(RenderEvent::Pre);
            let rendered = self.do_render_all_options(re, scene);
            summary.rendered += 1;

            let written = match rendered {
                Ok(()) if !re.test_break() => write_image_or_movie(re, writer, cfra, &paths),
                other => other,
            };
            if written.is_err() || re.test_break() {
                summary.cancelled = true;
                if !is_movie && output.touch {
                    remove_touched(&paths);
                }
                return written;
            }
            re.callbacks().on_event(RenderEvent::Post);
        }
        Ok(())
    }

    /// Render the 3D scene only, keeping the previous result when the size
    /// did not change.
    pub fn preview_render(&self, re: &mut Render, scene_name: &str) -> TesselResult<()> {
        let scene = self.scene(scene_name)?;
        let mut settings = scene.settings.clone();
        settings.preview = true;
        let (winx, winy) = settings.window_size();

        re.scene = Some(scene.clone());
        re.stats.scene_name = scene.name.clone();
        re.init_state(None, &settings, None, winx, winy, None)?;
        self.validate_render_settings(re)?;

        let Some(camera) = scene.camera.clone() else {
            return refuse(&mut re.reports, "Cannot render, no camera");
        };
        re.set_camera(&camera);
        self.do_render_3d(re, &scene)
    }

    /// One tile pass over an already initialised render with converted data
    /// supplied by the caller.
    pub fn tile_processor(&self, re: &mut Render, db: &mut dyn ShadingDatabase) -> TesselResult<()> {
        re.main_result_new()?;
        re.stats.partsdone = 0;
        re.start_time = Instant::now();

        let processed = threaded_tile_processor(re, db, false);

        re.stats.lastframetime = re.start_time.elapsed().as_secs_f64();
        re.stats_draw();
        let ended = re.main_result_end();
        processed.and(ended)
    }

    /// Filter the kept full-sample buffers of `re` into its display rects
    /// again, re-running the compositor per sample.
    pub fn merge_full_sample(&self, re: &mut Render, scene_name: &str) -> TesselResult<()> {
        let scene = self.scene(scene_name)?;
        if !re.modes.full_sample || re.sample_files.is_empty() {
            return refuse(&mut re.reports, "No full sample buffers to merge");
        }
        re.display_init_result();
        do_merge_fullsample(re, &scene, &self.library, &self.registry, scene.uses_compositor())
    }

    fn initialize_from_scene(
        &self,
        re: &mut Render,
        scene: &Scene,
        layer: Option<usize>,
        camera_override: Option<&Camera>,
    ) -> TesselResult<()> {
        let (winx, winy) = scene.settings.window_size();
        let disprect = scene.settings.display_rect(winx, winy);

        re.scene = Some(scene.clone());
        re.camera = camera_override.cloned().or_else(|| scene.camera.clone());
        re.stats = RenderStats {
            scene_name: scene.name.clone(),
            cfra: scene.settings.frame_current,
            ..RenderStats::default()
        };

        if layer.is_some() || scene.settings.single_layer {
            re.single_layer_begin();
        }
        re.init_state(None, &scene.settings, layer, winx, winy, Some(disprect))?;
        self.validate_render_settings(re)?;
        re.display_init_result();
        Ok(())
    }

    fn validate_render_settings(&self, re: &mut Render) -> TesselResult<()> {
        match re.settings.engine.clone() {
            Some(name) => {
                if re.engine_name() != Some(name.as_str()) {
                    let Some(engine) = self.library.engine(&name) else {
                        return refuse(&mut re.reports, &format!("Unknown render engine {}", name));
                    };
                    re.set_engine(Some(Arc::clone(engine)));
                }
                // external engines sample and spill on their own
                re.settings.full_sample = false;
                re.settings.tile_file = false;
                re.settings.fields = None;
                re.settings.motion_blur = None;
                re.modes = re.settings.sample_modes();
            }
            None => re.set_engine(None),
        }

        if re.settings.fields.is_some() && re.modes.full_sample {
            re.reports
                .warning("Full sample is not supported with fields, disabled");
            re.settings.full_sample = false;
            re.modes = re.settings.sample_modes();
        }
        Ok(())
    }

    fn do_render_all_options(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        re.start_time = Instant::now();

        let engine = re.engine.clone().filter(|e| e.handles_postprocess());
        if let Some(engine) = engine {
            engine_render(re, scene, engine.as_ref())?;
        } else if scene.sequencer_active() {
            if !re.test_break() {
                self.do_render_seq(re, scene)?;
            }
            re.stats_draw();
            re.display_draw_result(re.actview);
        } else {
            self.do_render_composite_fields_blur_3d(re, scene)?;
        }

        re.stats.lastframetime = re.start_time.elapsed().as_secs_f64();
        re.stats_draw();

        if re.settings.stamp {
            stamp_result(re);
            re.display_draw_result(re.actview);
        }
        Ok(())
    }

    fn do_render_seq(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        let (width, height) = output_size(re);
        let mut rr = RenderResult::new(
            &re.layout,
            Rect::from_size(width, height),
            0,
            StorageMode::Memory,
            LayerSelector::All,
            ViewSelector::All,
        )?;

        let frame = re.settings.frame_current;
        let pixels = match self.library.sequencer.as_deref() {
            Some(sequencer) => sequencer.render(scene, frame, width, height)?,
            None => {
                tracing::warn!("no sequencer available, frame {} left black", frame);
                None
            }
        };
        match pixels {
            Some(pixels) => {
                for view in 0..rr.views.len() {
                    rr.rect_from_rgba_f32(view, &pixels)?;
                }
            }
            None => rr.fill_zero(),
        }

        *re.result.write() = Some(rr);
        re.callbacks().progress(1.0);
        Ok(())
    }

    fn do_render_composite_fields_blur_3d(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        if scene.composite_needs_render(true) {
            self.do_render_fields_blur_3d(re, scene)?;
        } else {
            re.stats.cfra = re.settings.frame_current;
            if !re.settings.crop {
                disprect_to_full_resolution(re);
            }
            let rr = fresh_result(re)?;
            *re.result.write() = Some(rr);
        }

        re.single_layer_end();

        if !re.test_break() {
            match scene.nodetree.as_ref().filter(|_| scene.uses_compositor()) {
                Some(tree) => {
                    if !re.settings.single_layer {
                        self.ntree_render_scenes(re, scene)?;
                    }
                    if !re.test_break() {
                        self.composite(re, scene, tree)?;
                    }
                }
                None if re.modes.full_sample => {
                    do_merge_fullsample(re, scene, &self.library, &self.registry, false)?;
                }
                None => {}
            }
        }

        // full-sample passes only become resident when a sample is read
        if re.modes.full_sample && re.test_break() {
            re.read_sample(0)?;
        }

        re.display_draw_result(re.actview);
        Ok(())
    }

    fn composite(&self, re: &mut Render, scene: &Scene, tree: &NodeTree) -> TesselResult<()> {
        if re.modes.full_sample {
            return do_merge_fullsample(re, scene, &self.library, &self.registry, true);
        }
        let Some(compositor) = self.library.compositor.as_deref() else {
            tracing::warn!("scene {} uses nodes but no compositor is available", scene.name);
            return Ok(());
        };
        for view in 0..re.layout.views.len() {
            composite_view(re, compositor, tree, &scene.name, view, 0, &self.registry)?;
        }
        Ok(())
    }

    /// Render the other scenes read by render-layer nodes, each into its own
    /// registry entry.
    fn ntree_render_scenes(&self, re: &Render, scene: &Scene) -> TesselResult<()> {
        let frame = re.settings.frame_current;
        for name in scenes_for_render(scene) {
            let Some(other) = self.library.scene(&name) else {
                tracing::warn!("render layer node reads unknown scene {}", name);
                continue;
            };
            self.render_scene(re, other, frame)?;
            if re.test_break() {
                break;
            }
        }
        Ok(())
    }

    fn render_scene(&self, re: &Render, scene: &Scene, frame: i32) -> TesselResult<()> {
        let handle = self.registry.new_render(&scene.name);
        let mut resc = handle.lock();

        let mut settings = scene.settings.clone();
        settings.frame_current = frame;
        let mut scene = scene.clone();
        scene.settings.frame_current = frame;

        resc.scene = Some(scene.clone());
        resc.camera = scene.camera.clone();
        resc.stats.scene_name = scene.name.clone();
        resc.stats.cfra = frame;
        resc.init_state(Some(re), &settings, None, re.winx, re.winy, Some(re.disprect))?;
        resc.set_callbacks(Arc::clone(re.callbacks()));
        resc.share_break(re.break_handle());

        tracing::debug!("rendering scene {} for compositing", scene.name);
        self.do_render_fields_blur_3d(&mut resc, &scene)
    }

    fn do_render_fields_blur_3d(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        let Some(camera) = re.camera.clone() else {
            re.reports.error("Cannot render, no camera");
            re.request_break();
            return Err(TesselError::precondition("Cannot render, no camera"));
        };
        re.set_camera(&camera);

        if re.settings.fields.is_some() {
            self.do_render_fields_3d(re, scene, &camera)?;
        } else if re.settings.motion_blur_enabled() && !re.modes.full_sample {
            self.do_render_blur_3d(re, scene)?;
        } else {
            self.do_render_3d(re, scene)?;
        }

        if re.settings.border.is_none() || re.result.read().is_none() {
            return Ok(());
        }
        if re.settings.crop {
            // offsets are relative to the cropped frame from here on
            if let Some(rr) = re.result.write().as_mut() {
                rr.xof = 0;
                rr.yof = 0;
            }
            return Ok(());
        }

        disprect_to_full_resolution(re);
        let mut full = fresh_result(re)?;
        {
            let mut guard = re.result.write();
            if let Some(border) = guard.as_ref() {
                full.merge(border);
            }
            *guard = Some(full);
        }
        re.display_init_result();
        re.display_draw_result(re.actview);
        Ok(())
    }

    fn do_render_fields_3d(&self, re: &mut Render, scene: &Scene, camera: &Camera) -> TesselResult<()> {
        let fields = re.settings.fields.unwrap_or_default();
        let (winy, recty, disprect) = (re.winy, re.recty, re.disprect);

        re.winy = field_height(winy);
        re.disprect = field_rect(disprect);
        re.recty = re.disprect.height();

        let rendered = self.render_field_pair(re, scene, camera, fields.still);

        re.winy = winy;
        re.recty = recty;
        re.disprect = disprect;
        re.second_field = false;
        re.field_offs = 0.0;
        re.stats.curfield = 0;
        let (first, second) = rendered?;

        let mut rr = fresh_result(re)?;
        if let Some(first) = first.as_ref() {
            match second.as_ref() {
                Some(second) if fields.odd => merge_result_fields(&mut rr, second, Some(first)),
                second => merge_result_fields(&mut rr, first, second),
            }
        }
        *re.result.write() = Some(rr);
        re.display_draw_result(re.actview);
        Ok(())
    }

    /// Both fields at half height. The second one is dropped when the render
    /// was cancelled before it finished.
    fn render_field_pair(
        &self,
        re: &mut Render,
        scene: &Scene,
        camera: &Camera,
        still: bool,
    ) -> TesselResult<(Option<RenderResult>, Option<RenderResult>)> {
        re.stats.curfield = 1;
        re.field_offs = 0.0;
        re.set_camera(camera);
        self.render_field(re, scene)?;
        let first = re.result.write().take();

        if re.test_break() {
            return Ok((first, None));
        }

        re.stats.curfield = 2;
        re.second_field = true;
        if !still {
            re.field_offs = 0.5;
        }
        re.set_camera(camera);
        self.render_field(re, scene)?;
        let second = re.result.write().take().filter(|_| !re.test_break());
        Ok((first, second))
    }

    fn render_field(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        if re.settings.motion_blur_enabled() && !re.modes.full_sample {
            self.do_render_blur_3d(re, scene)
        } else {
            self.do_render_3d(re, scene)
        }
    }

    fn do_render_blur_3d(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        let Some(mblur) = re.settings.motion_blur else {
            return self.do_render_3d(re, scene);
        };
        let samples = mblur.samples.max(1);
        let mut acc = fresh_result(re)?;
        let mut outcome = Ok(());

        for i in 1..=samples {
            re.mblur_offs = mblur.shutter * i as f32 / samples as f32;
            re.stats.curblur = i;
            if let Err(err) = self.do_render_3d(re, scene) {
                outcome = Err(err);
                break;
            }
            if let Some(rr) = re.result.read().as_ref() {
                merge_result_blur(&mut acc, rr, 1.0 / i as f32, true);
            }
            if re.test_break() {
                break;
            }
        }

        *re.result.write() = Some(acc);
        re.mblur_offs = 0.0;
        re.stats.curblur = 0;
        re.display_draw_result(re.actview);
        outcome
    }

    fn do_render_3d(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        if let Some(engine) = re.engine.clone() {
            return engine_render(re, scene, engine.as_ref());
        }

        re.tile = tile_size(re.disprect, re.threads, re.settings.tile_size);
        re.main_result_new()?;
        let rendered = self.render_views(re, scene);
        re.actview = 0;
        re.current_sample = None;
        let ended = re.main_result_end();
        rendered.and(ended)?;

        if re.settings.freestyle && !re.test_break() {
            for view in 0..re.layout.views.len() {
                self.add_freestyle(re, scene, view)?;
            }
        }
        Ok(())
    }

    fn render_views(&self, re: &mut Render, scene: &Scene) -> TesselResult<()> {
        let samples = if re.modes.full_sample {
            re.osa.max(1) as usize
        } else {
            1
        };

        for view in 0..re.layout.views.len() {
            re.actview = view;
            let ctx = ConvertContext {
                scene: scene.name.clone(),
                frame: re.settings.frame_current as f64 + (re.mblur_offs + re.field_offs) as f64,
                view_id: view,
                view_name: re.layout.views[view].clone(),
                viewplane: re.viewplane,
                winmat: re.winmat,
                viewmat: re.viewmat,
                winx: re.winx,
                winy: re.winy,
                disprect: re.disprect,
                osa: re.osa,
                second_field: re.second_field,
            };

            re.callbacks().draw_lock(true);
            let converted = scene.database.convert(&ctx);
            re.callbacks().draw_lock(false);
            let mut db = converted?;

            for sample in 0..samples {
                re.current_sample = re.modes.full_sample.then_some(sample);
                threaded_tile_processor(re, &mut *db, true)?;
                if re.test_break() {
                    break;
                }
            }
            re.current_sample = None;

            if re.test_break() {
                break;
            }
        }
        Ok(())
    }

    /// Composite stroke overlays over the combined pass of every layer with
    /// strokes enabled. Passes that are not resident are left alone.
    fn add_freestyle(&self, re: &mut Render, scene: &Scene, view: usize) -> TesselResult<()> {
        let Some(strokes) = self.library.stroke_renderer.as_deref() else {
            return Ok(());
        };
        let layers: Vec<LayerSettings> = re
            .settings
            .layers
            .iter()
            .filter(|l| l.enabled && l.freestyle)
            .cloned()
            .collect();

        for layer in &layers {
            let overlay = {
                let guard = re.result.read();
                let Some(rr) = guard.as_ref() else {
                    return Ok(());
                };
                strokes.render_strokes(scene, layer, rr, view)?
            };
            let Some(overlay) = overlay else {
                continue;
            };

            let mut guard = re.result.write();
            let Some(pass) = guard
                .as_mut()
                .and_then(|rr| rr.get_layer_mut(&layer.name))
                .and_then(|l| l.pass_mut(PassType::Combined, view))
            else {
                continue;
            };
            if !pass.is_resident() || pass.rect.len() != overlay.len() {
                tracing::debug!("strokes of layer {} skipped", layer.name);
                continue;
            }
            alpha_over(&mut pass.rect, &overlay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{BorderSettings, ViewSettings};

    use crate::external::{RenderEngine, SceneDatabase, TileContext};
    use crate::scene::CompositeNode;

    struct Flat;

    struct Idle;

    impl RenderEngine for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        fn render(&self, _re: &mut Render, _scene: &Scene) -> TesselResult<()> {
            Ok(())
        }
    }

    impl ShadingDatabase for Flat {
        fn shade_tile(&self, _tile: &TileContext, _result: &mut RenderResult) -> TesselResult<()> {
            Ok(())
        }
    }

    impl SceneDatabase for Flat {
        fn convert(&self, _ctx: &ConvertContext) -> TesselResult<Box<dyn ShadingDatabase>> {
            Ok(Box::new(Flat))
        }
    }

    fn scene(name: &str) -> Scene {
        Scene::new(name, RenderSettings::with_size(32, 32), Arc::new(Flat))
    }

    fn pipeline(scenes: Vec<Scene>) -> RenderPipeline {
        let mut library = SceneLibrary::new();
        library.scenes = scenes;
        RenderPipeline::new(library)
    }

    fn refusal(pipe: &RenderPipeline, sc: &Scene) -> Option<String> {
        let mut reports = ReportList::new();
        match pipe.is_rendering_allowed(sc, None, &mut reports) {
            Ok(()) => None,
            Err(err) => {
                assert!(matches!(err, TesselError::Precondition(_)));
                reports.last_error().map(str::to_string)
            }
        }
    }

    #[test]
    fn test_default_scene_is_allowed() {
        let sc = scene("Main");
        assert_eq!(refusal(&pipeline(vec![sc.clone()]), &sc), None);
    }

    #[test]
    fn test_degenerate_border_refused() {
        let mut sc = scene("Main");
        sc.settings.border = Some(BorderSettings {
            xmin: 0.5,
            xmax: 0.5,
            ymin: 0.0,
            ymax: 1.0,
        });
        assert_eq!(
            refusal(&pipeline(vec![]), &sc).as_deref(),
            Some("No border area selected")
        );
    }

    #[test]
    fn test_unwritable_temp_dir_refused() {
        let mut sc = scene("Main");
        sc.settings.tile_file = true;
        sc.settings.temp_dir = Some(PathBuf::from("/nonexistent/tessel/tmp"));
        assert_eq!(
            refusal(&pipeline(vec![]), &sc).as_deref(),
            Some("Cannot save render buffers, check the temp default path")
        );
    }

    #[test]
    fn test_unknown_engine_refused() {
        let mut sc = scene("Main");
        sc.settings.engine = Some("missing".into());
        let mut library = SceneLibrary::new();
        library.engines.push(Arc::new(Idle));
        let pipe = RenderPipeline::new(library);
        assert_eq!(
            refusal(&pipe, &sc).as_deref(),
            Some("Unknown render engine missing")
        );

        sc.settings.engine = Some("idle".into());
        assert_eq!(refusal(&pipe, &sc), None);
    }

    #[test]
    fn test_full_sample_with_edge_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut sc = scene("Main");
        sc.settings.osa = 8;
        sc.settings.full_sample = true;
        sc.settings.edge = true;
        sc.settings.temp_dir = Some(dir.path().to_path_buf());
        assert_eq!(
            refusal(&pipeline(vec![]), &sc).as_deref(),
            Some("Full sample does not support edge enhance")
        );
    }

    #[test]
    fn test_compositor_checks() {
        let mut sc = scene("Main");
        sc.settings.use_compositor = true;
        sc.use_nodes = true;
        let pipe = pipeline(vec![]);
        assert_eq!(refusal(&pipe, &sc).as_deref(), Some("No node tree in scene"));

        sc.nodetree = Some(NodeTree {
            nodes: vec![CompositeNode::RenderLayers { scene: None }],
        });
        assert_eq!(
            refusal(&pipe, &sc).as_deref(),
            Some("No render output node in scene")
        );

        sc.nodetree = Some(NodeTree {
            nodes: vec![
                CompositeNode::RenderLayers { scene: None },
                CompositeNode::Composite,
            ],
        });
        assert_eq!(refusal(&pipe, &sc), None);
    }

    #[test]
    fn test_full_sample_needs_3d() {
        let dir = tempfile::tempdir().unwrap();
        let mut sc = scene("Main");
        sc.settings.osa = 5;
        sc.settings.full_sample = true;
        sc.settings.temp_dir = Some(dir.path().to_path_buf());
        sc.settings.use_compositor = true;
        sc.use_nodes = true;
        sc.nodetree = Some(NodeTree {
            nodes: vec![CompositeNode::Composite],
        });
        assert_eq!(
            refusal(&pipeline(vec![]), &sc).as_deref(),
            Some("Full sample AA not supported without 3D rendering")
        );
    }

    #[test]
    fn test_missing_camera_refused() {
        let mut sc = scene("Main");
        sc.camera = None;
        let pipe = pipeline(vec![]);
        assert_eq!(refusal(&pipe, &sc).as_deref(), Some("No camera"));

        let mut reports = ReportList::new();
        let cam = Camera::perspective("Override", 1.0);
        assert!(pipe.is_rendering_allowed(&sc, Some(&cam), &mut reports).is_ok());
    }

    #[test]
    fn test_render_layer_scenes_need_cameras() {
        let mut other = scene("Other");
        other.camera = None;
        let mut sc = scene("Main");
        sc.settings.use_compositor = true;
        sc.use_nodes = true;
        sc.nodetree = Some(NodeTree {
            nodes: vec![
                CompositeNode::RenderLayers {
                    scene: Some("Other".into()),
                },
                CompositeNode::Composite,
            ],
        });
        let pipe = pipeline(vec![sc.clone(), other]);
        assert_eq!(refusal(&pipe, &sc).as_deref(), Some("No camera"));
    }

    #[test]
    fn test_sequencer_strip_scene_needs_camera() {
        let mut strip_scene = scene("Strip");
        strip_scene.camera = None;
        let mut sc = scene("Edit");
        sc.camera = None;
        sc.settings.use_sequencer = true;
        sc.strips.push(Strip::Image {
            path: "title.png".into(),
        });
        let pipe = pipeline(vec![strip_scene.clone()]);
        // image strips need no camera at all
        assert_eq!(refusal(&pipe, &sc), None);

        sc.strips.push(Strip::Scene {
            scene: "Strip".into(),
            has_camera: false,
        });
        assert_eq!(refusal(&pipe, &sc).as_deref(), Some("No camera"));
    }

    #[test]
    fn test_panorama_restrictions() {
        let mut sc = scene("Main");
        sc.settings.panorama = true;
        sc.settings.ortho = true;
        let pipe = pipeline(vec![]);
        assert_eq!(
            refusal(&pipe, &sc).as_deref(),
            Some("No ortho render possible for panorama")
        );
        sc.settings.ortho = false;
        sc.settings.freestyle = true;
        assert_eq!(
            refusal(&pipe, &sc).as_deref(),
            Some("Panoramic camera not supported in Freestyle")
        );
    }

    #[test]
    fn test_disabled_layers_refused() {
        let mut sc = scene("Main");
        sc.settings.layers[0].enabled = false;
        let pipe = pipeline(vec![]);
        assert_eq!(
            refusal(&pipe, &sc).as_deref(),
            Some("All render layers are disabled")
        );
        // a single-layer render forces its layer on
        sc.settings.single_layer = true;
        assert_eq!(refusal(&pipe, &sc), None);
    }

    #[test]
    fn test_scenes_for_render_dedups_and_skips_self() {
        let mut sc = scene("Main");
        sc.nodetree = Some(NodeTree {
            nodes: vec![
                CompositeNode::RenderLayers { scene: None },
                CompositeNode::RenderLayers {
                    scene: Some("B".into()),
                },
                CompositeNode::RenderLayers {
                    scene: Some("Main".into()),
                },
                CompositeNode::RenderLayers {
                    scene: Some("A".into()),
                },
                CompositeNode::RenderLayers {
                    scene: Some("B".into()),
                },
            ],
        });
        assert_eq!(scenes_for_render(&sc), vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn test_frame_paths_per_view() {
        let mut settings = RenderSettings::with_size(4, 4);
        settings.output.path = "out/f_##".into();
        assert_eq!(frame_paths(&settings, 3), vec![PathBuf::from("out/f_03.png")]);

        settings.multiview = true;
        settings.views = vec![
            ViewSettings {
                name: "left".into(),
                suffix: "_L".into(),
                enabled: true,
            },
            ViewSettings {
                name: "right".into(),
                suffix: "_R".into(),
                enabled: true,
            },
        ];
        assert_eq!(
            frame_paths(&settings, 3),
            vec![PathBuf::from("out/f_03_L.png"), PathBuf::from("out/f_03_R.png")]
        );
        settings.output.multiview_file = true;
        assert_eq!(frame_paths(&settings, 3).len(), 1);
    }

    #[test]
    fn test_movie_path_covers_range() {
        let output = OutputSettings {
            path: "out/anim_####".into(),
            ..OutputSettings::default()
        };
        assert_eq!(movie_path(&output, 1, 24), PathBuf::from("out/anim_0001-0024.png"));
    }

    #[test]
    fn test_side_by_side() {
        let left = OutputImage {
            width: 1,
            height: 1,
            rgba: vec![1, 2, 3, 4],
            stamp: None,
        };
        let right = OutputImage {
            width: 1,
            height: 1,
            rgba: vec![5, 6, 7, 8],
            stamp: None,
        };
        let both = side_by_side(&[left, right]);
        assert_eq!((both.width, both.height), (2, 1));
        assert_eq!(both.rgba, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_alpha_over() {
        let mut dst = vec![0.0, 0.0, 1.0, 1.0, 0.2, 0.2, 0.2, 1.0];
        let src = vec![0.5, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        alpha_over(&mut dst, &src);
        assert_eq!(dst, vec![0.5, 0.0, 0.5, 1.0, 0.2, 0.2, 0.2, 1.0]);
    }

    #[test]
    fn test_touch_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("f_0001.png");
        touch(&path).unwrap();
        assert!(path.exists());
        remove_touched(&[path.clone()]);
        assert!(!path.exists());
    }
}
