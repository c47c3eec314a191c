//! The render result store.
//!
//! A [`RenderResult`] is a rectangular set of float pixel buffers organised
//! as layers of passes, one pass per (layer, pass type, view), plus per-view
//! display buffers. Part results are small results covering one tile; they
//! are merged into the frame result by pixel position.

use serde::{Deserialize, Serialize};

use crate::config::RenderSettings;
use crate::rect::Rect;
use crate::tile_file::TileFile;
use crate::{TesselError, TesselResult};

/// Depth written into freshly allocated Z passes.
pub const Z_CLEAR: f32 = 1.0e10;

/// Name of the left eye view in stereo renders.
pub const STEREO_LEFT_NAME: &str = "left";
/// Name of the right eye view in stereo renders.
pub const STEREO_RIGHT_NAME: &str = "right";

/// Kind of data stored in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    /// Beauty RGBA.
    Combined,
    Z,
    Normal,
    Vector,
    Uv,
    Diffuse,
    Specular,
    Shadow,
    Ao,
    Emit,
    Mist,
    ObjectIndex,
}

impl PassType {
    /// Floats per pixel.
    pub fn channels(self) -> usize {
        match self {
            PassType::Combined | PassType::Vector => 4,
            PassType::Normal
            | PassType::Uv
            | PassType::Diffuse
            | PassType::Specular
            | PassType::Shadow
            | PassType::Ao
            | PassType::Emit => 3,
            PassType::Z | PassType::Mist | PassType::ObjectIndex => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PassType::Combined => "Combined",
            PassType::Z => "Depth",
            PassType::Normal => "Normal",
            PassType::Vector => "Vector",
            PassType::Uv => "UV",
            PassType::Diffuse => "Diffuse",
            PassType::Specular => "Specular",
            PassType::Shadow => "Shadow",
            PassType::Ao => "AO",
            PassType::Emit => "Emit",
            PassType::Mist => "Mist",
            PassType::ObjectIndex => "IndexOB",
        }
    }

    fn clear_value(self) -> f32 {
        match self {
            PassType::Z => Z_CLEAR,
            _ => 0.0,
        }
    }
}

/// Where pass pixels live while a frame is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    #[default]
    Memory,
    /// Passes stay unallocated; finished parts are spilled to a [`TileFile`].
    TileFile,
}

/// Which render layers a new result gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSelector {
    All,
    Single(usize),
}

/// Which views a new result gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSelector {
    All,
    One(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerLayout {
    pub name: String,
    pub passes: Vec<PassType>,
}

/// Layers, passes and views a result is built from, derived once per render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLayout {
    pub layers: Vec<LayerLayout>,
    pub views: Vec<String>,
}

impl ResultLayout {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        let layers = settings
            .layers
            .iter()
            .enumerate()
            .filter(|(i, layer)| {
                if settings.single_layer {
                    *i == settings.active_layer
                } else {
                    layer.enabled
                }
            })
            .map(|(_, layer)| {
                let mut passes = vec![PassType::Combined, PassType::Z];
                for pass in &layer.passes {
                    if !passes.contains(pass) {
                        passes.push(*pass);
                    }
                }
                LayerLayout {
                    name: layer.name.clone(),
                    passes,
                }
            })
            .collect();

        let mut views: Vec<String> = settings
            .active_views()
            .into_iter()
            .map(|v| v.name.clone())
            .collect();
        if views.is_empty() {
            views.push(String::new());
        }

        Self { layers, views }
    }

    /// A single unnamed view with one layer of combined + Z.
    pub fn simple(layer_name: &str) -> Self {
        Self {
            layers: vec![LayerLayout {
                name: layer_name.to_string(),
                passes: vec![PassType::Combined, PassType::Z],
            }],
            views: vec![String::new()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub pass_type: PassType,
    pub view_id: usize,
    pub channels: usize,
    /// Empty while the pass is not resident (tile-file storage).
    pub rect: Vec<f32>,
}

impl RenderPass {
    pub fn is_resident(&self) -> bool {
        !self.rect.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderLayer {
    pub name: String,
    pub passes: Vec<RenderPass>,
}

impl RenderLayer {
    /// Pixels of a pass, preferring the one for `view_id`. Without an exact
    /// view match the first pass of that type is returned.
    pub fn pass(&self, pass_type: PassType, view_id: usize) -> Option<&[f32]> {
        let mut found = None;
        for pass in self.passes.iter().rev() {
            if pass.pass_type == pass_type {
                found = Some(pass.rect.as_slice());
                if pass.view_id == view_id {
                    break;
                }
            }
        }
        found
    }

    pub fn pass_mut(&mut self, pass_type: PassType, view_id: usize) -> Option<&mut RenderPass> {
        self.passes
            .iter_mut()
            .find(|p| p.pass_type == pass_type && p.view_id == view_id)
    }
}

/// One eye/camera's display buffers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderView {
    pub name: String,
    /// Composited or sequenced RGBA float output.
    pub rectf: Option<Vec<f32>>,
    pub rectz: Option<Vec<f32>>,
    /// Packed 8-bit RGBA (`u32::from_le_bytes([r, g, b, a])`).
    pub rect32: Option<Vec<u32>>,
}

#[derive(Debug)]
pub struct RenderResult {
    pub rectx: i32,
    pub recty: i32,
    /// Offset of this result inside the full frame.
    pub xof: i32,
    pub yof: i32,
    /// Pixel rectangle covered, in frame coordinates.
    pub tilerect: Rect,
    /// Border pixels rendered only as filter support; never merged.
    pub crop: i32,
    pub layers: Vec<RenderLayer>,
    pub views: Vec<RenderView>,
    pub storage: StorageMode,
    pub tile_file: Option<TileFile>,
    /// Stamp text burnt in by the driver.
    pub stamp: Option<String>,
}

/// A copy of the pixels a display or writer needs for one view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultImage {
    pub rectx: i32,
    pub recty: i32,
    pub xof: i32,
    pub yof: i32,
    pub rectf: Option<Vec<f32>>,
    pub rectz: Option<Vec<f32>>,
    pub rect32: Option<Vec<u32>>,
    pub have_combined: bool,
    pub stamp: Option<String>,
}

impl ResultImage {
    /// 8-bit RGBA pixels, black when nothing has been rendered.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let count = (self.rectx.max(0) * self.recty.max(0)) as usize;
        if let Some(rect32) = &self.rect32 {
            return rect32.iter().flat_map(|p| p.to_le_bytes()).collect();
        }
        match &self.rectf {
            Some(rectf) => rectf.iter().map(|v| float_to_byte(*v)).collect(),
            None => vec![0; count * 4],
        }
    }
}

fn float_to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

pub(crate) fn alloc_rect(len: usize, value: f32) -> TesselResult<Vec<f32>> {
    let mut rect = Vec::new();
    rect.try_reserve_exact(len).map_err(|e| {
        TesselError::Allocation(format!("{} floats for render pass: {}", len, e))
    })?;
    rect.resize(len, value);
    Ok(rect)
}

impl RenderResult {
    /// Result with dimensions only, no layers or views. Display callbacks can
    /// initialise from it before the first real result exists.
    pub fn empty(rectx: i32, recty: i32) -> Self {
        Self {
            rectx,
            recty,
            xof: 0,
            yof: 0,
            tilerect: Rect::from_size(rectx, recty),
            crop: 0,
            layers: Vec::new(),
            views: Vec::new(),
            storage: StorageMode::Memory,
            tile_file: None,
            stamp: None,
        }
    }

    /// Allocate a result covering `rect`, including a `crop` pixel border
    /// that will not be merged.
    pub fn new(
        layout: &ResultLayout,
        rect: Rect,
        crop: i32,
        storage: StorageMode,
        layers: LayerSelector,
        views: ViewSelector,
    ) -> TesselResult<Self> {
        let rectx = rect.width();
        let recty = rect.height();
        if rectx <= 0 || recty <= 0 {
            return Err(TesselError::ImageTooSmall {
                width: rectx,
                height: recty,
            });
        }
        let pixels = rectx as usize * recty as usize;

        let view_ids: Vec<usize> = match views {
            ViewSelector::All => (0..layout.views.len()).collect(),
            ViewSelector::One(id) => vec![id.min(layout.views.len().saturating_sub(1))],
        };

        let mut out_layers = Vec::new();
        for (index, layer) in layout.layers.iter().enumerate() {
            if let LayerSelector::Single(active) = layers {
                if active != index {
                    continue;
                }
            }
            let mut passes = Vec::new();
            for &view_id in &view_ids {
                for &pass_type in &layer.passes {
                    let channels = pass_type.channels();
                    let rect = match storage {
                        StorageMode::Memory => {
                            alloc_rect(pixels * channels, pass_type.clear_value())?
                        }
                        StorageMode::TileFile => Vec::new(),
                    };
                    passes.push(RenderPass {
                        pass_type,
                        view_id,
                        channels,
                        rect,
                    });
                }
            }
            out_layers.push(RenderLayer {
                name: layer.name.clone(),
                passes,
            });
        }

        let out_views = view_ids
            .iter()
            .map(|&id| RenderView {
                name: layout.views.get(id).cloned().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            rectx,
            recty,
            xof: rect.xmin,
            yof: rect.ymin,
            tilerect: rect,
            crop,
            layers: out_layers,
            views: out_views,
            storage,
            tile_file: None,
            stamp: None,
        })
    }

    /// Allocate every pass that is not resident yet, e.g. before reading a
    /// tile file back.
    pub fn make_resident(&mut self) -> TesselResult<()> {
        let pixels = self.pixel_count();
        for layer in &mut self.layers {
            for pass in layer.passes.iter_mut().filter(|p| !p.is_resident()) {
                pass.rect = alloc_rect(pixels * pass.channels, pass.pass_type.clear_value())?;
            }
        }
        self.storage = StorageMode::Memory;
        Ok(())
    }

    /// The part of `tilerect` that gets merged: the rectangle minus crop.
    pub fn interior(&self) -> Rect {
        self.tilerect.expand(-self.crop)
    }

    pub fn get_layer(&self, name: &str) -> Option<&RenderLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn get_layer_mut(&mut self, name: &str) -> Option<&mut RenderLayer> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    /// Layer at `index`, falling back to the first layer.
    pub fn active_layer(&self, index: usize) -> Option<&RenderLayer> {
        self.layers.get(index).or_else(|| self.layers.first())
    }

    /// Pass pixels of a named layer.
    pub fn layer_pass(&self, layer: &str, pass_type: PassType, view_id: usize) -> Option<&[f32]> {
        self.get_layer(layer)?.pass(pass_type, view_id)
    }

    /// 8-bit RGBA display pixels of one view.
    pub fn to_rgba8(&self, view_id: usize, active_layer: usize) -> Vec<u8> {
        self.image(view_id, active_layer).to_rgba8()
    }

    pub fn view_index(&self, name: &str) -> Option<usize> {
        self.views.iter().position(|v| v.name == name)
    }

    pub fn view_rectf(&self, view_id: usize) -> Option<&[f32]> {
        self.views.get(view_id).and_then(|v| v.rectf.as_deref())
    }

    pub fn set_view_rectf(&mut self, view_id: usize, rect: Vec<f32>) {
        if let Some(view) = self.views.get_mut(view_id) {
            view.rectf = Some(rect);
        }
    }

    pub fn view_rectz(&self, view_id: usize) -> Option<&[f32]> {
        self.views.get(view_id).and_then(|v| v.rectz.as_deref())
    }

    pub fn set_view_rectz(&mut self, view_id: usize, rect: Vec<f32>) {
        if let Some(view) = self.views.get_mut(view_id) {
            view.rectz = Some(rect);
        }
    }

    pub fn view_rect32(&self, view_id: usize) -> Option<&[u32]> {
        self.views.get(view_id).and_then(|v| v.rect32.as_deref())
    }

    /// True when both stereo eyes are present.
    pub fn has_stereo3d(&self) -> bool {
        self.view_index(STEREO_LEFT_NAME).is_some() && self.view_index(STEREO_RIGHT_NAME).is_some()
    }

    /// True when the first view carries its own display pixels (sequencer or
    /// compositor output) instead of relying on a layer.
    pub fn has_fake_layer(&self) -> bool {
        self.views
            .first()
            .is_some_and(|v| v.rect32.is_some() || v.rectf.is_some())
    }

    /// Whether a UI should list layers by name.
    pub fn layers_have_name(&self) -> bool {
        match self.layers.len() {
            0 => false,
            1 => !self.layers[0].name.is_empty(),
            _ => true,
        }
    }

    fn pixel_count(&self) -> usize {
        self.rectx.max(0) as usize * self.recty.max(0) as usize
    }

    /// Copy `src` pixels into the matching region of `self`. Layers match by
    /// name, passes by type and view, views by name.
    pub fn merge(&mut self, src: &RenderResult) {
        let Some(region) = src.interior().intersect(&self.tilerect) else {
            return;
        };
        let dst_rect = self.tilerect;
        let src_rect = src.tilerect;

        for src_layer in &src.layers {
            let Some(dst_layer) = self.get_layer_mut(&src_layer.name) else {
                continue;
            };
            for src_pass in src_layer.passes.iter().filter(|p| p.is_resident()) {
                let Some(dst_pass) = dst_layer.pass_mut(src_pass.pass_type, src_pass.view_id)
                else {
                    continue;
                };
                if dst_pass.is_resident() {
                    copy_region(
                        &mut dst_pass.rect,
                        &dst_rect,
                        &src_pass.rect,
                        &src_rect,
                        &region,
                        src_pass.channels,
                    );
                }
            }
        }

        for src_view in &src.views {
            let Some(dst_view) = self.views.iter_mut().find(|v| v.name == src_view.name) else {
                continue;
            };
            if let (Some(dst), Some(s)) = (dst_view.rectf.as_mut(), src_view.rectf.as_ref()) {
                copy_region(dst, &dst_rect, s, &src_rect, &region, 4);
            }
            if let (Some(dst), Some(s)) = (dst_view.rectz.as_mut(), src_view.rectz.as_ref()) {
                copy_region(dst, &dst_rect, s, &src_rect, &region, 1);
            }
            if let (Some(dst), Some(s)) = (dst_view.rect32.as_mut(), src_view.rect32.as_ref()) {
                copy_region(dst, &dst_rect, s, &src_rect, &region, 1);
            }
        }
    }

    /// Make every view display black.
    pub fn fill_zero(&mut self) {
        let pixels = self.pixel_count();
        for view in &mut self.views {
            view.rect32 = None;
            view.rectf = Some(vec![0.0; pixels * 4]);
        }
    }

    /// Store externally produced RGBA float pixels as the view's output.
    pub fn rect_from_rgba_f32(&mut self, view_id: usize, pixels: &[f32]) -> TesselResult<()> {
        let expected = self.pixel_count() * 4;
        if pixels.len() != expected {
            return Err(TesselError::InvalidArgument(format!(
                "expected {} floats for a {}x{} view, got {}",
                expected,
                self.rectx,
                self.recty,
                pixels.len()
            )));
        }
        if let Some(view) = self.views.get_mut(view_id) {
            view.rect32 = None;
            view.rectf = Some(pixels.to_vec());
        }
        Ok(())
    }

    /// Display pixels of one view: the view's own buffers, falling back to
    /// the combined and Z passes of the active layer.
    pub fn image(&self, view_id: usize, active_layer: usize) -> ResultImage {
        let view_id = if view_id < self.views.len() { view_id } else { 0 };
        let view = self.views.get(view_id);

        let mut image = ResultImage {
            rectx: self.rectx,
            recty: self.recty,
            xof: self.xof,
            yof: self.yof,
            rectf: view.and_then(|v| v.rectf.clone()),
            rectz: view.and_then(|v| v.rectz.clone()),
            rect32: view.and_then(|v| v.rect32.clone()),
            have_combined: view.is_some_and(|v| v.rectf.is_some()),
            stamp: self.stamp.clone(),
        };

        if let Some(layer) = self.active_layer(active_layer) {
            if image.rectf.is_none() {
                image.rectf = layer
                    .pass(PassType::Combined, view_id)
                    .filter(|p| !p.is_empty())
                    .map(<[f32]>::to_vec);
            }
            if image.rectz.is_none() {
                image.rectz = layer
                    .pass(PassType::Z, view_id)
                    .filter(|p| !p.is_empty())
                    .map(<[f32]>::to_vec);
            }
        }
        image
    }

    /// Images of every view in order.
    pub fn images(&self, active_layer: usize) -> Vec<ResultImage> {
        (0..self.views.len().max(1))
            .map(|v| self.image(v, active_layer))
            .collect()
    }

    /// Re-insert the layers of a previous result around a single-layer
    /// render, so layers not rendered this time keep their old pixels.
    pub fn restore_pushed_layers(&mut self, mut pushed: RenderResult) {
        if pushed.rectx != self.rectx || pushed.recty != self.recty {
            return;
        }
        let mut layers = Vec::with_capacity(pushed.layers.len());
        for old in pushed.layers.drain(..) {
            match self.layers.iter().position(|l| l.name == old.name) {
                Some(pos) => layers.push(self.layers.remove(pos)),
                None => layers.push(old),
            }
        }
        layers.append(&mut self.layers);
        self.layers = layers;
    }
}

fn copy_region<T: Copy>(
    dst: &mut [T],
    dst_rect: &Rect,
    src: &[T],
    src_rect: &Rect,
    region: &Rect,
    channels: usize,
) {
    let len = region.width() as usize * channels;
    let dst_stride = dst_rect.width() as usize * channels;
    let src_stride = src_rect.width() as usize * channels;
    for y in region.ymin..region.ymax {
        let d = (y - dst_rect.ymin) as usize * dst_stride
            + (region.xmin - dst_rect.xmin) as usize * channels;
        let s = (y - src_rect.ymin) as usize * src_stride
            + (region.xmin - src_rect.xmin) as usize * channels;
        if d + len > dst.len() || s + len > src.len() {
            tracing::warn!("merge region {} out of buffer bounds, skipping row {}", region, y);
            continue;
        }
        dst[d..d + len].copy_from_slice(&src[s..s + len]);
    }
}
