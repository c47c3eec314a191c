//! Interfaces of the collaborators the pipeline drives but does not
//! implement: scene conversion and shading, compositing, the sequencer,
//! external render engines and stroke rendering.

use tessel_core::{LayerSettings, Rect, RenderResult, TesselResult, ViewPlane};

use crate::registry::RenderRegistry;
use crate::render::{Mat4, Render};
use crate::scene::{NodeTree, Scene};

/// Per-view inputs for building render data of a scene.
#[derive(Debug, Clone)]
pub struct ConvertContext {
    pub scene: String,
    /// Frame time including motion blur and field offsets.
    pub frame: f64,
    pub view_id: usize,
    pub view_name: String,
    pub viewplane: ViewPlane,
    pub winmat: Mat4,
    pub viewmat: Mat4,
    pub winx: i32,
    pub winy: i32,
    pub disprect: Rect,
    pub osa: u32,
    pub second_field: bool,
}

/// Panorama camera rotation active for the current slice.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PanoRotation {
    /// Horizontal pixel shift of the slice from the image centre.
    pub dxp: i32,
    pub sin: f32,
    pub cos: f32,
}

/// Everything a shader needs to fill one part.
#[derive(Debug, Clone)]
pub struct TileContext {
    pub part_nr: usize,
    pub thread: usize,
    /// Part rectangle in frame pixels, crop border included.
    pub rect: Rect,
    pub crop: i32,
    pub view_id: usize,
    pub winx: i32,
    pub winy: i32,
    pub viewplane: ViewPlane,
    pub osa: u32,
    /// Sub-pixel offset of the current full-sample pass.
    pub jitter: (f32, f32),
    pub frame: f64,
    pub pano: Option<PanoRotation>,
}

/// Converts a scene into render data for one view and time.
pub trait SceneDatabase: Send + Sync {
    fn convert(&self, ctx: &ConvertContext) -> TesselResult<Box<dyn ShadingDatabase>>;
}

/// Converted render data. `shade_tile` is called concurrently from worker
/// threads for distinct parts.
pub trait ShadingDatabase: Send + Sync {
    /// Write the pixels of one part into `result`, which covers `tile.rect`.
    fn shade_tile(&self, tile: &TileContext, result: &mut RenderResult) -> TesselResult<()>;

    /// Rotate already converted geometry around the camera by `angle`
    /// radians, called between panorama slices.
    fn project_panorama(&mut self, _angle: f32) {}
}

/// Inputs for one compositor evaluation.
pub struct CompositeInput<'a> {
    pub tree: &'a NodeTree,
    pub scene: &'a str,
    pub frame: i32,
    pub view_id: usize,
    /// Full-sample index, 0 outside full-sample renders.
    pub sample: u32,
    pub result: &'a RenderResult,
    /// Renders of other scenes referenced by render-layer nodes.
    pub registry: &'a RenderRegistry,
}

pub trait Compositor: Send + Sync {
    /// Evaluate `input.tree`, returning RGBA pixels of the result size, or
    /// `None` when the tree produced nothing for this view.
    fn execute(&self, input: &CompositeInput<'_>) -> TesselResult<Option<Vec<f32>>>;
}

pub trait Sequencer: Send + Sync {
    /// RGBA pixels of the edited sequence at `frame`, `None` for an empty
    /// frame.
    fn render(&self, scene: &Scene, frame: i32, width: i32, height: i32)
        -> TesselResult<Option<Vec<f32>>>;
}

/// A render engine replacing the internal tile pipeline.
pub trait RenderEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Engines that also do their own compositing replace the whole frame
    /// pipeline; others only replace the 3D part.
    fn handles_postprocess(&self) -> bool {
        true
    }

    /// Render the current frame into `re`'s result.
    fn render(&self, re: &mut Render, scene: &Scene) -> TesselResult<()>;
}

/// Line renderer run after the 3D pass for layers with strokes enabled.
pub trait StrokeRenderer: Send + Sync {
    /// RGBA stroke overlay for `layer`, composited over its combined pass.
    fn render_strokes(
        &self,
        scene: &Scene,
        layer: &LayerSettings,
        result: &RenderResult,
        view_id: usize,
    ) -> TesselResult<Option<Vec<f32>>>;
}
