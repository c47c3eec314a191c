//! Panorama rendering: the frame is rendered as vertical slices, each with
//! the camera turned towards the slice.

use tessel_core::{Rect, ViewPlane};

use crate::external::PanoRotation;
use crate::parts::{PartStatus, RenderPart};

/// Rotation in radians that one rendered pixel column stands for.
///
/// The angle of a pixel grows non-linearly across a wide view plane, so the
/// per-pixel angle is corrected by the ratio between the real angle of one
/// slice and the angle the slice would wrap at the centre pixel size.
pub fn panorama_pixel_rot(
    viewplane: &ViewPlane,
    winx: i32,
    disprect: &Rect,
    partx: i32,
    clip_start: f32,
) -> f32 {
    let winx = winx.max(1) as f32;
    let partx = partx.max(1);
    let borderfac = disprect.width() as f32 / winx;
    let xparts = (disprect.width() + partx - 1) / partx;

    let psize = viewplane.width() / winx;
    let mut phi = (psize / clip_start).atan();

    let xfac = borderfac * viewplane.width() / xparts.max(1) as f32;
    let xfac = (0.5 * xfac / clip_start).atan();
    let wrapped = 0.5 * phi * partx as f32;

    phi *= xfac / wrapped;
    phi
}

/// Camera setup for one panorama slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanoSlice {
    /// Left column of the parts in this slice.
    pub minx: i32,
    pub viewplane: ViewPlane,
    /// Geometry rotation to apply before shading the slice.
    pub angle: f32,
    pub rotation: PanoRotation,
}

/// Walks the slices of one tile pass. Regular renders have exactly one
/// implicit slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceCursor {
    slice: usize,
}

pub enum NextSlice {
    /// Regular render, the whole frame at once.
    Whole,
    Pano(PanoSlice),
    Done,
}

pub struct PanoParams<'a> {
    pub winx: i32,
    pub disprect: Rect,
    pub partx: i32,
    pub clip_start: f32,
    pub base_viewplane: &'a ViewPlane,
}

impl SliceCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(
        &mut self,
        parts: &[RenderPart],
        pano: Option<&PanoParams<'_>>,
    ) -> NextSlice {
        let slice = self.slice;
        self.slice += 1;

        let Some(params) = pano else {
            return if slice == 0 {
                NextSlice::Whole
            } else {
                NextSlice::Done
            };
        };

        let best = parts
            .iter()
            .filter(|p| p.status() == PartStatus::None && p.nr == 0)
            .min_by_key(|p| p.disprect.xmin);
        let Some(best) = best else {
            return NextSlice::Done;
        };

        let phi = panorama_pixel_rot(
            params.base_viewplane,
            params.winx,
            &params.disprect,
            params.partx,
            params.clip_start,
        );
        let dxp = (params.winx - (best.disprect.xmin + best.disprect.xmax)) / 2;
        let dxv = params.base_viewplane.width() * dxp as f32 / params.winx.max(1) as f32;
        let turn = dxp as f32 * phi;

        NextSlice::Pano(PanoSlice {
            minx: best.disprect.xmin,
            viewplane: params.base_viewplane.shifted_x(dxv),
            angle: -turn,
            rotation: PanoRotation {
                dxp,
                sin: turn.sin(),
                cos: turn.cos(),
            },
        })
    }
}
