//! Field rendering: two half-height renders interleaved row by row.

use rayon::prelude::*;

use tessel_core::{Rect, RenderResult};

/// Rows rendered per field for a frame of `height` rows.
pub fn field_height(height: i32) -> i32 {
    (height + 1) / 2
}

/// The rectangle a field renders for `disprect`.
pub fn field_rect(disprect: Rect) -> Rect {
    let ymin = disprect.ymin / 2;
    Rect::new(
        disprect.xmin,
        disprect.xmax,
        ymin,
        ymin + field_height(disprect.height()),
    )
}

/// Fill `dst` (`recty` rows) with even rows from `first` and odd rows from
/// `second`. Without a second field the first one is line-doubled.
pub fn interleave_rect(
    dst: &mut [f32],
    first: &[f32],
    second: Option<&[f32]>,
    rectx: usize,
    channels: usize,
) {
    let stride = rectx * channels;
    if stride == 0 {
        return;
    }
    dst.par_chunks_mut(stride).enumerate().for_each(|(row, out)| {
        let src = match second {
            Some(second) if row % 2 == 1 => second,
            _ => first,
        };
        let start = (row / 2) * stride;
        if let Some(line) = src.get(start..start + stride) {
            out.copy_from_slice(line);
        }
    });
}

/// Interleave two field results into `dst`, pass by pass and view by view.
/// All three results must share a layout.
pub fn merge_result_fields(dst: &mut RenderResult, first: &RenderResult, second: Option<&RenderResult>) {
    let rectx = dst.rectx.max(0) as usize;
    for (li, layer) in dst.layers.iter_mut().enumerate() {
        let Some(l1) = first.layers.get(li) else {
            continue;
        };
        let l2 = second.and_then(|s| s.layers.get(li));
        for (pi, pass) in layer.passes.iter_mut().enumerate() {
            let Some(p1) = l1.passes.get(pi) else {
                continue;
            };
            let p2 = l2.and_then(|l| l.passes.get(pi)).map(|p| p.rect.as_slice());
            interleave_rect(&mut pass.rect, &p1.rect, p2, rectx, pass.channels);
        }
    }

    let rows = dst.recty.max(0) as usize;
    for (vi, view) in dst.views.iter_mut().enumerate() {
        let Some(f1) = first.views.get(vi).and_then(|v| v.rectf.as_ref()) else {
            continue;
        };
        let f2 = second
            .and_then(|s| s.views.get(vi))
            .and_then(|v| v.rectf.as_deref());
        let mut rectf = vec![0.0; rectx * rows * 4];
        interleave_rect(&mut rectf, f1, f2, rectx, 4);
        view.rectf = Some(rectf);
    }
}
