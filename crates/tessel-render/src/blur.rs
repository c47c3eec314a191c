//! Motion blur accumulation: every sample is blended into a running mean.

use rayon::prelude::*;

use tessel_core::{PassType, RenderResult};

/// Alpha below this counts as empty when blending key-alpha pixels.
const ALPHA_EPSILON: f32 = 0.01;

/// Blend `src` into `dst` with weight `blurfac`, keeping silhouettes clean:
/// empty source pixels only fade the destination alpha, and empty
/// destination pixels take the source colour unmixed.
pub fn add_blur_rect_key(dst: &mut [f32], src: &[f32], rectx: usize, blurfac: f32) {
    let stride = rectx * 4;
    if stride == 0 {
        return;
    }
    if blurfac == 1.0 {
        dst.copy_from_slice(src);
        return;
    }
    let mfac = 1.0 - blurfac;
    dst.par_chunks_mut(stride)
        .zip(src.par_chunks(stride))
        .for_each(|(drow, srow)| {
            for (d, s) in drow.chunks_exact_mut(4).zip(srow.chunks_exact(4)) {
                if s[3] < ALPHA_EPSILON {
                    d[3] *= mfac;
                } else if d[3] < ALPHA_EPSILON {
                    d[..3].copy_from_slice(&s[..3]);
                    d[3] = blurfac * s[3];
                } else {
                    for c in 0..4 {
                        d[c] = mfac * d[c] + blurfac * s[c];
                    }
                }
            }
        });
}

/// Linear blend of `src` into `dst` with weight `blurfac`.
pub fn add_blur_rect(dst: &mut [f32], src: &[f32], rectx: usize, channels: usize, blurfac: f32) {
    let stride = rectx * channels;
    if stride == 0 {
        return;
    }
    if blurfac == 1.0 {
        dst.copy_from_slice(src);
        return;
    }
    let mfac = 1.0 - blurfac;
    dst.par_chunks_mut(stride)
        .zip(src.par_chunks(stride))
        .for_each(|(drow, srow)| {
            for (d, s) in drow.iter_mut().zip(srow) {
                *d = mfac * *d + blurfac * *s;
            }
        });
}

/// Blend every pass of `src` into the pass at the same position in `dst`.
/// Both results must come from the same layout. The combined pass uses the
/// key-alpha blend when `key_alpha` is set.
pub fn merge_result_blur(dst: &mut RenderResult, src: &RenderResult, blurfac: f32, key_alpha: bool) {
    let rectx = dst.rectx.max(0) as usize;
    for (dl, sl) in dst.layers.iter_mut().zip(&src.layers) {
        for (dp, sp) in dl.passes.iter_mut().zip(&sl.passes) {
            if dp.rect.len() != sp.rect.len() || !dp.is_resident() {
                tracing::warn!(
                    "blur skipped {} pass of layer {}: size mismatch",
                    dp.pass_type.name(),
                    dl.name
                );
                continue;
            }
            if dp.pass_type == PassType::Combined && key_alpha {
                add_blur_rect_key(&mut dp.rect, &sp.rect, rectx, blurfac);
            } else {
                add_blur_rect(&mut dp.rect, &sp.rect, rectx, dp.channels, blurfac);
            }
        }
    }
}
