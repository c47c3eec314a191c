//! Sub-pixel jitter and the 3x3 reconstruction filter used to accumulate
//! full-sample renders.

use rayon::prelude::*;

/// Sub-pixel offsets for `osa` samples, each within `[-0.5, 0.5)`.
///
/// One sample sits on the pixel centre. Larger levels use a rank-1 lattice
/// so every row and column of the pixel is hit exactly once.
pub fn jitter_table(osa: u32) -> Vec<(f32, f32)> {
    let n = osa.max(1);
    if n == 1 {
        return vec![(0.0, 0.0)];
    }
    let step = lattice_step(n);
    (0..n)
        .map(|i| {
            let x = (i as f32 + 0.5) / n as f32 - 0.5;
            let y = (((i * step) % n) as f32 + 0.5) / n as f32 - 0.5;
            (x, y)
        })
        .collect()
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Generator near n / golden ratio that is coprime to n.
fn lattice_step(n: u32) -> u32 {
    let mut step = ((n as f32) * 0.618).round().max(1.0) as u32;
    while gcd(step, n) != 1 {
        step += 1;
    }
    step
}

fn tent(d: f32) -> f32 {
    (1.0 - d.abs()).max(0.0)
}

/// Weights a sample at `offset` deposits on the 3x3 neighbourhood,
/// indexed `[dy + 1][dx + 1]`. The weights sum to one.
pub fn sample_filter(offset: (f32, f32)) -> [[f32; 3]; 3] {
    let wx = [tent(-1.0 - offset.0), tent(-offset.0), tent(1.0 - offset.0)];
    let wy = [tent(-1.0 - offset.1), tent(-offset.1), tent(1.0 - offset.1)];
    let mut filt = [[0.0; 3]; 3];
    for (dy, row) in filt.iter_mut().enumerate() {
        for (dx, w) in row.iter_mut().enumerate() {
            *w = wy[dy] * wx[dx];
        }
    }
    filt
}

fn source_taps(dst: usize, len: usize) -> impl Iterator<Item = (usize, usize)> {
    // (source index, filter index) pairs whose clamped target is `dst`
    let lo = dst.saturating_sub(1);
    let hi = (dst + 1).min(len - 1);
    (lo..=hi).flat_map(move |src| {
        (0..3usize).filter_map(move |k| {
            let target = (src as i64 + k as i64 - 1).clamp(0, len as i64 - 1) as usize;
            (target == dst).then_some((src, k))
        })
    })
}

/// Splat every pixel of `col` through `filt` into `accum`, scaled by
/// `weight`. Colour is clamped to `[0, 1]` first; taps that fall outside
/// the image land on the nearest edge pixel.
pub fn accumulate_filtered(
    accum: &mut [f32],
    col: &[f32],
    rectx: usize,
    recty: usize,
    filt: &[[f32; 3]; 3],
    weight: f32,
) {
    if rectx == 0 || recty == 0 {
        return;
    }
    let clamped: Vec<f32> = col
        .par_chunks(4)
        .flat_map_iter(|p| {
            [
                p[0].clamp(0.0, 1.0),
                p[1].clamp(0.0, 1.0),
                p[2].clamp(0.0, 1.0),
                p[3],
            ]
        })
        .collect();

    accum
        .par_chunks_mut(rectx * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for (sy, ky) in source_taps(y, recty) {
                for x in 0..rectx {
                    let out = &mut row[x * 4..x * 4 + 4];
                    for (sx, kx) in source_taps(x, rectx) {
                        let w = filt[ky][kx] * weight;
                        if w == 0.0 {
                            continue;
                        }
                        let s = (sy * rectx + sx) * 4;
                        for c in 0..4 {
                            out[c] += w * clamped[s + c];
                        }
                    }
                }
            }
        });
}

/// Final clamp of an accumulation buffer: RGB non-negative, alpha in
/// `[0, 1]`. `scale` renormalises a buffer that got fewer samples than
/// planned.
pub fn finish_accumulation(accum: &mut [f32], scale: f32) {
    accum.par_chunks_mut(4).for_each(|p| {
        for c in &mut p[..3] {
            *c = (*c * scale).max(0.0);
        }
        p[3] = (p[3] * scale).clamp(0.0, 1.0);
    });
}
