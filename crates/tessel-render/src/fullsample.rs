//! Full-sample anti-aliasing: every jitter sample is rendered and
//! composited on its own, then filtered into the final image.

use tessel_core::TesselResult;

use crate::filter::{accumulate_filtered, finish_accumulation, jitter_table, sample_filter};
use crate::pipeline::{composite_view, scenes_for_render};
use crate::registry::RenderRegistry;
use crate::render::Render;
use crate::scene::{Scene, SceneLibrary};

/// Accumulate all samples of `re` into the display rect of every view.
///
/// Renders of other scenes referenced by the compositor tree are switched to
/// the same sample before each evaluation. A cancelled merge is
/// renormalised over the samples it got through.
pub(crate) fn do_merge_fullsample(
    re: &mut Render,
    scene: &Scene,
    library: &SceneLibrary,
    registry: &RenderRegistry,
    use_tree: bool,
) -> TesselResult<()> {
    let numviews = match re.result.write().as_mut() {
        Some(rr) => {
            // a previous merge left its accumulation in the view rects
            rr.views.iter_mut().for_each(|v| v.rectf = None);
            rr.views.len()
        }
        None => return Ok(()),
    };
    let osa = re.osa.max(1) as usize;
    let rectx = re.rectx.max(0) as usize;
    let recty = re.recty.max(0) as usize;
    let jitter = jitter_table(osa as u32);
    let weight = 1.0 / osa as f32;

    let tree = scene.nodetree.as_ref().filter(|_| use_tree);
    let nested = scenes_for_render(scene);
    let mut accum: Vec<Vec<f32>> = (0..numviews).map(|_| vec![0.0; rectx * recty * 4]).collect();
    let mut done = 0usize;

    for sample in 0..osa {
        re.stats.curfsa = sample as u32 + 1;

        for name in &nested {
            let Some(handle) = registry.get(name) else {
                continue;
            };
            let mut other = handle.lock();
            if other.modes.full_sample {
                other.read_sample(sample)?;
            }
        }
        re.read_sample(sample)?;

        if let (Some(tree), Some(compositor)) = (tree, library.compositor.as_deref()) {
            for view in 0..numviews {
                composite_view(re, compositor, tree, &scene.name, view, sample as u32, registry)?;
            }
        }

        let filt = sample_filter(jitter[sample]);
        for (view, acc) in accum.iter_mut().enumerate() {
            let image = re.acquire_result_image(view);
            let Some(col) = image.rectf.as_deref() else {
                continue;
            };
            if col.len() != acc.len() {
                tracing::warn!(
                    "sample {} of view {} has {} floats, expected {}",
                    sample,
                    view,
                    col.len(),
                    acc.len()
                );
                continue;
            }
            accumulate_filtered(acc, col, rectx, recty, &filt, weight);

            if sample + 1 != osa {
                re.display_draw_result(view);
            }
        }
        done += 1;

        if re.test_break() {
            break;
        }
    }

    let scale = if done > 0 { osa as f32 / done as f32 } else { 1.0 };
    {
        let mut guard = re.result.write();
        if let Some(rr) = guard.as_mut() {
            for (view, mut acc) in accum.into_iter().enumerate() {
                finish_accumulation(&mut acc, scale);
                rr.set_view_rectf(view, acc);
            }
        }
    }
    if done < osa {
        tracing::info!("full sample merge stopped after {} of {} samples", done, osa);
    }

    re.stats.curfsa = 0;
    Ok(())
}
