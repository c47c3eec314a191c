//! Threaded tile processing. Parts are queued closest-to-centre first and
//! shaded by a fixed pool of workers; only the calling thread merges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use tessel_core::{
    LayerSelector, RenderResult, ResultLayout, StorageMode, TesselError, TesselResult,
    ViewPlane, ViewSelector,
};

use crate::external::{PanoRotation, ShadingDatabase, TileContext};
use crate::filter::jitter_table;
use crate::pano::{NextSlice, PanoParams, SliceCursor};
use crate::parts::{find_next_part, parts_init, PartStatus, RenderPart};
use crate::render::Render;

/// How long the main loop waits for a finished part before refreshing stats.
pub const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

/// Read-only copy of the render state workers shade from.
#[derive(Debug, Clone)]
struct TileSnapshot {
    layout: ResultLayout,
    view_id: usize,
    winx: i32,
    winy: i32,
    viewplane: ViewPlane,
    osa: u32,
    jitter: (f32, f32),
    frame: f64,
    pano: Option<PanoRotation>,
}

impl TileSnapshot {
    fn from_render(re: &Render) -> Self {
        let jitter = re
            .current_sample
            .and_then(|s| jitter_table(re.osa).get(s).copied())
            .unwrap_or((0.0, 0.0));
        Self {
            layout: re.layout.clone(),
            view_id: re.actview,
            winx: re.winx,
            winy: re.winy,
            viewplane: re.viewplane,
            osa: re.osa,
            jitter,
            frame: re.settings.frame_current as f64 + (re.mblur_offs + re.field_offs) as f64,
            pano: None,
        }
    }

    fn tile_context(&self, pa: &RenderPart, thread: usize) -> TileContext {
        TileContext {
            part_nr: pa.nr,
            thread,
            rect: pa.disprect,
            crop: pa.crop,
            view_id: self.view_id,
            winx: self.winx,
            winy: self.winy,
            viewplane: self.viewplane,
            osa: self.osa,
            jitter: self.jitter,
            frame: self.frame,
            pano: self.pano,
        }
    }
}

enum PartOutcome {
    Done { part: usize, result: RenderResult },
    Failed { part: usize, error: TesselError },
    /// Popped after the break flag was raised, not shaded.
    Skipped,
}

fn do_part(
    snapshot: &TileSnapshot,
    index: usize,
    pa: &RenderPart,
    thread: usize,
    db: &dyn ShadingDatabase,
) -> PartOutcome {
    let mut result = match RenderResult::new(
        &snapshot.layout,
        pa.disprect,
        pa.crop,
        StorageMode::Memory,
        LayerSelector::All,
        ViewSelector::One(snapshot.view_id),
    ) {
        Ok(result) => result,
        Err(error) => return PartOutcome::Failed { part: index, error },
    };
    let ctx = snapshot.tile_context(pa, thread);
    match db.shade_tile(&ctx, &mut result) {
        Ok(()) => PartOutcome::Done {
            part: index,
            result,
        },
        Err(error) => PartOutcome::Failed { part: index, error },
    }
}

struct Worker<'a> {
    number: usize,
    snapshot: &'a TileSnapshot,
    parts: &'a [RenderPart],
    db: &'a dyn ShadingDatabase,
    work: Receiver<usize>,
    done: Sender<PartOutcome>,
    thread_break: &'a AtomicBool,
}

impl Worker<'_> {
    fn run(self) {
        while let Ok(index) = self.work.recv() {
            let pa = &self.parts[index];
            pa.set_thread(self.number);
            pa.set_status(PartStatus::InProgress);

            let outcome = if self.thread_break.load(Ordering::Acquire) {
                PartOutcome::Skipped
            } else {
                do_part(self.snapshot, index, pa, self.number, self.db)
            };

            pa.set_status(PartStatus::Ready);
            if self.done.send(outcome).is_err() {
                break;
            }
            if self.thread_break.load(Ordering::Acquire) {
                break;
            }
        }
    }
}

/// Merge a finished part into the sample file, the result's spill file or
/// the result itself.
fn merge_part(re: &mut Render, part: &RenderResult, nr: usize) -> TesselResult<()> {
    let view = re.actview;
    if let Some(sample) = re.current_sample {
        if let Some(file) = re.sample_files.get_mut(sample) {
            return file.merge(part, nr, view);
        }
    }

    let mut guard = re.result.write();
    let Some(rr) = guard.as_mut() else {
        return Ok(());
    };
    if let Some(file) = rr.tile_file.as_mut() {
        return file.merge(part, nr, view);
    }
    // a cancelled preview keeps what it showed before
    if re.settings.preview && re.test_break() {
        return Ok(());
    }
    rr.merge(part);
    Ok(())
}

/// Render every part of the display rectangle for the active view.
///
/// With `allow_crop` and oversampling every part is grown by one pixel so
/// filters see their neighbours; only the interior is merged.
pub(crate) fn threaded_tile_processor(
    re: &mut Render,
    db: &mut dyn ShadingDatabase,
    allow_crop: bool,
) -> TesselResult<()> {
    if re.result.read().is_none() {
        return Ok(());
    }

    let crop = if allow_crop && re.osa > 0 { 1 } else { 0 };
    let mut parts = parts_init(re.disprect, re.tile, crop);
    re.stats.totpart = parts.len();
    re.stats.partsdone = 0;

    let scene = re.scene_name();
    let threads = re.threads.max(1);
    let panorama = re.is_panorama();
    let saved_viewplane = re.viewplane;
    let saved_winmat = re.winmat;
    let mut snapshot = TileSnapshot::from_render(re);

    let thread_break = AtomicBool::new(false);
    let (done_tx, done_rx) = channel::unbounded::<PartOutcome>();
    let mut cursor = SliceCursor::new();
    let mut queued = 0usize;
    let mut outstanding = 0usize;
    let mut shade_error: Option<TesselError> = None;

    loop {
        let params = PanoParams {
            winx: re.winx,
            disprect: re.disprect,
            partx: re.tile.x,
            clip_start: re.clip_start,
            base_viewplane: &saved_viewplane,
        };
        let minx = match cursor.next(&parts, panorama.then_some(&params)) {
            NextSlice::Done => break,
            NextSlice::Whole => None,
            NextSlice::Pano(slice) => {
                let (clip_start, clip_end) = (re.clip_start, re.clip_end);
                re.set_window(slice.viewplane, clip_start, clip_end);
                db.project_panorama(slice.angle);
                snapshot.viewplane = slice.viewplane;
                snapshot.pano = Some(slice.rotation);
                Some(slice.minx)
            }
        };

        let (work_tx, work_rx) = channel::unbounded::<usize>();
        while let Some(index) = find_next_part(&parts, re.winx, re.winy, minx) {
            queued += 1;
            outstanding += 1;
            parts[index].nr = queued;
            // receiver is alive, send cannot fail
            let _ = work_tx.send(index);
        }
        // closing the queue lets idle workers exit
        drop(work_tx);

        let shared: &dyn ShadingDatabase = &*db;
        let parts_ref = parts.as_slice();
        let snapshot_ref = &snapshot;
        let break_ref = &thread_break;

        std::thread::scope(|s| {
            for number in 0..threads {
                let worker = Worker {
                    number,
                    snapshot: snapshot_ref,
                    parts: parts_ref,
                    db: shared,
                    work: work_rx.clone(),
                    done: done_tx.clone(),
                    thread_break: break_ref,
                };
                s.spawn(move || worker.run());
            }

            let mut lastdraw = Instant::now();
            loop {
                let wait = REDRAW_INTERVAL.saturating_sub(lastdraw.elapsed());
                match done_rx.recv_timeout(wait) {
                    Ok(PartOutcome::Done { part, result }) => {
                        let nr = parts_ref[part].nr;
                        if let Err(err) = merge_part(re, &result, nr) {
                            tracing::error!("merging part {} failed: {}", nr, err);
                            shade_error.get_or_insert(err);
                            break_ref.store(true, Ordering::Release);
                        }
                        re.callbacks().display_draw(&result, None, re.actview);
                        re.stats_info(format!("{}, Part {}-{}", scene, nr, re.stats.totpart));
                        re.stats.partsdone += 1;
                        re.callbacks().progress(re.stats.progress());
                        outstanding -= 1;
                    }
                    Ok(PartOutcome::Failed { part, error }) => {
                        tracing::error!("part {} failed: {}", parts_ref[part].nr, error);
                        shade_error.get_or_insert(error);
                        break_ref.store(true, Ordering::Release);
                        outstanding -= 1;
                    }
                    Ok(PartOutcome::Skipped) => outstanding -= 1,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if re.test_break() || shade_error.is_some() {
                    break_ref.store(true, Ordering::Release);
                    break;
                }
                if outstanding == 0 {
                    break;
                }
                if lastdraw.elapsed() >= REDRAW_INTERVAL {
                    re.stats_draw();
                    re.display_draw_result(re.actview);
                    lastdraw = Instant::now();
                }
            }
        });

        if thread_break.load(Ordering::Acquire) || re.test_break() {
            thread_break.store(true, Ordering::Release);
            break;
        }
    }

    if thread_break.load(Ordering::Acquire) {
        let dropped = done_rx.try_iter().count();
        if dropped > 0 {
            tracing::debug!("discarded {} finished parts after break", dropped);
        }
    }

    re.viewplane = saved_viewplane;
    re.winmat = saved_winmat;

    match shade_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use tessel_core::{PassType, Rect, RenderSettings};

    use crate::callbacks::RenderCallbacks;

    struct Fill {
        value: f32,
        calls: AtomicUsize,
    }

    impl ShadingDatabase for Fill {
        fn shade_tile(&self, tile: &TileContext, result: &mut RenderResult) -> TesselResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let layer = &mut result.layers[0];
            let pass = layer.pass_mut(PassType::Combined, tile.view_id).unwrap();
            pass.rect.iter_mut().for_each(|v| *v = self.value);
            Ok(())
        }
    }

    struct Broken;

    impl ShadingDatabase for Broken {
        fn shade_tile(&self, _tile: &TileContext, _result: &mut RenderResult) -> TesselResult<()> {
            Err(TesselError::Engine("shader exploded".into()))
        }
    }

    /// Holds up the first part long enough for the merge loop to time out.
    struct Slow {
        calls: AtomicUsize,
    }

    impl ShadingDatabase for Slow {
        fn shade_tile(&self, tile: &TileContext, result: &mut RenderResult) -> TesselResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(REDRAW_INTERVAL + Duration::from_millis(400));
            }
            let pass = result.layers[0].pass_mut(PassType::Combined, tile.view_id).unwrap();
            pass.rect.iter_mut().for_each(|v| *v = 1.0);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        drawn: Mutex<Vec<Rect>>,
    }

    impl RenderCallbacks for Recorder {
        fn display_draw(&self, result: &RenderResult, _rect: Option<Rect>, _view: usize) {
            self.drawn.lock().unwrap().push(result.tilerect);
        }
    }

    fn render(w: i32, h: i32, threads: usize) -> Render {
        let mut settings = RenderSettings::with_size(w, h);
        settings.threads = Some(threads);
        let mut re = Render::new("Scene");
        re.init_state(None, &settings, None, w, h, None).unwrap();
        re.main_result_new().unwrap();
        re
    }

    #[test]
    fn test_every_part_is_shaded_once() {
        let mut re = render(64, 64, 4);
        let recorder = Arc::new(Recorder::default());
        re.set_callbacks(recorder.clone());
        let mut db = Fill {
            value: 0.5,
            calls: AtomicUsize::new(0),
        };
        threaded_tile_processor(&mut re, &mut db, true).unwrap();

        assert_eq!(db.calls.load(Ordering::SeqCst), 16);
        assert_eq!(re.stats().partsdone, 16);
        assert_eq!(recorder.drawn.lock().unwrap().len(), 16);
        let guard = re.acquire_result_read();
        let rr = guard.as_ref().unwrap();
        let combined = rr.layers[0].pass(PassType::Combined, 0).unwrap();
        assert!(combined.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_slow_parts_still_refresh_display() {
        let mut re = render(16, 16, 1);
        let recorder = Arc::new(Recorder::default());
        re.set_callbacks(recorder.clone());
        let mut db = Slow {
            calls: AtomicUsize::new(0),
        };
        threaded_tile_processor(&mut re, &mut db, false).unwrap();

        let drawn = recorder.drawn.lock().unwrap();
        let parts = re.stats().partsdone;
        assert!(parts > 0);
        // one draw per part plus the whole result on the timeout refresh
        assert!(drawn.len() > parts);
        assert!(drawn.contains(&Rect::from_size(16, 16)));
    }

    #[test]
    fn test_shading_error_is_returned() {
        let mut re = render(16, 16, 2);
        let err = threaded_tile_processor(&mut re, &mut Broken, false).unwrap_err();
        assert!(matches!(err, TesselError::Engine(_)));
    }

    #[test]
    fn test_no_result_is_a_no_op() {
        let mut re = Render::new("Scene");
        let mut db = Fill {
            value: 1.0,
            calls: AtomicUsize::new(0),
        };
        threaded_tile_processor(&mut re, &mut db, false).unwrap();
        assert_eq!(db.calls.load(Ordering::SeqCst), 0);
    }
}
