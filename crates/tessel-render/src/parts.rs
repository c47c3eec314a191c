//! Splitting the display rectangle into parts and choosing the order they
//! are handed to workers.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tessel_core::{Rect, TileSize};

/// Target number of parts per worker thread.
pub const PARTS_PER_THREAD: usize = 4;

/// Part sizes are rounded up to a multiple of this many pixels.
pub const TILE_STEP: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartStatus {
    None = 0,
    InProgress = 1,
    Ready = 2,
}

impl PartStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PartStatus::InProgress,
            2 => PartStatus::Ready,
            _ => PartStatus::None,
        }
    }
}

/// One unit of shading work. Status and thread are written by the worker
/// that owns the part; everything else only by the scheduling thread.
#[derive(Debug)]
pub struct RenderPart {
    /// 1-based queue order, 0 while not queued.
    pub nr: usize,
    /// Part rectangle in frame pixels, including `crop`.
    pub disprect: Rect,
    pub crop: i32,
    status: AtomicU8,
    thread: AtomicUsize,
}

impl RenderPart {
    pub fn new(disprect: Rect, crop: i32) -> Self {
        Self {
            nr: 0,
            disprect,
            crop,
            status: AtomicU8::new(PartStatus::None as u8),
            thread: AtomicUsize::new(0),
        }
    }

    pub fn status(&self) -> PartStatus {
        PartStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: PartStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn thread(&self) -> usize {
        self.thread.load(Ordering::Relaxed)
    }

    pub fn set_thread(&self, thread: usize) {
        self.thread.store(thread, Ordering::Relaxed);
    }

    /// The rectangle this part contributes to the frame.
    pub fn interior(&self) -> Rect {
        self.disprect.expand(-self.crop)
    }
}

fn round_up_to_step(v: i32) -> i32 {
    ((v + TILE_STEP - 1) / TILE_STEP) * TILE_STEP
}

/// Clamp a fixed tile size to the rendered rectangle.
pub fn parts_clamp(tile: TileSize, rectx: i32, recty: i32) -> TileSize {
    TileSize {
        x: tile.x.clamp(1, rectx.max(1)),
        y: tile.y.clamp(1, recty.max(1)),
    }
}

/// Tile size for `disprect`: the fixed size when given, else one that
/// yields about `threads * PARTS_PER_THREAD` parts of similar aspect.
pub fn tile_size(disprect: Rect, threads: usize, fixed: Option<TileSize>) -> TileSize {
    let w = disprect.width().max(1);
    let h = disprect.height().max(1);
    if let Some(tile) = fixed {
        return parts_clamp(tile, w, h);
    }
    let target = (threads.max(1) * PARTS_PER_THREAD) as f64;
    let xparts = ((target * w as f64 / h as f64).sqrt().round() as i64).clamp(1, target as i64);
    let yparts = ((target as i64) / xparts).max(1);

    let x = round_up_to_step((w + xparts as i32 - 1) / xparts as i32).min(w);
    let y = round_up_to_step((h + yparts as i32 - 1) / yparts as i32).min(h);
    TileSize { x, y }
}

/// Partition `disprect` row by row into parts of `tile` size; the last
/// row and column take what is left. A non-zero `crop` grows every part by
/// that many filter pixels on each side.
pub fn parts_init(disprect: Rect, tile: TileSize, crop: i32) -> Vec<RenderPart> {
    let mut parts = Vec::new();
    if disprect.is_empty() {
        return parts;
    }
    let tx = tile.x.max(1);
    let ty = tile.y.max(1);

    let mut ymin = disprect.ymin;
    while ymin < disprect.ymax {
        let ymax = (ymin + ty).min(disprect.ymax);
        let mut xmin = disprect.xmin;
        while xmin < disprect.xmax {
            let xmax = (xmin + tx).min(disprect.xmax);
            let rect = Rect::new(xmin, xmax, ymin, ymax).expand(crop);
            parts.push(RenderPart::new(rect, crop));
            xmin = xmax;
        }
        ymin = ymax;
    }
    parts
}

/// Index of the unqueued part closest to the centroid of the finished
/// parts (the image centre counts as one of them). Ties keep the first
/// part in list order. `pano_minx` restricts the choice to parts starting
/// at that column.
pub fn find_next_part(
    parts: &[RenderPart],
    winx: i32,
    winy: i32,
    pano_minx: Option<i32>,
) -> Option<usize> {
    let mut centx = (winx / 2) as i64;
    let mut centy = (winy / 2) as i64;
    let mut tot = 1i64;
    for pa in parts.iter().filter(|p| p.status() == PartStatus::Ready) {
        centx += pa.disprect.center_x() as i64;
        centy += pa.disprect.center_y() as i64;
        tot += 1;
    }
    centx /= tot;
    centy /= tot;

    let mut best = None;
    let mut mindist = winx as i64 * winy as i64;
    for (idx, pa) in parts.iter().enumerate() {
        if pa.status() != PartStatus::None || pa.nr != 0 {
            continue;
        }
        if pano_minx.is_some_and(|minx| pa.disprect.xmin != minx) {
            continue;
        }
        let dx = centx - pa.disprect.center_x() as i64;
        let dy = centy - pa.disprect.center_y() as i64;
        let dist = ((dx * dx + dy * dy) as f64).sqrt() as i64;
        if dist < mindist {
            best = Some(idx);
            mindist = dist;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(parts: &[RenderPart], rect: Rect) -> Vec<u32> {
        let mut hits = vec![0u32; rect.area() as usize];
        for pa in parts {
            let r = pa.interior();
            for y in r.ymin..r.ymax {
                for x in r.xmin..r.xmax {
                    let idx = ((y - rect.ymin) * rect.width() + (x - rect.xmin)) as usize;
                    hits[idx] += 1;
                }
            }
        }
        hits
    }

    #[test]
    fn test_parts_tile_exactly() {
        for &(w, h, threads) in &[(64, 64, 4), (37, 19, 3), (1, 1, 8), (500, 7, 16), (3, 200, 2)] {
            let rect = Rect::from_size(w, h);
            let tile = tile_size(rect, threads, None);
            let parts = parts_init(rect, tile, 0);
            assert!(coverage(&parts, rect).iter().all(|&c| c == 1), "{}x{}", w, h);
            assert!(parts.len() <= threads * PARTS_PER_THREAD, "{}x{}: {}", w, h, parts.len());
        }
    }

    #[test]
    fn test_parts_with_crop_keep_interiors_disjoint() {
        let rect = Rect::new(10, 50, 5, 45);
        let parts = parts_init(rect, TileSize { x: 16, y: 16 }, 1);
        assert!(coverage(&parts, rect).iter().all(|&c| c == 1));
        assert_eq!(parts[0].disprect, Rect::new(9, 27, 4, 22));
    }

    #[test]
    fn test_square_frame_gets_square_grid() {
        let tile = tile_size(Rect::from_size(64, 64), 4, None);
        assert_eq!(tile, TileSize { x: 16, y: 16 });
        let parts = parts_init(Rect::from_size(64, 64), tile, 0);
        assert_eq!(parts.len(), 16);
    }

    #[test]
    fn test_tile_size_is_step_aligned() {
        let tile = tile_size(Rect::from_size(100, 30), 2, None);
        assert_eq!(tile.x % TILE_STEP, 0);
        assert!(tile.y % TILE_STEP == 0 || tile.y == 30);
    }

    #[test]
    fn test_fixed_tile_is_clamped() {
        let tile = tile_size(Rect::from_size(20, 10), 4, Some(TileSize { x: 64, y: 64 }));
        assert_eq!(tile, TileSize { x: 20, y: 10 });
        let parts = parts_init(Rect::from_size(20, 10), tile, 0);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_find_next_part_starts_at_centre() {
        let rect = Rect::from_size(48, 48);
        let parts = parts_init(rect, TileSize { x: 16, y: 16 }, 0);
        let first = find_next_part(&parts, 48, 48, None).unwrap();
        assert_eq!(parts[first].disprect, Rect::new(16, 32, 16, 32));
    }

    #[test]
    fn test_find_next_part_follows_finished_parts() {
        let rect = Rect::from_size(64, 16);
        let mut parts = parts_init(rect, TileSize { x: 16, y: 16 }, 0);
        // centre is at x=32: parts 1 and 2 are equally close, first one wins
        let first = find_next_part(&parts, 64, 16, None).unwrap();
        assert_eq!(first, 1);
        parts[1].nr = 1;
        parts[1].set_status(PartStatus::Ready);
        // centroid moves to (32+24)/2 = 28, part 1 is taken, part 2 at 40 vs part 0 at 8
        let second = find_next_part(&parts, 64, 16, None).unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn test_find_next_part_skips_queued() {
        let mut parts = parts_init(Rect::from_size(8, 8), TileSize { x: 8, y: 8 }, 0);
        assert_eq!(find_next_part(&parts, 8, 8, None), Some(0));
        parts[0].nr = 1;
        assert_eq!(find_next_part(&parts, 8, 8, None), None);
    }

    #[test]
    fn test_find_next_part_panorama_column() {
        let parts = parts_init(Rect::from_size(48, 32), TileSize { x: 16, y: 16 }, 0);
        let idx = find_next_part(&parts, 48, 32, Some(0)).unwrap();
        assert_eq!(parts[idx].disprect.xmin, 0);
        assert_eq!(find_next_part(&parts, 48, 32, Some(5)), None);
    }
}
