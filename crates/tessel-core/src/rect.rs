use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer pixel rectangle, half-open: `xmin..xmax`, `ymin..ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

impl Rect {
    pub fn new(xmin: i32, xmax: i32, ymin: i32, ymax: i32) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// A rectangle anchored at the origin.
    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, width, 0, height)
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    /// Integer centre, rounded towards the minimum corner.
    pub fn center_x(&self) -> i32 {
        (self.xmin + self.xmax) / 2
    }

    pub fn center_y(&self) -> i32 {
        (self.ymin + self.ymax) / 2
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() as i64 * self.height() as i64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.xmin && x < self.xmax && y >= self.ymin && y < self.ymax
    }

    /// Overlap of two rectangles, `None` when they do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.xmin.max(other.xmin),
            self.xmax.min(other.xmax),
            self.ymin.max(other.ymin),
            self.ymax.min(other.ymax),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Grow by `n` pixels on every side (negative shrinks).
    pub fn expand(&self, n: i32) -> Rect {
        Rect::new(self.xmin - n, self.xmax + n, self.ymin - n, self.ymax + n)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.xmin + dx, self.xmax + dx, self.ymin + dy, self.ymax + dy)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.xmin, self.xmax, self.ymin, self.ymax
        )
    }
}

/// Camera view-plane in camera space units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewPlane {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
}

impl ViewPlane {
    pub fn new(xmin: f32, xmax: f32, ymin: f32, ymax: f32) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Shift horizontally by `dx` view-plane units.
    pub fn shifted_x(&self, dx: f32) -> ViewPlane {
        ViewPlane::new(self.xmin + dx, self.xmax + dx, self.ymin, self.ymax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_size_and_center() {
        let r = Rect::new(10, 30, 4, 8);
        assert_eq!(r.width(), 20);
        assert_eq!(r.height(), 4);
        assert_eq!(r.center_x(), 20);
        assert_eq!(r.center_y(), 6);
        assert_eq!(r.area(), 80);
    }

    #[test]
    fn test_rect_intersect() {
        let a = Rect::new(0, 10, 0, 10);
        let b = Rect::new(5, 15, 8, 20);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 10, 8, 10)));
        assert_eq!(a.intersect(&Rect::new(10, 12, 0, 10)), None);
    }

    #[test]
    fn test_rect_expand_shrinks_with_negative() {
        let r = Rect::new(2, 8, 2, 8);
        assert_eq!(r.expand(1), Rect::new(1, 9, 1, 9));
        assert_eq!(r.expand(-1), Rect::new(3, 7, 3, 7));
    }

    #[test]
    fn test_empty_rect_has_no_area() {
        let r = Rect::new(5, 5, 0, 10);
        assert!(r.is_empty());
        assert_eq!(r.area(), 0);
    }

    #[test]
    fn test_viewplane_shift() {
        let vp = ViewPlane::new(-1.0, 1.0, -0.5, 0.5);
        let s = vp.shifted_x(0.25);
        assert_eq!(s.xmin, -0.75);
        assert_eq!(s.width(), 2.0);
    }
}
