use serde::Serialize;

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from `[x1, y1, x2, y2]` corners, clamped to the frame.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64, frame_w: u32, frame_h: u32) -> Self {
        let fw = frame_w as i32;
        let fh = frame_h as i32;
        let left = (x1.round() as i32).clamp(0, fw);
        let top = (y1.round() as i32).clamp(0, fh);
        let right = (x2.round() as i32).clamp(0, fw);
        let bottom = (y2.round() as i32).clamp(0, fh);
        Self::new(left, top, (right - left).max(0), (bottom - top).max(0))
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        inter / (self.area() as f64 + other.area() as f64 - inter)
    }

    /// Square box centered on this one, clamped to frame bounds.
    pub fn square_within(&self, frame_w: u32, frame_h: u32) -> BoundingBox {
        let fw = frame_w as i32;
        let fh = frame_h as i32;

        let cx = self.x + self.width / 2;
        let cy = self.y + self.height / 2;
        let half = self.width.max(self.height) / 2;

        let x1 = (cx - half).max(0);
        let y1 = (cy - half).max(0);
        let x2 = (cx + half).min(fw);
        let y2 = (cy + half).min(fh);
        BoundingBox::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
    }
}
