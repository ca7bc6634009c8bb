use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Pixel position in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Integer centre, rounded towards the top-left like the click targets we compute.
    pub fn center(&self) -> Point {
        Point::new(
            (self.x + self.width / 2) as i32,
            (self.y + self.height / 2) as i32,
        )
    }
}

/// Immutable full-screen snapshot. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: chrono::Utc::now(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        Frame::new(image)
    }
}

/// Result of matching one template against one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Normalised cross-correlation in [0, 1].
    pub score: f64,
    pub rect: Rect,
    pub center: Point,
}

impl Detection {
    pub fn new(score: f64, rect: Rect) -> Self {
        Self {
            score,
            rect,
            center: rect.center(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_center_rounds_down() {
        let r = Rect::new(10, 20, 33, 34);
        assert_eq!(r.center(), Point::new(26, 37));
        assert_eq!(r.right(), 43);
        assert_eq!(r.bottom(), 54);
    }

    #[test]
    fn frame_clone_shares_pixels() {
        let frame = Frame::new(RgbImage::new(4, 3));
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.image(), copy.image()));
        assert_eq!((copy.width(), copy.height()), (4, 3));
    }
}
