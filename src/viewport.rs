//! Zoom and pan state, and screen/image coordinate conversion
//!
//! The viewport only affects how pointer input is mapped into image space.
//! Shapes are stored in image space, so nothing here ever touches them.

use crate::shapes::Point;
use serde::{Deserialize, Serialize};

/// Smallest allowed zoom factor
pub const MIN_SCALE: f64 = 0.5;
/// Largest allowed zoom factor
pub const MAX_SCALE: f64 = 5.0;
/// Zoom factor applied per wheel step
pub const WHEEL_ZOOM_FACTOR: f64 = 1.1;
/// Zoom factor applied per zoom-button press
pub const BUTTON_ZOOM_FACTOR: f64 = 1.2;

/// Direction of a wheel step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    /// Wheel convention: scrolling up (negative delta) zooms in
    #[must_use]
    pub fn from_wheel_delta(delta_y: f64) -> Self {
        if delta_y < 0.0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Current scale and pan offset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub offset: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Point::new(0.0, 0.0),
        }
    }
}

/// Owns the viewport and applies zoom/pan gestures to it
#[derive(Debug, Clone, Default)]
pub struct ViewportController {
    viewport: Viewport,
}

impl ViewportController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.viewport.scale
    }

    #[must_use]
    pub fn offset(&self) -> Point {
        self.viewport.offset
    }

    /// Zoom readout, e.g. `150` for 1.5x
    #[must_use]
    pub fn zoom_percent(&self) -> u32 {
        (self.viewport.scale * 100.0).round() as u32
    }

    /// One wheel step, keeping the image point under `pointer` fixed on screen
    pub fn zoom_at(&mut self, pointer: Point, direction: ZoomDirection) {
        let old_scale = self.viewport.scale;
        let proposed = match direction {
            ZoomDirection::In => old_scale * WHEEL_ZOOM_FACTOR,
            ZoomDirection::Out => old_scale / WHEEL_ZOOM_FACTOR,
        };
        let new_scale = clamp_scale(proposed);

        let anchor = self.to_image(pointer);
        self.viewport = Viewport {
            scale: new_scale,
            offset: Point::new(
                pointer.x - anchor.x * new_scale,
                pointer.y - anchor.y * new_scale,
            ),
        };
        log::trace!("Wheel zoom {:.3} -> {:.3}", old_scale, new_scale);
    }

    /// Zoom-button step; the offset is left untouched
    pub fn zoom_in_step(&mut self) {
        self.viewport.scale = clamp_scale(self.viewport.scale * BUTTON_ZOOM_FACTOR);
    }

    /// Zoom-button step; the offset is left untouched
    pub fn zoom_out_step(&mut self) {
        self.viewport.scale = clamp_scale(self.viewport.scale / BUTTON_ZOOM_FACTOR);
    }

    /// Drag-pan by a screen-space delta
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.viewport.offset.x += dx;
        self.viewport.offset.y += dy;
    }

    /// Map a screen point into image space: `(screen - offset) / scale`
    #[must_use]
    pub fn to_image(&self, screen: Point) -> Point {
        let Viewport { scale, offset } = self.viewport;
        Point::new((screen.x - offset.x) / scale, (screen.y - offset.y) / scale)
    }

    /// Map an image point onto the screen
    #[must_use]
    pub fn to_screen(&self, image: Point) -> Point {
        let Viewport { scale, offset } = self.viewport;
        Point::new(image.x * scale + offset.x, image.y * scale + offset.y)
    }

    /// Back to `scale = 1`, `offset = (0, 0)`
    pub fn reset(&mut self) {
        self.viewport = Viewport::default();
    }
}

fn clamp_scale(scale: f64) -> f64 {
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_is_identity() {
        let vc = ViewportController::new();
        let p = vc.to_image(Point::new(12.0, 34.0));
        assert_eq!(p, Point::new(12.0, 34.0));
        assert_eq!(vc.zoom_percent(), 100);
    }

    #[test]
    fn test_wheel_zoom_keeps_pointer_fixed() {
        let mut vc = ViewportController::new();
        vc.pan_by(13.0, -7.0);
        let pointer = Point::new(200.0, 150.0);
        let before = vc.to_image(pointer);

        vc.zoom_at(pointer, ZoomDirection::In);
        assert!(approx(vc.scale(), 1.1));
        let after = vc.to_image(pointer);
        assert!(approx(before.x, after.x));
        assert!(approx(before.y, after.y));

        vc.zoom_at(pointer, ZoomDirection::Out);
        vc.zoom_at(pointer, ZoomDirection::Out);
        let after = vc.to_image(pointer);
        assert!(approx(before.x, after.x));
        assert!(approx(before.y, after.y));
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut vc = ViewportController::new();
        for _ in 0..100 {
            vc.zoom_at(Point::new(0.0, 0.0), ZoomDirection::In);
        }
        assert!(approx(vc.scale(), MAX_SCALE));

        for _ in 0..100 {
            vc.zoom_out_step();
        }
        assert!(approx(vc.scale(), MIN_SCALE));
    }

    #[test]
    fn test_button_zoom_leaves_offset() {
        let mut vc = ViewportController::new();
        vc.pan_by(5.0, 6.0);
        vc.zoom_in_step();
        assert!(approx(vc.scale(), 1.2));
        assert_eq!(vc.offset(), Point::new(5.0, 6.0));
        assert_eq!(vc.zoom_percent(), 120);
    }

    #[test]
    fn test_screen_image_roundtrip() {
        let mut vc = ViewportController::new();
        vc.zoom_at(Point::new(40.0, 40.0), ZoomDirection::In);
        vc.pan_by(-3.5, 8.25);
        let image_point = Point::new(17.0, 29.0);
        let back = vc.to_image(vc.to_screen(image_point));
        assert!(approx(back.x, image_point.x));
        assert!(approx(back.y, image_point.y));
    }

    #[test]
    fn test_reset() {
        let mut vc = ViewportController::new();
        vc.zoom_in_step();
        vc.pan_by(1.0, 1.0);
        vc.reset();
        assert_eq!(vc.viewport(), Viewport::default());
    }

    #[test]
    fn test_wheel_direction() {
        assert_eq!(ZoomDirection::from_wheel_delta(-120.0), ZoomDirection::In);
        assert_eq!(ZoomDirection::from_wheel_delta(120.0), ZoomDirection::Out);
    }
}
