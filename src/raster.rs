//! Deterministic rasterisation of committed shapes into a binary mask
//!
//! Pixels are sampled at their centres `(x + 0.5, y + 0.5)`. Shapes are drawn
//! in insertion order onto a black ("keep") background: paint strokes,
//! rectangles and lassos write white ("remove"), erase strokes write black.
//! Because the mask is strictly two-tone, writing black along an erase path is
//! exactly equivalent to removing earlier paint there.

use crate::error::{InpaintError, Result};
use crate::shapes::{Point, Shape};
use image::imageops::FilterType;
use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;

/// Mask value for pixels the backend must preserve
pub const MASK_KEEP: u8 = 0;
/// Mask value for pixels the backend should remove
pub const MASK_REMOVE: u8 = 255;

/// Binary mask raster (white = remove, black = keep)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    image: GrayImage,
}

impl Mask {
    /// An all-keep mask
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([MASK_KEEP])),
        }
    }

    /// Decode a mask image, thresholding every channel value to 0 or 255
    pub fn from_png(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?.to_luma8();
        let mut image = decoded;
        for pixel in image.pixels_mut() {
            pixel.0 = [if pixel.0[0] > 127 { MASK_REMOVE } else { MASK_KEEP }];
        }
        Ok(Self { image })
    }

    /// Nearest-neighbour resize, keeping the mask strictly two-tone
    #[must_use]
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Self {
            image: image::imageops::resize(&self.image, width, height, FilterType::Nearest),
        }
    }

    /// Encode as PNG for upload
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Whether the pixel is marked for removal; out-of-bounds pixels are kept
    #[must_use]
    pub fn is_removed(&self, x: u32, y: u32) -> bool {
        self.image
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] == MASK_REMOVE)
    }

    #[must_use]
    pub fn removed_pixel_count(&self) -> usize {
        self.image
            .pixels()
            .filter(|p| p.0[0] == MASK_REMOVE)
            .count()
    }

    /// True when nothing is marked for removal
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.pixels().all(|p| p.0[0] == MASK_KEEP)
    }

    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

/// Renders shape sequences into masks
pub struct Rasterizer;

impl Rasterizer {
    /// Render `shapes` in order into a `width` x `height` mask
    ///
    /// Pure: the output depends only on the arguments.
    #[must_use]
    pub fn render(shapes: &[Shape], width: u32, height: u32) -> Mask {
        let mut canvas = Canvas::new(width, height);
        for shape in shapes {
            match shape {
                Shape::FreehandStroke {
                    points,
                    width: stroke_width,
                    ..
                } => {
                    let value = if shape.is_eraser() { MASK_KEEP } else { MASK_REMOVE };
                    canvas.stroke_polyline(points, stroke_width / 2.0, value);
                },
                Shape::Rectangle {
                    x,
                    y,
                    width: w,
                    height: h,
                } => {
                    if *w > 0.0 && *h > 0.0 {
                        canvas.fill_rect(*x, *y, *w, *h, MASK_REMOVE);
                    }
                },
                Shape::LassoPolygon { points } => {
                    if points.len() >= 3 {
                        canvas.fill_polygon_nonzero(points, MASK_REMOVE);
                    }
                },
            }
        }
        Mask {
            image: canvas.image,
        }
    }

    /// Render and check the result matches the expected working dimensions
    pub fn render_for(shapes: &[Shape], dimensions: (u32, u32)) -> Result<Mask> {
        let (width, height) = dimensions;
        if width == 0 || height == 0 {
            return Err(InpaintError::validation(format!(
                "Cannot render a mask with zero dimension ({}x{})",
                width, height
            )));
        }
        Ok(Self::render(shapes, width, height))
    }
}

struct Canvas {
    image: GrayImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([MASK_KEEP])),
        }
    }

    /// Half-open pixel index range whose centres fall in `[start, end)`
    fn centre_span(start: f64, end: f64, limit: u32) -> (u32, u32) {
        let lo = (start - 0.5).ceil().max(0.0);
        let hi = (end - 0.5).ceil().min(f64::from(limit));
        if hi <= lo {
            return (0, 0);
        }
        (lo as u32, hi as u32)
    }

    fn fill_span(&mut self, y: u32, x0: u32, x1: u32, value: u8) {
        for x in x0..x1 {
            self.image.put_pixel(x, y, Luma([value]));
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, value: u8) {
        let (x0, x1) = Self::centre_span(x, x + w, self.image.width());
        let (y0, y1) = Self::centre_span(y, y + h, self.image.height());
        for row in y0..y1 {
            self.fill_span(row, x0, x1, value);
        }
    }

    /// Union of round-capped segments: every pixel whose centre lies within
    /// `radius` of the polyline. A single point renders as a dot.
    fn stroke_polyline(&mut self, points: &[Point], radius: f64, value: u8) {
        if radius <= 0.0 || !radius.is_finite() {
            return;
        }
        match points {
            [] => {},
            [only] => self.stroke_segment(*only, *only, radius, value),
            _ => {
                for pair in points.windows(2) {
                    if let [a, b] = pair {
                        self.stroke_segment(*a, *b, radius, value);
                    }
                }
            },
        }
    }

    fn stroke_segment(&mut self, a: Point, b: Point, radius: f64, value: u8) {
        let (x0, x1) = Self::centre_span(
            a.x.min(b.x) - radius,
            a.x.max(b.x) + radius + 1.0,
            self.image.width(),
        );
        let (y0, y1) = Self::centre_span(
            a.y.min(b.y) - radius,
            a.y.max(b.y) + radius + 1.0,
            self.image.height(),
        );
        let radius_sq = radius * radius;

        for py in y0..y1 {
            let cy = f64::from(py) + 0.5;
            for px in x0..x1 {
                let cx = f64::from(px) + 0.5;
                if distance_sq_to_segment(cx, cy, a, b) <= radius_sq {
                    self.image.put_pixel(px, py, Luma([value]));
                }
            }
        }
    }

    /// Scanline fill under the non-zero winding rule
    fn fill_polygon_nonzero(&mut self, points: &[Point], value: u8) {
        let (min_y, max_y) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        let (y0, y1) = Self::centre_span(min_y, max_y + 1.0, self.image.height());
        let width = self.image.width();
        let mut crossings: Vec<(f64, i32)> = Vec::with_capacity(points.len());

        for py in y0..y1 {
            let cy = f64::from(py) + 0.5;
            crossings.clear();

            for (i, a) in points.iter().enumerate() {
                let b = points.get((i + 1) % points.len()).unwrap_or(a);
                let direction = if a.y <= cy && b.y > cy {
                    1
                } else if b.y <= cy && a.y > cy {
                    -1
                } else {
                    continue;
                };
                let x = a.x + (cy - a.y) * (b.x - a.x) / (b.y - a.y);
                crossings.push((x, direction));
            }

            crossings.sort_by(|l, r| l.0.total_cmp(&r.0));

            let mut winding = 0;
            let mut span_start = 0.0;
            for &(x, direction) in &crossings {
                let before = winding;
                winding += direction;
                if before == 0 && winding != 0 {
                    span_start = x;
                } else if before != 0 && winding == 0 {
                    let (x0, x1) = Self::centre_span(span_start, x, width);
                    self.fill_span(py, x0, x1, value);
                }
            }
        }
    }
}

fn distance_sq_to_segment(px: f64, py: f64, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - a.x) * dx + (py - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = a.x + t * dx;
    let cy = a.y + t * dy;
    (px - cx) * (px - cx) + (py - cy) * (py - cy)
}
