//! Vector mask shapes and the undoable shape store
//!
//! Shapes are authored through a small state machine (`Idle` → `Drawing` → `Idle`)
//! and committed into a linear history with an explicit redo buffer. All
//! coordinates are image-space pixels, so nothing stored here depends on the
//! current zoom or pan.

use crate::error::{InpaintError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A point in image space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Whether a freehand stroke marks pixels for removal or restores them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushKind {
    Paint,
    Erase,
}

/// Tools that start a point-sequence shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeKind {
    Paint,
    Erase,
    Lasso,
}

/// A committed mask shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    FreehandStroke {
        brush: BrushKind,
        points: Vec<Point>,
        width: f64,
    },
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    LassoPolygon {
        points: Vec<Point>,
    },
}

impl Shape {
    /// Rectangle spanned by two opposite corners, normalised to a positive size
    #[must_use]
    pub fn rectangle_from_corners(a: Point, b: Point) -> Self {
        Self::Rectangle {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    /// Whether this shape would leave any mark on the mask
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::FreehandStroke { points, width, .. } => points.is_empty() || *width <= 0.0,
            Self::Rectangle { width, height, .. } => *width <= 0.0 || *height <= 0.0,
            Self::LassoPolygon { points } => points.len() < 3,
        }
    }

    /// Copy with every coordinate and width multiplied by `factor`
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |p: &Point| Point::new(p.x * factor, p.y * factor);
        match self {
            Self::FreehandStroke {
                brush,
                points,
                width,
            } => Self::FreehandStroke {
                brush: *brush,
                points: points.iter().map(scale).collect(),
                width: width * factor,
            },
            Self::Rectangle {
                x,
                y,
                width,
                height,
            } => Self::Rectangle {
                x: x * factor,
                y: y * factor,
                width: width * factor,
                height: height * factor,
            },
            Self::LassoPolygon { points } => Self::LassoPolygon {
                points: points.iter().map(scale).collect(),
            },
        }
    }

    /// Whether this shape paints background back over earlier shapes
    #[must_use]
    pub fn is_eraser(&self) -> bool {
        matches!(
            self,
            Self::FreehandStroke {
                brush: BrushKind::Erase,
                ..
            }
        )
    }
}

/// The shape currently being authored
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Stroke {
        brush: BrushKind,
        points: Vec<Point>,
        width: f64,
    },
    Lasso {
        points: Vec<Point>,
    },
    Rectangle {
        anchor: Point,
        corner: Point,
    },
}

impl Draft {
    fn extend(&mut self, point: Point) {
        match self {
            Self::Stroke { points, .. } | Self::Lasso { points } => points.push(point),
            Self::Rectangle { corner, .. } => *corner = point,
        }
    }

    fn into_shape(self) -> Shape {
        match self {
            Self::Stroke {
                brush,
                points,
                width,
            } => Shape::FreehandStroke {
                brush,
                points,
                width,
            },
            Self::Lasso { points } => Shape::LassoPolygon { points },
            Self::Rectangle { anchor, corner } => Shape::rectangle_from_corners(anchor, corner),
        }
    }
}

/// Pointer authoring state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Authoring {
    #[default]
    Idle,
    Drawing(Draft),
}

/// What `complete()` did with the in-progress shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Committed,
    Discarded,
}

/// Ordered, undoable sequence of authored shapes
///
/// Every completed shape lives in exactly one of `committed` or the redo
/// buffer. Moving between them is a value move.
#[derive(Debug, Clone, Default)]
pub struct ShapeStore {
    committed: Vec<Shape>,
    redo_buffer: VecDeque<Shape>,
    authoring: Authoring,
    revision: u64,
}

impl ShapeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a freehand stroke or lasso with a single vertex
    ///
    /// Discards the redo buffer. `width` is ignored for lassos.
    pub fn begin_stroke(&mut self, kind: StrokeKind, point: Point, width: f64) -> Result<()> {
        let draft = match kind {
            StrokeKind::Paint | StrokeKind::Erase => {
                if !(width.is_finite() && width > 0.0) {
                    return Err(InpaintError::validation(format!(
                        "Brush width must be positive, got {}",
                        width
                    )));
                }
                Draft::Stroke {
                    brush: if kind == StrokeKind::Erase {
                        BrushKind::Erase
                    } else {
                        BrushKind::Paint
                    },
                    points: vec![point],
                    width,
                }
            },
            StrokeKind::Lasso => Draft::Lasso {
                points: vec![point],
            },
        };
        self.begin(draft)
    }

    /// Record the anchor corner of a rectangle
    pub fn begin_rectangle(&mut self, point: Point) -> Result<()> {
        self.begin(Draft::Rectangle {
            anchor: point,
            corner: point,
        })
    }

    fn begin(&mut self, draft: Draft) -> Result<()> {
        if self.is_drawing() {
            return Err(InpaintError::validation(
                "Cannot begin a shape while another is in progress",
            ));
        }
        self.redo_buffer.clear();
        self.authoring = Authoring::Drawing(draft);
        Ok(())
    }

    /// Append a vertex, or move the rectangle's opposite corner
    pub fn extend(&mut self, point: Point) -> Result<()> {
        match &mut self.authoring {
            Authoring::Drawing(draft) => {
                draft.extend(point);
                Ok(())
            },
            Authoring::Idle => Err(InpaintError::validation("No shape in progress to extend")),
        }
    }

    /// Commit the in-progress shape
    ///
    /// Zero-area rectangles and lassos with fewer than three vertices are
    /// discarded rather than committed.
    pub fn complete(&mut self) -> Result<Completion> {
        let Authoring::Drawing(draft) = std::mem::take(&mut self.authoring) else {
            return Err(InpaintError::validation("No shape in progress to complete"));
        };

        let shape = draft.into_shape();
        let keep = match &shape {
            Shape::Rectangle { .. } | Shape::LassoPolygon { .. } => !shape.is_degenerate(),
            Shape::FreehandStroke { .. } => true,
        };

        if keep {
            self.committed.push(shape);
            self.bump();
            Ok(Completion::Committed)
        } else {
            log::debug!("Discarding degenerate shape: {:?}", shape);
            Ok(Completion::Discarded)
        }
    }

    /// Drop the in-progress shape without committing it
    pub fn cancel(&mut self) {
        self.authoring = Authoring::Idle;
    }

    /// Move the last committed shape to the front of the redo buffer
    pub fn undo(&mut self) -> bool {
        match self.committed.pop() {
            Some(shape) => {
                self.redo_buffer.push_front(shape);
                self.bump();
                true
            },
            None => false,
        }
    }

    /// Move the first redo shape back onto the end of the committed list
    pub fn redo(&mut self) -> bool {
        match self.redo_buffer.pop_front() {
            Some(shape) => {
                self.committed.push(shape);
                self.bump();
                true
            },
            None => false,
        }
    }

    /// Empty both the committed list and the redo buffer
    pub fn clear(&mut self) {
        let had_shapes = !self.committed.is_empty();
        self.committed.clear();
        self.redo_buffer.clear();
        self.authoring = Authoring::Idle;
        if had_shapes {
            self.bump();
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    #[must_use]
    pub fn committed(&self) -> &[Shape] {
        &self.committed
    }

    /// Redo buffer, front first
    pub fn redo_buffer(&self) -> impl ExactSizeIterator<Item = &Shape> {
        self.redo_buffer.iter()
    }

    #[must_use]
    pub fn authoring(&self) -> &Authoring {
        &self.authoring
    }

    #[must_use]
    pub fn is_drawing(&self) -> bool {
        matches!(self.authoring, Authoring::Drawing(_))
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.committed.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_buffer.is_empty()
    }

    /// Counter bumped whenever the committed sequence changes length
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replay already-authored shapes, e.g. from a saved shapes document
    pub fn extend_committed<I: IntoIterator<Item = Shape>>(&mut self, shapes: I) -> usize {
        let before = self.committed.len();
        self.committed
            .extend(shapes.into_iter().filter(|s| match s {
                Shape::Rectangle { .. } | Shape::LassoPolygon { .. } => !s.is_degenerate(),
                Shape::FreehandStroke { .. } => true,
            }));
        let added = self.committed.len() - before;
        if added > 0 {
            self.redo_buffer.clear();
            self.bump();
        }
        added
    }
}
