//! The editing session: one source image, its mask shapes and its jobs
//!
//! Shape edits and viewport gestures are synchronous. Network work is split
//! into `prepare_*` (validate, compress, claim the single in-flight slot),
//! an async execution step that holds no borrow of the session, and
//! `complete_*` (release the slot, apply the result if still current).
//! Changing the source image cancels whatever is in flight.

use crate::backend::ImageOperations;
use crate::compression::{CompressionPolicy, PAIRED_CEILING_MB};
use crate::config::{ClientConfig, QualityPreset};
use crate::error::{InpaintError, Result};
use crate::orchestrator::{EditRequest, JobBackend, JobObserver, JobOrchestrator, JobOutcome};
use crate::raster::{Mask, Rasterizer};
use crate::shapes::{Completion, Point, Shape, ShapeStore, StrokeKind};
use crate::types::{ImagePayload, OutpaintExtents};
use crate::viewport::ViewportController;
use image::ImageReader;
use std::io::Cursor;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// An encoded source image and its natural dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    payload: ImagePayload,
    width: u32,
    height: u32,
}

impl SourceImage {
    /// Sniff the format and read dimensions without a full decode
    pub fn from_bytes<S: AsRef<str>>(file_name: S, bytes: Vec<u8>) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(&bytes)).with_guessed_format()?;
        let format = reader.format();
        let (width, height) = reader.into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(InpaintError::validation("Image has zero width or height"));
        }

        let payload = match format {
            Some(format) => ImagePayload::new(file_name.as_ref(), format.to_mime_type(), bytes),
            None => ImagePayload::from_named_bytes(file_name.as_ref(), bytes),
        };
        Ok(Self {
            payload,
            width,
            height,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png");
        Self::from_bytes(name, bytes)
    }

    #[must_use]
    pub fn payload(&self) -> &ImagePayload {
        &self.payload
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Natural size, or width capped at `max_width` with the aspect ratio kept
    #[must_use]
    pub fn working_dimensions(&self, max_width: Option<u32>) -> (u32, u32) {
        match max_width {
            Some(max) if max > 0 && self.width > max => {
                let scaled = u64::from(self.height) * u64::from(max) / u64::from(self.width);
                let height = scaled as u32;
                (max, height.max(1))
            },
            _ => (self.width, self.height),
        }
    }
}

/// Linear history of source images with a cursor
#[derive(Debug, Clone)]
pub struct EditHistory {
    entries: Vec<SourceImage>,
    cursor: usize,
}

impl EditHistory {
    #[must_use]
    pub fn new(original: SourceImage) -> Self {
        Self {
            entries: vec![original],
            cursor: 0,
        }
    }

    #[must_use]
    pub fn current(&self) -> &SourceImage {
        &self.entries[self.cursor]
    }

    /// Drop everything after the cursor, then append
    pub fn push(&mut self, image: SourceImage) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(image);
        self.cursor = self.entries.len() - 1;
    }

    pub fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 >= self.entries.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Keep only the original image
    pub fn reset(&mut self) -> bool {
        if self.entries.len() == 1 {
            return false;
        }
        self.entries.truncate(1);
        self.cursor = 0;
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }
}

/// Drawing tools
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tool {
    Brush { width: f64 },
    Eraser { width: f64 },
    Lasso,
    Rectangle,
}

/// Operations that replace the source image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOperation {
    RemoveBackground,
    ReplaceBackground(ImagePayload),
    Outpaint(OutpaintExtents),
}

/// Operations that produce a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOperation {
    AutoDetect,
    RefineEdges,
}

/// Claim on the session's single in-flight slot
#[derive(Debug, Clone)]
pub struct JobTicket {
    id: u64,
    cancel: CancellationToken,
}

impl JobTicket {
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn guard<T, F>(&self, work: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(InpaintError::Cancelled),
            r = work => r,
        }
    }
}

/// A validated inpaint submission
#[derive(Debug, Clone)]
pub struct PendingInpaint {
    pub ticket: JobTicket,
    pub request: EditRequest,
}

impl PendingInpaint {
    pub async fn execute<B>(
        &self,
        orchestrator: &JobOrchestrator,
        backend: &B,
        observer: &dyn JobObserver,
    ) -> Result<JobOutcome>
    where
        B: JobBackend + ?Sized,
    {
        orchestrator
            .run(backend, &self.request, &self.ticket.cancel, observer)
            .await
    }
}

/// A validated image-replacing operation
#[derive(Debug, Clone)]
pub struct PendingImageOperation {
    pub ticket: JobTicket,
    pub operation: ImageOperation,
    pub image: ImagePayload,
}

impl PendingImageOperation {
    pub async fn execute<B: ImageOperations + ?Sized>(&self, backend: &B) -> Result<Vec<u8>> {
        match &self.operation {
            ImageOperation::RemoveBackground => {
                self.ticket.guard(backend.remove_background(&self.image)).await
            },
            ImageOperation::ReplaceBackground(background) => {
                self.ticket
                    .guard(backend.replace_background(&self.image, background))
                    .await
            },
            ImageOperation::Outpaint(extents) => {
                self.ticket.guard(backend.outpaint(&self.image, *extents)).await
            },
        }
    }
}

/// A validated mask-producing operation
#[derive(Debug, Clone)]
pub struct PendingMaskOperation {
    pub ticket: JobTicket,
    pub operation: MaskOperation,
    pub image: ImagePayload,
    pub mask: Option<ImagePayload>,
}

impl PendingMaskOperation {
    pub async fn execute<B: ImageOperations + ?Sized>(&self, backend: &B) -> Result<Vec<u8>> {
        match (self.operation, &self.mask) {
            (MaskOperation::AutoDetect, _) => {
                self.ticket.guard(backend.auto_mask(&self.image, true)).await
            },
            (MaskOperation::RefineEdges, Some(mask)) => {
                self.ticket.guard(backend.refine_edges(&self.image, mask)).await
            },
            (MaskOperation::RefineEdges, None) => {
                Err(InpaintError::validation("Refine edges requires a mask"))
            },
        }
    }
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ExternalMask {
    mask: Mask,
    /// Shape revision the mask was received at
    revision: u64,
}

/// State for editing one image lineage
#[derive(Debug)]
pub struct EditingSession {
    compression: CompressionPolicy,
    paired_compression: CompressionPolicy,
    quality: QualityPreset,
    max_working_width: Option<u32>,
    history: EditHistory,
    shapes: ShapeStore,
    viewport: ViewportController,
    raster: Option<Mask>,
    raster_revision: u64,
    external_mask: Option<ExternalMask>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
}

impl EditingSession {
    #[must_use]
    pub fn new(image: SourceImage, config: &ClientConfig) -> Self {
        let shapes = ShapeStore::new();
        Self {
            compression: CompressionPolicy::new(config.compression_ceiling_mb),
            paired_compression: CompressionPolicy::new(PAIRED_CEILING_MB),
            quality: config.quality,
            max_working_width: config.max_working_width,
            history: EditHistory::new(image),
            raster_revision: shapes.revision(),
            shapes,
            viewport: ViewportController::new(),
            raster: None,
            external_mask: None,
            in_flight: None,
            next_ticket: 0,
        }
    }

    #[must_use]
    pub fn current_image(&self) -> &SourceImage {
        self.history.current()
    }

    #[must_use]
    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    #[must_use]
    pub fn shapes(&self) -> &ShapeStore {
        &self.shapes
    }

    /// Direct access for replaying shapes already in image space
    pub fn shapes_mut(&mut self) -> &mut ShapeStore {
        &mut self.shapes
    }

    #[must_use]
    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportController {
        &mut self.viewport
    }

    #[must_use]
    pub fn quality(&self) -> QualityPreset {
        self.quality
    }

    pub fn set_quality(&mut self, quality: QualityPreset) {
        self.quality = quality;
    }

    /// Dimensions of the exported mask
    #[must_use]
    pub fn working_dimensions(&self) -> (u32, u32) {
        self.current_image().working_dimensions(self.max_working_width)
    }

    /// Working pixels per natural pixel
    fn display_factor(&self) -> f64 {
        let (natural_width, _) = self.current_image().dimensions();
        let (working_width, _) = self.working_dimensions();
        f64::from(working_width) / f64::from(natural_width)
    }

    /// Screen point to natural image coordinates
    #[must_use]
    pub fn screen_to_image(&self, screen: Point) -> Point {
        let canvas = self.viewport.to_image(screen);
        let factor = self.display_factor();
        Point::new(canvas.x / factor, canvas.y / factor)
    }

    pub fn pointer_down(&mut self, tool: Tool, screen: Point) -> Result<()> {
        let point = self.screen_to_image(screen);
        let factor = self.display_factor();
        match tool {
            Tool::Brush { width } => {
                self.shapes
                    .begin_stroke(StrokeKind::Paint, point, width / factor)
            },
            Tool::Eraser { width } => {
                self.shapes
                    .begin_stroke(StrokeKind::Erase, point, width / factor)
            },
            Tool::Lasso => self.shapes.begin_stroke(StrokeKind::Lasso, point, 1.0),
            Tool::Rectangle => self.shapes.begin_rectangle(point),
        }
    }

    /// Hover moves outside a drag are ignored
    pub fn pointer_move(&mut self, screen: Point) -> Result<()> {
        if !self.shapes.is_drawing() {
            return Ok(());
        }
        let point = self.screen_to_image(screen);
        self.shapes.extend(point)
    }

    pub fn pointer_up(&mut self) -> Result<Completion> {
        if !self.shapes.is_drawing() {
            return Ok(Completion::Discarded);
        }
        self.shapes.complete()
    }

    /// Pointer left the canvas mid-drag; the draft is dropped
    pub fn pointer_cancel(&mut self) {
        self.shapes.cancel();
    }

    pub fn undo_shape(&mut self) -> bool {
        self.shapes.undo()
    }

    pub fn redo_shape(&mut self) -> bool {
        self.shapes.redo()
    }

    /// Drop every shape and any detected or refined mask
    pub fn clear_shapes(&mut self) {
        self.shapes.clear();
        self.external_mask = None;
        self.raster = None;
        self.raster_revision = self.shapes.revision();
    }

    /// Whether the committed shapes changed since the last rasterisation
    #[must_use]
    pub fn needs_raster(&self) -> bool {
        self.raster_revision != self.shapes.revision()
    }

    /// Deferred work: rasterise if the committed shapes changed
    ///
    /// Returns whether a rasterisation pass ran.
    pub fn on_idle(&mut self) -> bool {
        if !self.needs_raster() {
            return false;
        }
        self.rasterize();
        true
    }

    fn rasterize(&mut self) {
        let (width, height) = self.working_dimensions();
        let committed = self.shapes.committed();
        self.raster = if committed.is_empty() {
            None
        } else {
            let factor = self.display_factor();
            let mask = if (factor - 1.0).abs() < f64::EPSILON {
                Rasterizer::render(committed, width, height)
            } else {
                let scaled: Vec<Shape> = committed.iter().map(|s| s.scaled(factor)).collect();
                Rasterizer::render(&scaled, width, height)
            };
            Some(mask)
        };
        self.raster_revision = self.shapes.revision();
        log::debug!(
            "Rasterised {} shapes at {}x{} (revision {})",
            committed.len(),
            width,
            height,
            self.raster_revision
        );
    }

    /// The mask that would be sent right now
    ///
    /// An external mask wins until the committed shape count changes.
    #[must_use]
    pub fn mask(&self) -> Option<&Mask> {
        match &self.external_mask {
            Some(external) if external.revision == self.shapes.revision() => Some(&external.mask),
            _ => self.raster.as_ref(),
        }
    }

    /// Flush deferred rasterisation, then return the current mask
    pub fn export_mask(&mut self) -> Option<&Mask> {
        self.on_idle();
        self.mask()
    }

    #[must_use]
    pub fn has_external_mask(&self) -> bool {
        matches!(&self.external_mask, Some(e) if e.revision == self.shapes.revision())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Abandon the in-flight job, if any
    pub fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(job) => {
                log::info!("Cancelling in-flight job {}", job.id);
                job.cancel.cancel();
                true
            },
            None => false,
        }
    }

    fn claim(&mut self) -> Result<JobTicket> {
        if self.in_flight.is_some() {
            return Err(InpaintError::validation("Another job is already in progress"));
        }
        self.next_ticket += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(InFlight {
            id: self.next_ticket,
            cancel: cancel.clone(),
        });
        Ok(JobTicket {
            id: self.next_ticket,
            cancel,
        })
    }

    /// Release the slot; false when the ticket was superseded
    fn release(&mut self, ticket: &JobTicket) -> bool {
        match &self.in_flight {
            Some(job) if job.id == ticket.id => {
                self.in_flight = None;
                true
            },
            _ => false,
        }
    }

    fn mask_payload(&mut self) -> Result<ImagePayload> {
        let mask = self
            .export_mask()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| InpaintError::validation("Draw a mask before submitting"))?;
        Ok(ImagePayload::png("mask.png", mask.to_png()?))
    }

    /// Validate and package an inpaint request
    ///
    /// # Errors
    /// - `Validation` when a job is already in flight or there is no mask
    pub fn prepare_inpaint(&mut self) -> Result<PendingInpaint> {
        if self.is_busy() {
            return Err(InpaintError::validation("Another job is already in progress"));
        }
        let mask = self.mask_payload()?;
        let image = self
            .compression
            .compress_or_original(self.current_image().payload().clone());
        let ticket = self.claim()?;
        Ok(PendingInpaint {
            ticket,
            request: EditRequest {
                image,
                mask,
                quality: self.quality,
            },
        })
    }

    pub fn complete_inpaint(
        &mut self,
        ticket: &JobTicket,
        outcome: Result<JobOutcome>,
    ) -> Result<()> {
        let bytes = self.settle(ticket, outcome.map(|o| o.image))?;
        self.push_result(bytes)
    }

    pub fn prepare_image_operation(
        &mut self,
        operation: ImageOperation,
    ) -> Result<PendingImageOperation> {
        let source = self.current_image().payload().clone();
        let (image, operation) = match operation {
            ImageOperation::ReplaceBackground(background) => (
                self.paired_compression.compress_or_original(source),
                ImageOperation::ReplaceBackground(
                    self.paired_compression.compress_or_original(background),
                ),
            ),
            other => (self.compression.compress_or_original(source), other),
        };
        let ticket = self.claim()?;
        Ok(PendingImageOperation {
            ticket,
            operation,
            image,
        })
    }

    pub fn complete_image_operation(
        &mut self,
        ticket: &JobTicket,
        result: Result<Vec<u8>>,
    ) -> Result<()> {
        let bytes = self.settle(ticket, result)?;
        self.push_result(bytes)
    }

    pub fn prepare_mask_operation(
        &mut self,
        operation: MaskOperation,
    ) -> Result<PendingMaskOperation> {
        let mask = match operation {
            MaskOperation::AutoDetect => None,
            MaskOperation::RefineEdges => Some(self.mask_payload().map_err(|_| {
                InpaintError::validation("Refine edges requires a mask")
            })?),
        };
        let source = self.current_image().payload().clone();
        let image = match operation {
            MaskOperation::AutoDetect => self.compression.compress_or_original(source),
            MaskOperation::RefineEdges => source,
        };
        let ticket = self.claim()?;
        Ok(PendingMaskOperation {
            ticket,
            operation,
            image,
            mask,
        })
    }

    pub fn complete_mask_operation(
        &mut self,
        ticket: &JobTicket,
        result: Result<Vec<u8>>,
    ) -> Result<()> {
        let bytes = self.settle(ticket, result)?;
        self.set_mask(Mask::from_png(&bytes)?);
        Ok(())
    }

    /// Use a ready-made mask until the committed shape count next changes
    pub fn set_mask(&mut self, mask: Mask) {
        let (width, height) = self.working_dimensions();
        self.on_idle();
        self.external_mask = Some(ExternalMask {
            mask: mask.resized(width, height),
            revision: self.shapes.revision(),
        });
    }

    fn settle(&mut self, ticket: &JobTicket, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        if !self.release(ticket) {
            log::debug!("Discarding result of superseded job {}", ticket.id);
            return Err(InpaintError::Cancelled);
        }
        result
    }

    fn push_result(&mut self, bytes: Vec<u8>) -> Result<()> {
        let stem = self.current_image().payload().stem().to_string();
        let image = SourceImage::from_bytes(format!("{}.png", stem), bytes)?;
        self.history.push(image);
        self.source_changed();
        Ok(())
    }

    /// Start over with a new image
    pub fn load_image(&mut self, image: SourceImage) {
        self.history = EditHistory::new(image);
        self.source_changed();
    }

    pub fn undo_image(&mut self) -> bool {
        let changed = self.history.undo();
        if changed {
            self.source_changed();
        }
        changed
    }

    pub fn redo_image(&mut self) -> bool {
        let changed = self.history.redo();
        if changed {
            self.source_changed();
        }
        changed
    }

    pub fn reset_image(&mut self) -> bool {
        let changed = self.history.reset();
        if changed {
            self.source_changed();
        }
        changed
    }

    fn source_changed(&mut self) {
        self.cancel_in_flight();
        self.viewport.reset();
        self.shapes.clear();
        self.external_mask = None;
        self.rasterize();
        let (width, height) = self.current_image().dimensions();
        log::info!(
            "Source image is now {} ({}x{}, {}/{})",
            self.current_image().payload().file_name,
            width,
            height,
            self.history.position() + 1,
            self.history.len()
        );
    }

    /// Prepare, submit and apply an inpaint in one call
    pub async fn run_inpaint<B>(
        &mut self,
        orchestrator: &JobOrchestrator,
        backend: &B,
        observer: &dyn JobObserver,
    ) -> Result<()>
    where
        B: JobBackend + ?Sized,
    {
        let pending = self.prepare_inpaint()?;
        let outcome = pending.execute(orchestrator, backend, observer).await;
        self.complete_inpaint(&pending.ticket, outcome)
    }

    pub async fn run_image_operation<B>(
        &mut self,
        backend: &B,
        operation: ImageOperation,
    ) -> Result<()>
    where
        B: ImageOperations + ?Sized,
    {
        let pending = self.prepare_image_operation(operation)?;
        let result = pending.execute(backend).await;
        self.complete_image_operation(&pending.ticket, result)
    }

    pub async fn run_mask_operation<B>(
        &mut self,
        backend: &B,
        operation: MaskOperation,
    ) -> Result<()>
    where
        B: ImageOperations + ?Sized,
    {
        let pending = self.prepare_mask_operation(operation)?;
        let result = pending.execute(backend).await;
        self.complete_mask_operation(&pending.ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([40, 90, 160]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn source(width: u32, height: u32) -> SourceImage {
        SourceImage::from_bytes("photo.png", png_bytes(width, height)).unwrap()
    }

    #[test]
    fn test_source_image_dimensions() {
        let image = source(1600, 900);
        assert_eq!(image.dimensions(), (1600, 900));
        assert_eq!(image.payload().content_type, "image/png");
        assert_eq!(image.working_dimensions(None), (1600, 900));
        assert_eq!(image.working_dimensions(Some(800)), (800, 450));
        assert_eq!(image.working_dimensions(Some(4000)), (1600, 900));
        assert!(SourceImage::from_bytes("x.png", vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_history_push_truncates_redo() {
        let mut history = EditHistory::new(source(4, 4));
        history.push(source(5, 5));
        history.push(source(6, 6));
        assert!(history.undo());
        assert!(history.undo());
        assert!(!history.undo());
        history.push(source(7, 7));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(history.current().dimensions(), (7, 7));

        assert!(history.reset());
        assert_eq!(history.current().dimensions(), (4, 4));
        assert!(!history.reset());
    }

    #[test]
    fn test_rasterisation_is_deferred() {
        let mut session = EditingSession::new(source(64, 64), &ClientConfig::default());
        session.pointer_down(Tool::Rectangle, Point::new(8.0, 8.0)).unwrap();
        session.pointer_move(Point::new(24.0, 24.0)).unwrap();
        assert!(!session.needs_raster());
        session.pointer_up().unwrap();

        assert!(session.needs_raster());
        assert!(session.mask().is_none());
        assert!(session.on_idle());
        assert!(!session.on_idle());
        assert!(session.mask().unwrap().is_removed(10, 10));
    }

    #[test]
    fn test_pointer_input_respects_viewport() {
        let mut session = EditingSession::new(source(100, 100), &ClientConfig::default());
        session.viewport_mut().zoom_in_step();
        session.viewport_mut().pan_by(10.0, 10.0);

        session.pointer_down(Tool::Rectangle, Point::new(22.0, 22.0)).unwrap();
        session.pointer_move(Point::new(46.0, 46.0)).unwrap();
        session.pointer_up().unwrap();

        match &session.shapes().committed()[0] {
            Shape::Rectangle { x, y, width, .. } => {
                assert!((x - 10.0).abs() < 1e-9);
                assert!((y - 10.0).abs() < 1e-9);
                assert!((width - 20.0).abs() < 1e-9);
            },
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_working_width_cap_scales_mask() {
        let config = ClientConfig::builder().max_working_width(50).build().unwrap();
        let mut session = EditingSession::new(source(100, 60), &config);
        assert_eq!(session.working_dimensions(), (50, 30));

        session.shapes_mut().begin_rectangle(Point::new(20.0, 20.0)).unwrap();
        session.shapes_mut().extend(Point::new(40.0, 40.0)).unwrap();
        session.shapes_mut().complete().unwrap();

        let mask = session.export_mask().unwrap();
        assert_eq!(mask.dimensions(), (50, 30));
        assert!(mask.is_removed(10, 10));
        assert!(mask.is_removed(19, 19));
        assert!(!mask.is_removed(20, 20));
    }

    #[test]
    fn test_inpaint_without_mask_is_rejected() {
        let mut session = EditingSession::new(source(32, 32), &ClientConfig::default());
        let err = session.prepare_inpaint().unwrap_err();
        assert!(matches!(err, InpaintError::Validation(_)));
        assert!(!session.is_busy());

        let err = session
            .prepare_mask_operation(MaskOperation::RefineEdges)
            .unwrap_err();
        assert!(matches!(err, InpaintError::Validation(_)));
    }

    #[test]
    fn test_single_job_in_flight() {
        let mut session = EditingSession::new(source(32, 32), &ClientConfig::default());
        let first = session
            .prepare_image_operation(ImageOperation::RemoveBackground)
            .unwrap();
        assert!(session.is_busy());
        assert!(session
            .prepare_mask_operation(MaskOperation::AutoDetect)
            .is_err());

        session
            .complete_image_operation(&first.ticket, Err(InpaintError::transient("boom")))
            .unwrap_err();
        assert!(!session.is_busy());
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_image_change_cancels_in_flight() {
        let mut session = EditingSession::new(source(32, 32), &ClientConfig::default());
        let pending = session
            .prepare_image_operation(ImageOperation::RemoveBackground)
            .unwrap();

        session.load_image(source(16, 16));
        assert!(pending.ticket.is_cancelled());
        assert!(!session.is_busy());

        let late = session.complete_image_operation(&pending.ticket, Ok(png_bytes(8, 8)));
        assert!(matches!(late, Err(InpaintError::Cancelled)));
        assert_eq!(session.current_image().dimensions(), (16, 16));
    }

    #[test]
    fn test_pointer_cancel_drops_draft() {
        let mut session = EditingSession::new(source(20, 20), &ClientConfig::default());
        session
            .pointer_down(Tool::Brush { width: 4.0 }, Point::new(2.0, 2.0))
            .unwrap();
        session.pointer_move(Point::new(10.0, 10.0)).unwrap();
        session.pointer_cancel();

        assert!(!session.shapes().is_drawing());
        assert!(session.shapes().committed().is_empty());
        assert!(matches!(session.pointer_up(), Ok(Completion::Discarded)));
        assert!(session.export_mask().is_none());
    }

    #[test]
    fn test_only_auto_detect_compresses_the_source() {
        let config = ClientConfig::builder()
            .compression_ceiling_mb(0.000_01)
            .build()
            .unwrap();
        let mut session = EditingSession::new(source(24, 24), &config);
        session.shapes_mut().begin_rectangle(Point::new(2.0, 2.0)).unwrap();
        session.shapes_mut().extend(Point::new(12.0, 12.0)).unwrap();
        session.shapes_mut().complete().unwrap();

        let refine = session
            .prepare_mask_operation(MaskOperation::RefineEdges)
            .unwrap();
        assert_eq!(refine.image, *session.current_image().payload());
        assert!(refine.mask.is_some());
        assert!(session.cancel_in_flight());

        let detect = session
            .prepare_mask_operation(MaskOperation::AutoDetect)
            .unwrap();
        assert_eq!(detect.image.content_type, "image/jpeg");
        assert!(detect.mask.is_none());
    }

    #[test]
    fn test_external_mask_until_shape_change() {
        let mut session = EditingSession::new(source(20, 20), &ClientConfig::default());
        let pending = session
            .prepare_mask_operation(MaskOperation::AutoDetect)
            .unwrap();

        let external = Mask::blank(10, 10);
        let mut white = external.into_image();
        for p in white.pixels_mut() {
            p.0 = [255];
        }
        let mut bytes = Vec::new();
        white
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        session.complete_mask_operation(&pending.ticket, Ok(bytes)).unwrap();
        assert!(session.has_external_mask());
        let mask = session.mask().unwrap();
        assert_eq!(mask.dimensions(), (20, 20));
        assert_eq!(mask.removed_pixel_count(), 400);

        session.shapes_mut().begin_rectangle(Point::new(0.0, 0.0)).unwrap();
        session.shapes_mut().extend(Point::new(2.0, 2.0)).unwrap();
        session.shapes_mut().complete().unwrap();
        assert!(!session.has_external_mask());
        assert_eq!(session.export_mask().unwrap().removed_pixel_count(), 4);
    }
}
