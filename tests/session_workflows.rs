//! Integration tests for complete editing session workflows
//!
//! These drive an `EditingSession` end to end against scripted backends,
//! without a server.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use inpaint_client::{
    orchestrator::StatusResponse,
    test_utils::{RecordingObserver, ScriptedBackend},
    ClientConfig, EditingSession, ImageOperation, InpaintError, JobOrchestrator, JobStatus, Mask,
    MaskOperation, NoOpObserver, OutpaintExtents, Point, RetryPolicy, SourceImage, Tool,
};
use std::io::Cursor;

/// Create a test image encoded as PNG
fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let mut image = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let intensity = ((x + y) % 100) as u8;
        *pixel = image::Rgb([intensity, 128, 255 - intensity]);
    }
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

/// Create a mask PNG with a filled square in the middle
fn create_mask_png(width: u32, height: u32) -> Vec<u8> {
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 4 && x < 3 * width / 4 && y >= height / 4 && y < 3 * height / 4;
        Luma([if inside { 255 } else { 0 }])
    });
    let mut buffer = Vec::new();
    mask.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

fn session(width: u32, height: u32) -> EditingSession {
    init_logging();
    let image = SourceImage::from_bytes("street.png", create_test_png(width, height)).unwrap();
    EditingSession::new(image, &ClientConfig::default())
}

fn draw_rectangle(session: &mut EditingSession, from: (f64, f64), to: (f64, f64)) {
    session
        .pointer_down(Tool::Rectangle, Point::new(from.0, from.1))
        .unwrap();
    session.pointer_move(Point::new(to.0, to.1)).unwrap();
    session.pointer_up().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inpaint_workflow_replaces_source() {
    let mut session = session(64, 48);
    draw_rectangle(&mut session, (8.0, 8.0), (24.0, 20.0));

    let backend = ScriptedBackend::new("job-1")
        .then_status(JobStatus::Queued)
        .then_status(JobStatus::Processing)
        .then_status(JobStatus::Completed)
        .with_result(create_test_png(64, 48));
    let observer = RecordingObserver::default();
    let orchestrator = JobOrchestrator::new(RetryPolicy::default());

    session
        .run_inpaint(&orchestrator, &backend, &observer)
        .await
        .unwrap();

    let submitted = backend.submitted();
    assert_eq!(submitted.len(), 1);
    let mask = Mask::from_png(&submitted[0].mask.bytes).unwrap();
    assert_eq!(mask.dimensions(), (64, 48));
    assert!(mask.is_removed(10, 10));
    assert!(!mask.is_removed(30, 30));
    // Small sources go up untouched
    assert_eq!(submitted[0].image.bytes, create_test_png(64, 48));

    assert_eq!(session.history().len(), 2);
    assert_eq!(session.current_image().payload().file_name, "street.png");
    assert!(session.shapes().committed().is_empty());
    assert!(session.mask().is_none());
    assert!(!session.is_busy());
    assert!(!observer.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_keeps_session_editable() {
    let mut session = session(32, 32);
    draw_rectangle(&mut session, (4.0, 4.0), (12.0, 12.0));

    let backend = ScriptedBackend::new("job-2")
        .then_response(StatusResponse::failed(Some("model crashed")));
    let err = session
        .run_inpaint(&JobOrchestrator::new(RetryPolicy::default()), &backend, &NoOpObserver)
        .await
        .unwrap_err();

    assert!(matches!(err, InpaintError::BackendJob(ref m) if m == "model crashed"));
    assert!(!session.is_busy());
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.shapes().committed().len(), 1);
    assert!(session.mask().is_some());
}

#[tokio::test]
async fn test_submit_without_mask_makes_no_network_call() {
    let mut session = session(32, 32);
    let backend = ScriptedBackend::new("job-3");

    let err = session
        .run_inpaint(&JobOrchestrator::new(RetryPolicy::default()), &backend, &NoOpObserver)
        .await
        .unwrap_err();

    assert!(matches!(err, InpaintError::Validation(_)));
    assert!(backend.get_call_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_auto_mask_then_inpaint_uses_detected_mask() {
    let mut session = session(40, 40);
    let backend = ScriptedBackend::new("job-4")
        .then_status(JobStatus::Completed)
        .with_operation_result(create_mask_png(40, 40))
        .with_result(create_test_png(40, 40));

    session
        .run_mask_operation(&backend, MaskOperation::AutoDetect)
        .await
        .unwrap();
    assert!(session.has_external_mask());
    assert_eq!(session.mask().unwrap().removed_pixel_count(), 20 * 20);

    session
        .run_inpaint(&JobOrchestrator::new(RetryPolicy::default()), &backend, &NoOpObserver)
        .await
        .unwrap();

    let sent = Mask::from_png(&backend.submitted()[0].mask.bytes).unwrap();
    assert_eq!(sent.removed_pixel_count(), 20 * 20);
    assert_eq!(
        backend.get_call_history().first().map(String::as_str),
        Some("auto_mask_inverted")
    );
}

#[tokio::test]
async fn test_refine_edges_requires_a_mask() {
    let mut session = session(32, 32);
    let backend = ScriptedBackend::new("job-5");

    let err = session
        .run_mask_operation(&backend, MaskOperation::RefineEdges)
        .await
        .unwrap_err();
    assert!(matches!(err, InpaintError::Validation(_)));
    assert!(backend.get_call_history().is_empty());
}

#[tokio::test]
async fn test_image_operations_extend_history() {
    let mut session = session(32, 32);
    let backend = ScriptedBackend::new("job-6").with_operation_result(create_test_png(132, 132));
    let background = SourceImage::from_bytes("beach.png", create_test_png(16, 16)).unwrap();

    session
        .run_image_operation(
            &backend,
            ImageOperation::ReplaceBackground(background.payload().clone()),
        )
        .await
        .unwrap();
    session
        .run_image_operation(&backend, ImageOperation::Outpaint(OutpaintExtents::default()))
        .await
        .unwrap();

    assert_eq!(
        backend.get_call_history(),
        vec!["replace_background", "outpaint"]
    );
    assert_eq!(session.history().len(), 3);
    assert_eq!(session.current_image().dimensions(), (132, 132));

    assert!(session.undo_image());
    assert!(session.redo_image());

    // Reset returns to the original and drops every edit
    assert!(session.reset_image());
    assert_eq!(session.current_image().dimensions(), (32, 32));
    assert_eq!(session.history().len(), 1);
    assert!(!session.redo_image());
}

#[tokio::test]
async fn test_operation_failure_releases_slot() {
    let mut session = session(32, 32);
    let backend = ScriptedBackend::new("job-7").failing_operations();

    let err = session
        .run_image_operation(&backend, ImageOperation::RemoveBackground)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(!session.is_busy());
    assert_eq!(session.history().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_loading_new_image_abandons_running_job() {
    let mut session = session(32, 32);
    draw_rectangle(&mut session, (2.0, 2.0), (10.0, 10.0));

    let backend = ScriptedBackend::new("job-8").repeat_status(JobStatus::Processing);
    let pending = session.prepare_inpaint().unwrap();
    assert!(session.is_busy());

    // Replacing the source cancels the in-flight ticket
    session.load_image(SourceImage::from_bytes("other.png", create_test_png(16, 16)).unwrap());
    assert!(pending.ticket.is_cancelled());
    assert!(!session.is_busy());

    let outcome = pending
        .execute(&JobOrchestrator::new(RetryPolicy::default()), &backend, &NoOpObserver)
        .await;
    assert!(matches!(outcome, Err(InpaintError::Cancelled)));

    let err = session.complete_inpaint(&pending.ticket, outcome).unwrap_err();
    assert!(matches!(err, InpaintError::Cancelled));
    assert_eq!(session.current_image().payload().file_name, "other.png");
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn test_clearing_shapes_drops_detected_mask() {
    let mut session = session(20, 20);
    let white = GrayImage::from_pixel(20, 20, Luma([255]));
    let mut mask_png = Vec::new();
    white
        .write_to(&mut Cursor::new(&mut mask_png), ImageFormat::Png)
        .unwrap();
    let backend = ScriptedBackend::new("job-9").with_operation_result(mask_png);

    session
        .run_mask_operation(&backend, MaskOperation::AutoDetect)
        .await
        .unwrap();
    assert_eq!(session.export_mask().unwrap().removed_pixel_count(), 400);

    session.clear_shapes();
    assert!(!session.has_external_mask());
    assert!(session.export_mask().is_none());
    assert!(matches!(
        session.prepare_inpaint(),
        Err(InpaintError::Validation(_))
    ));
    assert!(!session.is_busy());
}
