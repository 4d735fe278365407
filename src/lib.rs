#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Inpaint Client
//!
//! Client-side engine for mask-based object removal against a remote
//! inpainting backend.
//!
//! Two halves:
//!
//! - **Mask editing**: an ordered shape history with undo/redo
//!   ([`ShapeStore`]), a deterministic rasterizer producing binary masks at
//!   the working resolution ([`Rasterizer`]) and a pointer-anchored
//!   zoom/pan transform ([`ViewportController`]).
//! - **Job orchestration**: size-bounded JPEG re-encoding before upload
//!   ([`CompressionPolicy`]), endpoint selection with health probing and
//!   failover ([`ConnectionResolver`]) and a submit/poll/fetch loop that
//!   survives transient network failures ([`JobOrchestrator`]).
//!
//! [`EditingSession`] ties both together the way an interactive editor
//! would: source image history, deferred rasterisation and a single
//! in-flight job slot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inpaint_client::{
//!     BackendClient, ClientConfig, EditingSession, JobOrchestrator, NoOpObserver, Point,
//!     SourceImage, Tool,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig::builder()
//!     .default_endpoint("http://127.0.0.1:3000/api")
//!     .build()?;
//! let backend = BackendClient::new(&config.default_endpoint, &config)?;
//!
//! let mut session = EditingSession::new(SourceImage::open("photo.jpg")?, &config);
//! session.pointer_down(Tool::Rectangle, Point::new(40.0, 40.0))?;
//! session.pointer_move(Point::new(120.0, 90.0))?;
//! session.pointer_up()?;
//!
//! let orchestrator = JobOrchestrator::new(config.retry);
//! session.run_inpaint(&orchestrator, &backend, &NoOpObserver).await?;
//! std::fs::write("photo_inpainted.png", &session.current_image().payload().bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface, spinner progress and tracing setup
//! - `tracing-json`: JSON log output for the CLI

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod raster;
pub mod services;
pub mod session;
pub mod shapes;
pub mod test_utils;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod viewport;

// Public API exports
pub use backend::{BackendClient, ImageOperations};
pub use compression::{CompressionOutcome, CompressionPolicy};
pub use config::{ClientConfig, ClientConfigBuilder, QualityPreset};
pub use connection::{
    resolve_initial, share_link, ConnectionResolver, ConnectionState, Endpoint, EndpointSource,
    EndpointSources, FileOverrideStore, Health, HealthProbe, MemoryOverrideStore, OverrideStore,
};
pub use error::{InpaintError, Result};
pub use orchestrator::{
    EditRequest, Job, JobBackend, JobEvent, JobId, JobObserver, JobOrchestrator, JobOutcome,
    JobStatus, NoOpObserver, RetryPolicy,
};
pub use raster::{Mask, Rasterizer};
pub use services::{status_label, ConsoleObserver};
pub use session::{EditHistory, EditingSession, ImageOperation, MaskOperation, SourceImage, Tool};
pub use shapes::{BrushKind, Completion, Point, Shape, ShapeStore, StrokeKind};
pub use types::{DeviceInfo, ImagePayload, OutpaintExtents};
pub use viewport::{Viewport, ViewportController, ZoomDirection};

#[cfg(feature = "cli")]
pub use tracing_config::{events, init_cli_tracing, spans, TracingConfig, TracingFormat};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_compiles() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(ShapeStore::new().committed().is_empty());
    }
}
