//! Frontend-facing services

pub mod progress;

#[cfg(feature = "cli")]
pub use progress::{create_cli_observer, SpinnerObserver};
pub use progress::{status_label, ConsoleObserver};
