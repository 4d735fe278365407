//! Inpainting client CLI
//!
//! Command-line front end for the mask editing engine and the remote
//! inpainting job client.

#[cfg(feature = "cli")]
use inpaint_client::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
