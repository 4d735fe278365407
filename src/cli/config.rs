//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliQuality};
use crate::config::{ClientConfig, QualityPreset};
use crate::connection::link_param_from_url;
use anyhow::{Context, Result};

/// Convert CLI arguments to a `ClientConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Environment defaults overlaid with command-line flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<ClientConfig> {
        let base = ClientConfig::from_env().context("Invalid environment configuration")?;

        let mut builder = ClientConfig::builder()
            .default_endpoint(&base.default_endpoint)
            .quality(cli.quality.into());
        if let Some(preferred) = &base.preferred_endpoint {
            builder = builder.preferred_endpoint(preferred);
        }
        if let Some(width) = cli.max_width {
            builder = builder.max_working_width(width);
        }

        builder.build().context("Invalid configuration")
    }

    /// `--api` accepts a bare endpoint or a full share link
    pub(crate) fn link_param(cli: &Cli) -> Option<String> {
        let value = cli.api.as_deref()?.trim();
        if value.contains('?') {
            link_param_from_url(value)
        } else {
            Some(value.to_string()).filter(|v| !v.is_empty())
        }
    }
}

impl From<CliQuality> for QualityPreset {
    fn from(quality: CliQuality) -> Self {
        match quality {
            CliQuality::Fast => Self::Fast,
            CliQuality::Balanced => Self::Balanced,
            CliQuality::High => Self::High,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_link_param_accepts_share_links() {
        let cli = Cli::parse_from([
            "inpaint-client",
            "--api",
            "https://app.example/?api=https%3A%2F%2Fgpu.example",
            "probe",
        ]);
        assert_eq!(
            CliConfigBuilder::link_param(&cli).as_deref(),
            Some("https://gpu.example")
        );

        let cli = Cli::parse_from(["inpaint-client", "--api", "https://gpu.example/", "probe"]);
        assert_eq!(
            CliConfigBuilder::link_param(&cli).as_deref(),
            Some("https://gpu.example/")
        );
    }

    #[test]
    fn test_quality_flag_maps_to_preset() {
        let cli = Cli::parse_from([
            "inpaint-client",
            "--quality",
            "fast",
            "--max-width",
            "800",
            "probe",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.quality, QualityPreset::Fast);
        assert_eq!(config.max_working_width, Some(800));
    }
}
