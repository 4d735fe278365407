//! Backend endpoint selection, health probing and failover
//!
//! Selection is a pure priority chain over [`EndpointSources`]. The
//! [`ConnectionResolver`] is the thin stateful caller that probes the chosen
//! endpoint, falls back to the built-in default and persists manual overrides.

use crate::config::ClientConfig;
use crate::error::{InpaintError, Result};
use crate::types::DeviceInfo;
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info_span, Instrument};

/// Environment variable overriding where the endpoint override is stored
pub const ENV_CONFIG_DIR: &str = "INPAINT_CLIENT_CONFIG_DIR";
/// Query parameter carrying an endpoint in share links
pub const LINK_PARAM: &str = "api";

const OVERRIDE_FILE_NAME: &str = "endpoint";

/// Trim whitespace and trailing slashes
#[must_use]
pub fn normalize_endpoint(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn non_empty(url: Option<&str>) -> Option<String> {
    url.map(normalize_endpoint).filter(|u| !u.is_empty())
}

/// Where the selected endpoint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    LinkParam,
    Stored,
    Preferred,
    Default,
}

/// Candidate endpoints in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSources {
    pub link_param: Option<String>,
    pub stored: Option<String>,
    pub preferred: Option<String>,
    pub default: String,
}

/// An endpoint chosen by resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub source: EndpointSource,
}

/// Pick the highest-priority non-empty endpoint
///
/// ```rust
/// use inpaint_client::connection::{resolve_initial, EndpointSource, EndpointSources};
///
/// let chosen = resolve_initial(&EndpointSources {
///     link_param: None,
///     stored: Some("https://saved.example/".into()),
///     preferred: Some("https://colab.example".into()),
///     default: "/api".into(),
/// });
/// assert_eq!(chosen.url, "https://saved.example");
/// assert_eq!(chosen.source, EndpointSource::Stored);
/// ```
#[must_use]
pub fn resolve_initial(sources: &EndpointSources) -> Endpoint {
    let candidates = [
        (sources.link_param.as_deref(), EndpointSource::LinkParam),
        (sources.stored.as_deref(), EndpointSource::Stored),
        (sources.preferred.as_deref(), EndpointSource::Preferred),
    ];
    candidates
        .into_iter()
        .find_map(|(url, source)| non_empty(url).map(|url| Endpoint { url, source }))
        .unwrap_or_else(|| Endpoint {
            url: normalize_endpoint(&sources.default),
            source: EndpointSource::Default,
        })
}

/// Build a link that opens the client against `endpoint`
///
/// # Errors
/// - `Validation` when `origin` is not an absolute URL
pub fn share_link(origin: &str, endpoint: &str) -> Result<String> {
    let link = Url::parse_with_params(origin.trim(), &[(LINK_PARAM, normalize_endpoint(endpoint))])
        .map_err(|e| InpaintError::validation(format!("Invalid origin {}: {}", origin, e)))?;
    Ok(link.into())
}

/// Extract the endpoint parameter from a share link
#[must_use]
pub fn link_param_from_url(link: &str) -> Option<String> {
    Url::parse(link.trim())
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == LINK_PARAM)
        .and_then(|(_, value)| non_empty(Some(&*value)))
}

/// Reachability of the active endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Unknown,
    Connecting,
    Online,
    Offline,
}

/// Active endpoint and its last known health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub endpoint: String,
    pub health: Health,
    /// Device name reported by the last successful probe
    pub device_name: Option<String>,
}

impl ConnectionState {
    fn unknown(endpoint: String) -> Self {
        Self {
            endpoint,
            health: Health::Unknown,
            device_name: None,
        }
    }

    /// Human-readable status, e.g. `GPU (CUDA)` or `Offline`
    #[must_use]
    pub fn status_label(&self) -> String {
        match self.health {
            Health::Unknown => "Unknown".to_string(),
            Health::Connecting => "Connecting...".to_string(),
            Health::Online => self
                .device_name
                .clone()
                .unwrap_or_else(|| "Online".to_string()),
            Health::Offline => "Offline".to_string(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.health == Health::Online
    }
}

/// Bounded-timeout status request against a candidate endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<DeviceInfo>;
}

/// Durable storage for a manually chosen endpoint
pub trait OverrideStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, endpoint: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Override kept in a small text file under the user config directory
#[derive(Debug, Clone)]
pub struct FileOverrideStore {
    path: PathBuf,
}

impl FileOverrideStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `$INPAINT_CLIENT_CONFIG_DIR/endpoint`, else `<config dir>/inpaint-client/endpoint`
    pub fn default_location() -> Result<Self> {
        let dir = match std::env::var_os(ENV_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| {
                    InpaintError::invalid_config("Failed to determine user config directory")
                })?
                .join("inpaint-client"),
        };
        Ok(Self::new(dir.join(OVERRIDE_FILE_NAME)))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverrideStore for FileOverrideStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(non_empty(Some(&contents))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, endpoint: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, normalize_endpoint(endpoint))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process override store
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    value: Mutex<Option<String>>,
}

impl MemoryOverrideStore {
    #[must_use]
    pub fn with_value<S: Into<String>>(value: S) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.value
            .lock()
            .map_err(|_| InpaintError::invalid_config("Override store lock poisoned"))
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, endpoint: &str) -> Result<()> {
        *self.slot()? = Some(normalize_endpoint(endpoint));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

/// Chooses the active endpoint and keeps its health current
pub struct ConnectionResolver<P, S> {
    probe: P,
    store: S,
    default_endpoint: String,
    preferred_endpoint: Option<String>,
    state: ConnectionState,
}

impl<P: HealthProbe, S: OverrideStore> ConnectionResolver<P, S> {
    pub fn new(probe: P, store: S, config: &ClientConfig) -> Self {
        let default_endpoint = normalize_endpoint(&config.default_endpoint);
        Self {
            probe,
            store,
            state: ConnectionState::unknown(default_endpoint.clone()),
            preferred_endpoint: non_empty(config.preferred_endpoint.as_deref()),
            default_endpoint,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.state.endpoint
    }

    #[must_use]
    pub fn default_endpoint(&self) -> &str {
        &self.default_endpoint
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Startup resolution: select by priority, probe, fail over to the default
    pub async fn initialize(&mut self, link_param: Option<&str>) -> &ConnectionState {
        let stored = self.store.load().unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable endpoint override: {}", e);
            None
        });
        let selected = resolve_initial(&EndpointSources {
            link_param: link_param.map(str::to_string),
            stored,
            preferred: self.preferred_endpoint.clone(),
            default: self.default_endpoint.clone(),
        });
        log::info!("Selected endpoint {} ({:?})", selected.url, selected.source);

        if self.probe_endpoint(&selected.url).await.is_ok() {
            return &self.state;
        }

        if selected.url != self.default_endpoint {
            log::info!("Falling back to default: {}", self.default_endpoint);
            if let Err(e) = self.store.clear() {
                log::warn!("Failed to clear endpoint override: {}", e);
            }
            let default = self.default_endpoint.clone();
            // Offline is already recorded on failure
            let _ = self.probe_endpoint(&default).await;
        }
        &self.state
    }

    /// Manual reconfiguration; a reachable non-default endpoint is persisted
    ///
    /// # Errors
    /// `ConnectionUnreachable` when the probe fails. The endpoint stays
    /// selected with `Offline` health so the user can retry.
    pub async fn reconfigure(&mut self, endpoint: &str) -> Result<&ConnectionState> {
        let url = non_empty(Some(endpoint)).unwrap_or_else(|| self.default_endpoint.clone());
        if url == self.default_endpoint {
            self.store.clear()?;
        }

        self.probe_endpoint(&url).await?;
        if url != self.default_endpoint {
            self.store.save(&url)?;
        }
        Ok(&self.state)
    }

    /// Forget any override and probe the built-in default
    pub async fn reset_to_default(&mut self) -> Result<&ConnectionState> {
        let default = self.default_endpoint.clone();
        self.reconfigure(&default).await
    }

    async fn probe_endpoint(&mut self, url: &str) -> Result<DeviceInfo> {
        self.state = ConnectionState {
            endpoint: url.to_string(),
            health: Health::Connecting,
            device_name: None,
        };

        let span = info_span!("probe", endpoint = %url);
        match self.probe.probe(url).instrument(span).await {
            Ok(info) => {
                log::info!("Connected to {} ({})", url, info.device_name);
                self.state.health = Health::Online;
                self.state.device_name = Some(info.device_name.clone());
                Ok(info)
            },
            Err(e) => {
                log::warn!("Connection to {} failed: {}", url, e);
                self.state.health = Health::Offline;
                Err(InpaintError::unreachable(format!("{}: {}", url, e)))
            },
        }
    }
}
