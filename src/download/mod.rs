//! Download-client facade: a normalized interface over torrent and Usenet
//! clients used to relocate or remove completed downloads once a Book has
//! been organized (spec.md §4.6).
//!
//! Grounded in the teacher's `reqwest::Client` usage (`musicbrainz.rs`):
//! a builder with a descriptive `user_agent`, JSON response parsing, and
//! status-code-driven error mapping. Session/cookie handling generalizes
//! that same client to stateful login flows the way `StirlingMouse-MLM`
//! (in `other_examples/`) wires a cookie-jar `reqwest::Client` against a
//! qBittorrent-like REST API.

mod deluge;
mod qbittorrent;
mod sabnzbd;

pub use deluge::DelugeClient;
pub use qbittorrent::QbittorrentClient;
pub use sabnzbd::SabnzbdClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("authentication expired, reconnect required")]
    AuthExpired,
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response from client: {0}")]
    Protocol(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    Downloading,
    Seeding,
    Paused,
    Stopped,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsenetState {
    Queued,
    Downloading,
    Completed,
    Paused,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub id: String,
    pub name: String,
    pub progress: f64,
    pub state: TorrentState,
    pub download_path: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStats {
    pub total_uploaded: u64,
    pub is_paused: bool,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsenetInfo {
    pub id: String,
    pub name: String,
    pub progress: f64,
    pub state: UsenetState,
    pub download_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub remaining_bytes: u64,
    pub is_paused: bool,
    pub exists: bool,
}

/// Torrent-client capability set (spec.md §4.6). Every method is
/// cancellable; implementations thread `cancel` into the underlying
/// `reqwest` request as a `select!` race rather than aborting mid-TCP-write.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), FacadeError>;
    async fn get_torrent(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TorrentInfo>, FacadeError>;
    async fn get_upload_stats(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadStats, FacadeError>;
    async fn set_download_path(
        &self,
        id: &str,
        new_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError>;
    async fn remove_torrent(
        &self,
        id: &str,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError>;
    async fn list_completed(&self, cancel: &CancellationToken) -> Result<Vec<TorrentInfo>, FacadeError>;
}

/// Usenet-client capability set, mirroring `TorrentClient` (spec.md §4.6).
#[async_trait]
pub trait UsenetClient: Send + Sync {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), FacadeError>;
    async fn get_job(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<UsenetInfo>, FacadeError>;
    async fn get_queue_stats(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<QueueStats, FacadeError>;
    async fn set_download_path(
        &self,
        id: &str,
        new_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError>;
    async fn remove_job(
        &self,
        id: &str,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError>;
    async fn list_completed(&self, cancel: &CancellationToken) -> Result<Vec<UsenetInfo>, FacadeError>;
}

/// Runtime config for a single torrent or Usenet client, as persisted by
/// the collaborator that owns client configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TorrentClientConfig {
    Deluge {
        host: String,
        port: u16,
        use_https: bool,
        password: String,
    },
    Qbittorrent {
        host: String,
        port: u16,
        use_https: bool,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsenetClientConfig {
    Sabnzbd {
        host: String,
        port: u16,
        use_https: bool,
        api_key: String,
    },
}

fn base_url(host: &str, port: u16, use_https: bool) -> String {
    let scheme = if use_https { "https" } else { "http" };
    format!("{scheme}://{host}:{port}")
}

/// Constructs the facade's adapters from persisted client configuration.
/// One torrent adapter and/or one Usenet adapter may be active at a time;
/// operations that reference a `DownloadReference` look up the matching
/// adapter by `client_type`.
pub struct DownloadFacade {
    pub torrent: Option<Box<dyn TorrentClient>>,
    pub usenet: Option<Box<dyn UsenetClient>>,
}

impl DownloadFacade {
    pub fn new(
        torrent_config: Option<TorrentClientConfig>,
        usenet_config: Option<UsenetClientConfig>,
    ) -> Self {
        let torrent: Option<Box<dyn TorrentClient>> = torrent_config.map(|c| match c {
            TorrentClientConfig::Deluge { host, port, use_https, password } => {
                Box::new(DelugeClient::new(base_url(&host, port, use_https), password)) as Box<dyn TorrentClient>
            }
            TorrentClientConfig::Qbittorrent { host, port, use_https, username, password } => {
                Box::new(QbittorrentClient::new(base_url(&host, port, use_https), username, password))
                    as Box<dyn TorrentClient>
            }
        });
        let usenet: Option<Box<dyn UsenetClient>> = usenet_config.map(|c| match c {
            UsenetClientConfig::Sabnzbd { host, port, use_https, api_key } => {
                Box::new(SabnzbdClient::new(base_url(&host, port, use_https), api_key)) as Box<dyn UsenetClient>
            }
        });
        DownloadFacade { torrent, usenet }
    }
}

/// Map an HTTP status's auth-failure class to `FacadeError::AuthExpired`
/// (spec.md §4.6 "a 401/403 response invalidates the cached session").
pub(crate) fn map_auth_status(status: reqwest::StatusCode) -> Option<FacadeError> {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        Some(FacadeError::AuthExpired)
    } else {
        None
    }
}
