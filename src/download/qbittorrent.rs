//! qBittorrent adapter: WebUI REST API, authenticated via
//! `/api/v2/auth/login` with the session cookie tracked by the client's
//! cookie jar (spec.md §4.6).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{map_auth_status, FacadeError, TorrentClient, TorrentInfo, TorrentState, UploadStats};

pub struct QbittorrentClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct QbTorrent {
    hash: String,
    name: String,
    progress: f64,
    state: String,
    save_path: String,
    uploaded: u64,
}

impl QbittorrentClient {
    pub fn new(base_url: String, username: String, password: String) -> Self {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent("jabd/1.0")
            .build()
            .expect("reqwest client with cookie store should always build");
        QbittorrentClient { base_url, username, password, client }
    }

    fn normalize_state(raw: &str) -> TorrentState {
        match raw {
            "downloading" | "metaDL" | "forcedDL" | "stalledDL" => TorrentState::Downloading,
            "uploading" | "stalledUP" | "forcedUP" => TorrentState::Seeding,
            "pausedDL" | "pausedUP" => TorrentState::Paused,
            _ => TorrentState::Stopped,
        }
    }

    async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<QbTorrent>, FacadeError> {
        let url = format!("{}/api/v2/torrents/info", self.base_url);
        let response = tokio::select! {
            res = self.client.get(&url).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };
        if let Some(err) = map_auth_status(response.status()) {
            return Err(err);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TorrentClient for QbittorrentClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), FacadeError> {
        let url = format!("{}/api/v2/auth/login", self.base_url);
        let form = [("username", self.username.as_str()), ("password", self.password.as_str())];
        let response = tokio::select! {
            res = self.client.post(&url).form(&form).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };
        if let Some(err) = map_auth_status(response.status()) {
            return Err(err);
        }
        let body = response.text().await?;
        if body.trim() == "Ok." {
            Ok(())
        } else {
            Err(FacadeError::AuthExpired)
        }
    }

    async fn get_torrent(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TorrentInfo>, FacadeError> {
        let all = self.fetch_all(cancel).await?;
        Ok(all.into_iter().find(|t| t.hash == id).map(|t| TorrentInfo {
            id: t.hash,
            name: t.name,
            progress: t.progress,
            state: Self::normalize_state(&t.state),
            download_path: t.save_path,
            files: Vec::new(),
        }))
    }

    async fn get_upload_stats(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadStats, FacadeError> {
        let all = self.fetch_all(cancel).await?;
        match all.into_iter().find(|t| t.hash == id) {
            Some(t) => Ok(UploadStats {
                total_uploaded: t.uploaded,
                is_paused: t.state.starts_with("paused"),
                exists: true,
            }),
            None => Ok(UploadStats { total_uploaded: 0, is_paused: false, exists: false }),
        }
    }

    async fn set_download_path(
        &self,
        id: &str,
        new_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError> {
        let url = format!("{}/api/v2/torrents/setLocation", self.base_url);
        let form = [("hashes", id), ("location", new_path)];
        let response = tokio::select! {
            res = self.client.post(&url).form(&form).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };
        if let Some(err) = map_auth_status(response.status()) {
            return Err(err);
        }
        Ok(())
    }

    async fn remove_torrent(
        &self,
        id: &str,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError> {
        let url = format!("{}/api/v2/torrents/delete", self.base_url);
        let delete_files = if delete_files { "true" } else { "false" };
        let form = [("hashes", id), ("deleteFiles", delete_files)];
        let response = tokio::select! {
            res = self.client.post(&url).form(&form).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };
        if let Some(err) = map_auth_status(response.status()) {
            return Err(err);
        }
        Ok(())
    }

    async fn list_completed(&self, cancel: &CancellationToken) -> Result<Vec<TorrentInfo>, FacadeError> {
        let all = self.fetch_all(cancel).await?;
        Ok(all
            .into_iter()
            .filter(|t| t.progress >= 1.0)
            .map(|t| TorrentInfo {
                id: t.hash,
                name: t.name,
                progress: t.progress,
                state: Self::normalize_state(&t.state),
                download_path: t.save_path,
                files: Vec::new(),
            })
            .collect())
    }
}
