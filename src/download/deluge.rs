//! Deluge adapter: JSON-RPC over HTTP, session carried as a cookie the
//! `reqwest::Client`'s cookie jar tracks automatically after `auth.login`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{
    map_auth_status, FacadeError, TorrentClient, TorrentInfo, TorrentState, UploadStats,
};

pub struct DelugeClient {
    base_url: String,
    password: String,
    client: Client,
    request_id: AtomicU64,
}

impl DelugeClient {
    pub fn new(base_url: String, password: String) -> Self {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent("jabd/1.0")
            .build()
            .expect("reqwest client with cookie store should always build");
        DelugeClient {
            base_url,
            password,
            client,
            request_id: AtomicU64::new(1),
        }
    }

    async fn rpc(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, FacadeError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({ "method": method, "params": params, "id": id });
        let url = format!("{}/json", self.base_url);

        let response = tokio::select! {
            res = self.client.post(&url).json(&body).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };

        if let Some(err) = map_auth_status(response.status()) {
            return Err(err);
        }
        let payload: Value = response.json().await?;
        if let Some(err) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(FacadeError::Protocol(err.to_string()));
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    fn normalize_state(raw: &str) -> TorrentState {
        match raw.to_lowercase().as_str() {
            "downloading" => TorrentState::Downloading,
            "seeding" => TorrentState::Seeding,
            "paused" => TorrentState::Paused,
            "queued" | "checking" | "error" => TorrentState::Stopped,
            _ => TorrentState::Stopped,
        }
    }
}

#[async_trait]
impl TorrentClient for DelugeClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), FacadeError> {
        let result = self
            .rpc("auth.login", json!([self.password]), cancel)
            .await?;
        if result.as_bool() == Some(true) {
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
        let keys = json!(["name", "progress", "state", "save_path", "files"]);
        let result = self
            .rpc("core.get_torrent_status", json!([id, keys]), cancel)
            .await?;
        if result.is_null() || result.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Ok(None);
        }
        let name = result.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let progress = result.get("progress").and_then(Value::as_f64).unwrap_or(0.0);
        let state = result
            .get("state")
            .and_then(Value::as_str)
            .map(Self::normalize_state)
            .unwrap_or(TorrentState::Stopped);
        let download_path = result
            .get("save_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let files = result
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.get("path").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(TorrentInfo {
            id: id.to_string(),
            name,
            progress,
            state,
            download_path,
            files,
        }))
    }

    async fn get_upload_stats(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadStats, FacadeError> {
        let keys = json!(["total_uploaded", "paused"]);
        let result = self
            .rpc("core.get_torrent_status", json!([id, keys]), cancel)
            .await?;
        let exists = !result.is_null() && !result.as_object().map(|o| o.is_empty()).unwrap_or(true);
        Ok(UploadStats {
            total_uploaded: result.get("total_uploaded").and_then(Value::as_u64).unwrap_or(0),
            is_paused: result.get("paused").and_then(Value::as_bool).unwrap_or(false),
            exists,
        })
    }

    async fn set_download_path(
        &self,
        id: &str,
        new_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError> {
        self.rpc("core.move_storage", json!([[id], new_path]), cancel).await?;
        Ok(())
    }

    async fn remove_torrent(
        &self,
        id: &str,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError> {
        self.rpc("core.remove_torrent", json!([id, delete_files]), cancel).await?;
        Ok(())
    }

    async fn list_completed(&self, cancel: &CancellationToken) -> Result<Vec<TorrentInfo>, FacadeError> {
        let keys = json!(["name", "progress", "state", "save_path", "files"]);
        let result = self
            .rpc("core.get_torrents_status", json!([{"state": "Seeding"}, keys]), cancel)
            .await?;
        let Some(map) = result.as_object() else {
            return Ok(Vec::new());
        };
        Ok(map
            .iter()
            .map(|(id, v)| TorrentInfo {
                id: id.clone(),
                name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                progress: v.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
                state: v
                    .get("state")
                    .and_then(Value::as_str)
                    .map(Self::normalize_state)
                    .unwrap_or(TorrentState::Stopped),
                download_path: v.get("save_path").and_then(Value::as_str).unwrap_or_default().to_string(),
                files: Vec::new(),
            })
            .collect())
    }
}
