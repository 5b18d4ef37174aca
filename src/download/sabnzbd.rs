//! SABnzbd adapter: REST API authenticated per-request with an API key
//! query parameter rather than a session cookie (spec.md §4.6).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{FacadeError, QueueStats, UsenetClient, UsenetInfo, UsenetState};

pub struct SabnzbdClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl SabnzbdClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .user_agent("jabd/1.0")
            .build()
            .expect("reqwest client should always build");
        SabnzbdClient { base_url, api_key, client }
    }

    async fn call(&self, mode: &str, extra: &[(&str, &str)], cancel: &CancellationToken) -> Result<Value, FacadeError> {
        let url = format!("{}/api", self.base_url);
        let mut query = vec![("mode", mode), ("apikey", self.api_key.as_str()), ("output", "json")];
        query.extend_from_slice(extra);

        let response = tokio::select! {
            res = self.client.get(&url).query(&query).send() => res?,
            _ = cancel.cancelled() => return Err(FacadeError::Cancelled),
        };
        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            return Err(FacadeError::AuthExpired);
        }
        let payload: Value = response.json().await?;
        if payload.get("status").and_then(Value::as_bool) == Some(false) {
            return Err(FacadeError::AuthExpired);
        }
        Ok(payload)
    }

    fn normalize_state(raw: &str) -> UsenetState {
        match raw.to_uppercase().as_str() {
            "DOWNLOADING" | "GRABBING" => UsenetState::Downloading,
            "QUEUED" => UsenetState::Queued,
            "PAUSED" => UsenetState::Paused,
            "COMPLETED" => UsenetState::Completed,
            "FAILED" => UsenetState::Failed,
            _ => UsenetState::Queued,
        }
    }
}

#[async_trait]
impl UsenetClient for SabnzbdClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), FacadeError> {
        self.call("version", &[], cancel).await?;
        Ok(())
    }

    async fn get_job(&self, id: &str, cancel: &CancellationToken) -> Result<Option<UsenetInfo>, FacadeError> {
        let payload = self.call("queue", &[("nzo_ids", id)], cancel).await?;
        let slot = payload
            .get("queue")
            .and_then(|q| q.get("slots"))
            .and_then(Value::as_array)
            .and_then(|slots| slots.iter().find(|s| s.get("nzo_id").and_then(Value::as_str) == Some(id)));
        let Some(slot) = slot else { return Ok(None) };
        Ok(Some(UsenetInfo {
            id: id.to_string(),
            name: slot.get("filename").and_then(Value::as_str).unwrap_or_default().to_string(),
            progress: slot
                .get("percentage")
                .and_then(Value::as_str)
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            state: slot.get("status").and_then(Value::as_str).map(Self::normalize_state).unwrap_or(UsenetState::Queued),
            download_path: slot.get("storage").and_then(Value::as_str).unwrap_or_default().to_string(),
        }))
    }

    async fn get_queue_stats(&self, id: &str, cancel: &CancellationToken) -> Result<QueueStats, FacadeError> {
        match self.get_job(id, cancel).await? {
            Some(info) => Ok(QueueStats {
                remaining_bytes: 0,
                is_paused: info.state == UsenetState::Paused,
                exists: true,
            }),
            None => Ok(QueueStats { remaining_bytes: 0, is_paused: false, exists: false }),
        }
    }

    async fn set_download_path(&self, _id: &str, _new_path: &str, _cancel: &CancellationToken) -> Result<(), FacadeError> {
        // SABnzbd has no per-job relocate call; completed jobs are moved by
        // the organizer reading the completed-download directory directly.
        Ok(())
    }

    async fn remove_job(&self, id: &str, delete_files: bool, cancel: &CancellationToken) -> Result<(), FacadeError> {
        let del_files = if delete_files { "1" } else { "0" };
        self.call("queue", &[("name", "delete"), ("value", id), ("del_files", del_files)], cancel)
            .await?;
        Ok(())
    }

    async fn list_completed(&self, cancel: &CancellationToken) -> Result<Vec<UsenetInfo>, FacadeError> {
        let payload = self.call("history", &[("category", "*")], cancel).await?;
        let Some(slots) = payload.get("history").and_then(|h| h.get("slots")).and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        Ok(slots
            .iter()
            .map(|slot| UsenetInfo {
                id: slot.get("nzo_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: slot.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                progress: 100.0,
                state: UsenetState::Completed,
                download_path: slot.get("storage").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
            .collect())
    }
}
