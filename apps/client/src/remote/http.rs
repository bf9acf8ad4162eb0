//! HTTP implementation of the remote store adapter.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::remote::{
    PracticeLogRow, RemoteSnapshot, RemoteStore, SessionStateRow, UPSERT_BATCH_SIZE,
};

#[derive(Debug, Serialize)]
struct UpsertEntriesRequest<'a> {
    rows: &'a [PracticeLogRow],
}

/// Remote store client over the backend's JSON API.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(message),
            StatusCode::CONFLICT => SyncError::Conflict(message),
            _ => SyncError::Transport(format!("{status}: {message}")),
        })
    }

    async fn post_rows(&self, user_id: &str, rows: &[PracticeLogRow]) -> Result<(), SyncError> {
        for batch in rows.chunks(UPSERT_BATCH_SIZE) {
            let resp = self
                .client
                .post(self.url(&format!("/api/users/{user_id}/practice-logs")))
                .bearer_auth(&self.token)
                .json(&UpsertEntriesRequest { rows: batch })
                .send()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?;
            Self::error_for_status(resp).await?;
        }
        Ok(())
    }

    async fn delete_all_entries(&self, user_id: &str) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/users/{user_id}/practice-logs")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Self::error_for_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn check_connectivity(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn fetch_all(&self, user_id: &str) -> Result<RemoteSnapshot, SyncError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/users/{user_id}/sync-state")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let resp = Self::error_for_status(resp).await?;
        resp.json::<RemoteSnapshot>()
            .await
            .map_err(|e| SyncError::Parse(e.to_string()))
    }

    async fn upsert_entries(
        &self,
        user_id: &str,
        rows: Vec<PracticeLogRow>,
    ) -> Result<(), SyncError> {
        match self.post_rows(user_id, &rows).await {
            Ok(()) => Ok(()),
            // A key conflict the backend cannot resolve means its state is
            // inconsistent; wipe this user's rows and reinsert everything.
            Err(SyncError::Conflict(message)) => {
                warn!("upsert conflict, falling back to delete-and-reinsert: {message}");
                self.delete_all_entries(user_id)
                    .await
                    .map_err(transportize)?;
                self.post_rows(user_id, &rows).await.map_err(transportize)?;
                debug!(rows = rows.len(), "delete-and-reinsert fallback succeeded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert_session_state(&self, row: SessionStateRow) -> Result<(), SyncError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/users/{}/session-state", row.user_id)))
            .bearer_auth(&self.token)
            .json(&row)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Self::error_for_status(resp).await?;
        Ok(())
    }

    async fn delete_session_state(&self, user_id: &str) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/users/{user_id}/session-state")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Self::error_for_status(resp).await?;
        Ok(())
    }
}

/// A failed fallback is no longer a conflict the adapter can hide; it
/// surfaces as a retryable transport error.
fn transportize(e: SyncError) -> SyncError {
    match e {
        SyncError::Conflict(message) => SyncError::Transport(message),
        other => other,
    }
}
