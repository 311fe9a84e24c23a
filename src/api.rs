//! Typed client for the dispatch HTTP API
//!
//! Mutations here are optimistic from the console's point of view: the fleet
//! view is only updated by the next authoritative broadcast, so a failed call
//! needs no local rollback.

use drover_shared::dispatch::{Mission, MissionDraft, RoverStatus, Task, Zone, ZoneDraft};
use drover_shared::tasking::TaskStatus;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Error from a dispatch API call
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (refused, reset, bad URL)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered non-2xx; carries its message body
    #[error("dispatch rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

/// Filters for task listing; all optional
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rover_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<Uuid>,
}

/// Dispatch API client bound to one server
pub struct DispatchApi {
    base: String,
    client: reqwest::Client,
}

impl DispatchApi {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>, ApiError> {
        let response = self.client.get(self.url("/zones")).send().await?;
        json_body(response).await
    }

    pub async fn create_zone(&self, draft: &ZoneDraft) -> Result<Zone, ApiError> {
        let response = self.client.post(self.url("/zones")).json(draft).send().await?;
        json_body(response).await
    }

    pub async fn update_zone(&self, id: Uuid, draft: &ZoneDraft) -> Result<Zone, ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/zones/{}", id)))
            .json(draft)
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn delete_zone(&self, id: Uuid) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/zones/{}", id)))
            .send()
            .await?;
        empty_body(response).await
    }

    pub async fn list_missions(&self) -> Result<Vec<Mission>, ApiError> {
        let response = self.client.get(self.url("/missions")).send().await?;
        json_body(response).await
    }

    pub async fn create_mission(&self, draft: &MissionDraft) -> Result<Mission, ApiError> {
        let response = self
            .client
            .post(self.url("/missions"))
            .json(draft)
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn update_mission(&self, id: Uuid, draft: &MissionDraft) -> Result<Mission, ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/missions/{}", id)))
            .json(draft)
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn delete_mission(&self, id: Uuid) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/missions/{}", id)))
            .send()
            .await?;
        empty_body(response).await
    }

    /// Idempotent: returns the existing task if one is already in flight
    pub async fn start_mission(&self, id: Uuid) -> Result<Task, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/missions/{}/start", id)))
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn stop_mission(&self, id: Uuid) -> Result<Task, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/missions/{}/stop", id)))
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>, ApiError> {
        let response = self
            .client
            .get(self.url("/tasks"))
            .query(query)
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn cancel_task(&self, id: Uuid) -> Result<Task, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/tasks/{}/cancel", id)))
            .send()
            .await?;
        json_body(response).await
    }

    pub async fn list_rovers(&self) -> Result<Vec<RoverStatus>, ApiError> {
        let response = self.client.get(self.url("/rovers")).send().await?;
        json_body(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn json_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        Err(ApiError::Rejected {
            status,
            message: response.text().await.unwrap_or_default(),
        })
    }
}

async fn empty_body(response: reqwest::Response) -> Result<(), ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ApiError::Rejected {
            status,
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_is_normalized() {
        let api = DispatchApi::new("http://localhost:4890/");
        assert_eq!(api.url("/zones"), "http://localhost:4890/zones");
    }

    #[test]
    fn test_task_query_uses_wire_names() {
        let query = TaskQuery {
            status: Some(TaskStatus::Active),
            rover_id: Some("bvr-01".into()),
            mission_id: None,
        };
        let value = serde_json::to_value(&query).expect("serializable");
        assert_eq!(value, json!({ "status": "active", "roverId": "bvr-01" }));
    }
}
