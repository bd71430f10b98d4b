use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use fleet_core::{
    FailureReason, FleetError, FleetResult, LedgerGateway, NodeId, NodeRegistration, TaskId,
    TaskRecord,
};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Registered {
    id: NodeId,
}

/// LedgerGateway over the dispatcher's HTTP API.
pub struct HttpLedgerClient {
    base_url: String,
    http_client: Client,
}

impl HttpLedgerClient {
    pub fn new(dispatcher_url: &str, request_timeout: Duration) -> FleetResult<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FleetError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: dispatcher_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> FleetResult<T> {
        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            FleetError::Serialization(format!("invalid response body (HTTP {status}): {e}"))
        })?;
        if !status.is_success() || !envelope.success {
            return Err(FleetError::Internal(format!(
                "HTTP {status}: {}",
                envelope.message.unwrap_or_default()
            )));
        }
        envelope
            .data
            .ok_or_else(|| FleetError::Serialization("response envelope has no data".to_string()))
    }

    async fn post_report(&self, path: String, body: serde_json::Value) -> FleetResult<()> {
        let response = self
            .http_client
            .post(self.url(&path))
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::LedgerReporting(format!("POST {path}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FleetError::LedgerReporting(format!(
                "POST {path}: HTTP {status} - {body}"
            )))
        }
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerClient {
    async fn register_node(&self, registration: NodeRegistration) -> FleetResult<NodeId> {
        let url = self.url("/api/nodes");
        let response = self
            .http_client
            .post(&url)
            .json(&registration)
            .send()
            .await
            .map_err(|e| {
                FleetError::Network(format!("failed to connect to dispatcher at {url}: {e}"))
            })?;

        if response.status() == StatusCode::BAD_REQUEST {
            let message = response
                .json::<Envelope<serde_json::Value>>()
                .await
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| "registration rejected".to_string());
            return Err(FleetError::validation(message));
        }

        let registered: Registered = Self::parse(response).await?;
        info!(node_id = %registered.id, dispatcher = %self.base_url, "Registered with dispatcher");
        Ok(registered.id)
    }

    async fn submit_heartbeat(&self, node_id: NodeId) -> FleetResult<()> {
        let url = self.url(&format!("/api/nodes/{}/heartbeat", node_id.0));
        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("heartbeat connection error: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                debug!(node_id = %node_id, "Heartbeat accepted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(FleetError::node_not_found(node_id)),
            status => {
                warn!(node_id = %node_id, "Heartbeat failed: HTTP {}", status);
                Err(FleetError::Network(format!("heartbeat failed: HTTP {status}")))
            }
        }
    }

    async fn report_completion(&self, task_id: TaskId) -> FleetResult<()> {
        self.post_report(format!("/api/tasks/{task_id}/complete"), json!({}))
            .await
    }

    async fn report_failure(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<()> {
        self.post_report(
            format!("/api/tasks/{task_id}/fail"),
            json!({ "reason": reason }),
        )
        .await
    }

    async fn task_info(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
        let response = self
            .http_client
            .get(self.url(&format!("/api/tasks/{task_id}")))
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("task lookup connection error: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::task_not_found(task_id));
        }
        Self::parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpLedgerClient::new("http://dispatcher:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://dispatcher:8080");
        assert_eq!(
            client.url("/api/nodes"),
            "http://dispatcher:8080/api/nodes"
        );
    }

    #[test]
    fn test_envelope_parsing() {
        let body = r#"{"success":true,"data":{"id":3,"address":"x"},"message":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let envelope: Envelope<Registered> = serde_json::from_str(body).unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap().id, NodeId(3));
    }
}
