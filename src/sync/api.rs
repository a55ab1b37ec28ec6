//! HTTP client for the sync server API.
//!
//! Thin request/response layer: every call unwraps the server's response
//! envelope and maps failures onto [`SyncError`]. Retry and credential
//! recovery live one level up in the sync client.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::error::SyncError;
use crate::models::Device;
use crate::protocol::{
    ApiResponse, DeviceBindData, DeviceBindRequest, DeviceInitData, DeviceInitRequest,
    FullSyncData, IncrementalSyncData, IncrementalSyncRequest, RefreshData,
};

/// Per-request timeout; a hung server surfaces as a transport error.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Reachability probes fail fast instead of waiting out a full request.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client bound to one sync server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server_url: String,
}

impl ApiClient {
    /// Creates a client for the given server URL. A bare `host:port` is
    /// treated as `http://host:port`.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.into(),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Quick reachability probe against the unauthenticated health endpoint.
    pub async fn health(&self) -> Result<(), SyncError> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::Api(format!(
                "health check returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    pub async fn device_init(&self, req: &DeviceInitRequest) -> Result<DeviceInitData, SyncError> {
        let response = self
            .http
            .post(self.url("/api/auth/device-init"))
            .timeout(REQUEST_TIMEOUT)
            .json(req)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn device_bind(&self, req: &DeviceBindRequest) -> Result<DeviceBindData, SyncError> {
        let response = self
            .http
            .post(self.url("/api/auth/device-bind"))
            .timeout(REQUEST_TIMEOUT)
            .json(req)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn refresh(&self, token: &str) -> Result<RefreshData, SyncError> {
        let response = self
            .http
            .post(self.url("/api/auth/refresh"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn logout(&self, token: &str) -> Result<(), SyncError> {
        let response = self
            .http
            .post(self.url("/api/auth/logout"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    pub async fn incremental_sync(
        &self,
        token: &str,
        req: &IncrementalSyncRequest,
    ) -> Result<IncrementalSyncData, SyncError> {
        let response = self
            .http
            .post(self.url("/api/sync/incremental"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .json(req)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn full_sync(&self, token: &str) -> Result<FullSyncData, SyncError> {
        let response = self
            .http
            .get(self.url("/api/sync/full"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn list_devices(&self, token: &str) -> Result<Vec<Device>, SyncError> {
        let response = self
            .http
            .get(self.url("/api/user/devices"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode(response).await
    }

    pub async fn remove_device(&self, token: &str, device_uuid: &str) -> Result<(), SyncError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/user/devices/{}", device_uuid)))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    pub async fn revoke_sessions(&self, token: &str) -> Result<(), SyncError> {
        let response = self
            .http
            .delete(self.url("/api/user/sessions"))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Builds a full URL for a given API path.
    fn url(&self, path: &str) -> String {
        let base = if self.server_url.starts_with("http://")
            || self.server_url.starts_with("https://")
        {
            self.server_url.clone()
        } else {
            format!("http://{}", self.server_url)
        };
        format!("{}{}", base.trim_end_matches('/'), path)
    }
}

/// Unwraps a server response: the envelope's payload on success, a typed auth
/// error on 401, the envelope's message otherwise.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SyncError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        // The server distinguishes an expired token from a revoked or unknown
        // one only through its message.
        let message = failure_message(response).await.unwrap_or_default();
        if message.contains("expired") {
            return Err(SyncError::TokenExpired);
        }
        return Err(SyncError::Unauthenticated);
    }
    if !status.is_success() {
        let message = failure_message(response)
            .await
            .unwrap_or_else(|| format!("server returned status {}", status));
        return Err(SyncError::Api(message));
    }
    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| SyncError::Api(e.to_string()))?;
    envelope.into_data().map_err(SyncError::Api)
}

async fn failure_message(response: reqwest::Response) -> Option<String> {
    response
        .json::<ApiResponse<serde_json::Value>>()
        .await
        .ok()
        .and_then(|envelope| envelope.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = ApiClient::new("http://localhost:8080");
        assert_eq!(
            client.url("/api/sync/full"),
            "http://localhost:8080/api/sync/full"
        );

        let client = ApiClient::new("http://localhost:8080/");
        assert_eq!(client.url("/health"), "http://localhost:8080/health");

        let client = ApiClient::new("https://sync.example.com");
        assert_eq!(client.url("/health"), "https://sync.example.com/health");

        let client = ApiClient::new("localhost:8080");
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
    }

    #[test]
    fn test_server_url_accessor() {
        let client = ApiClient::new("http://localhost:9000");
        assert_eq!(client.server_url(), "http://localhost:9000");
    }
}
