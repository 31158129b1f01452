use crate::error::{ControllerError, Result};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Pod};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use vmsteward_core::{GroupVersionKind, Resource, VirtualMachine};

/// HTTP client for a Kubernetes-style API server
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into an error, otherwise pass it through
    async fn check(operation: &str, resource: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            return Err(ControllerError::conflict(resource, body));
        }
        Err(ControllerError::api_request_failed(
            operation,
            Some(status.as_u16()),
            format!("status {}: {}", status, body),
        ))
    }

    async fn parse<T: DeserializeOwned>(operation: &str, resp: Response) -> Result<T> {
        resp.json::<T>().await.map_err(|e| {
            ControllerError::api_request_failed(operation, None, format!("Failed to parse response: {}", e))
        })
    }

    /// GET a list endpoint and decode its items, skipping malformed entries
    async fn list<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<Vec<T>> {
        let url = self.url(path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed(operation, None, e.to_string()))?;
        let resp = Self::check(operation, path, resp).await?;
        let body: serde_json::Value = Self::parse(operation, resp).await?;

        let items = body["items"].as_array().cloned().unwrap_or_default();
        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value(item) {
                Ok(obj) => objects.push(obj),
                Err(e) => warn!("{}: failed to decode list item: {}", operation, e),
            }
        }
        Ok(objects)
    }

    /// POST /api/v1/namespaces/{namespace}/events
    pub async fn create_event(&self, namespace: &str, event: &Event) -> Result<()> {
        let url = self.url(&format!("/api/v1/namespaces/{}/events", namespace));
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed("create event", None, e.to_string()))?;
        Self::check("create event", "event", resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    /// POST /api/v1/namespaces/{namespace}/pods
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let url = self.url(&GroupVersionKind::pod().collection_path(namespace));
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(pod)
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed("create pod", None, e.to_string()))?;
        let resp = Self::check("create pod", "pod", resp).await?;
        Self::parse("create pod", resp).await
    }

    /// DELETE /api/v1/namespaces/{namespace}/pods/{name}
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let path = GroupVersionKind::pod().object_path(namespace, name);
        let url = self.url(&path);
        debug!("DELETE {}", url);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed("delete pod", None, e.to_string()))?;
        Self::check("delete pod", &path, resp).await?;
        Ok(())
    }

    /// PUT /api/v1/namespaces/{namespace}/pods/{name}
    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let path = GroupVersionKind::pod().object_path(pod.namespace(), pod.name());
        let url = self.url(&path);
        debug!("PUT {}", url);

        let resp = self
            .client
            .put(&url)
            .json(pod)
            .send()
            .await
            .map_err(|e| ControllerError::api_request_failed("update pod", None, e.to_string()))?;
        let resp = Self::check("update pod", &path, resp).await?;
        Self::parse("update pod", resp).await
    }

    /// GET /api/v1/pods
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.list("list pods", &GroupVersionKind::pod().list_path())
            .await
    }

    /// PUT /apis/vmsteward.io/v1alpha1/namespaces/{namespace}/virtualmachines/{name}
    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine> {
        let path = GroupVersionKind::virtual_machine().object_path(vm.namespace(), vm.name());
        let url = self.url(&path);
        debug!("PUT {}", url);

        let resp = self
            .client
            .put(&url)
            .json(vm)
            .send()
            .await
            .map_err(|e| {
                ControllerError::api_request_failed("update virtualmachine", None, e.to_string())
            })?;
        let resp = Self::check("update virtualmachine", &path, resp).await?;
        Self::parse("update virtualmachine", resp).await
    }

    /// GET /apis/vmsteward.io/v1alpha1/virtualmachines
    async fn list_vms(&self) -> Result<Vec<VirtualMachine>> {
        self.list(
            "list virtualmachines",
            &GroupVersionKind::virtual_machine().list_path(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://127.0.0.1:6443/");
        assert_eq!(
            client.url("/api/v1/pods"),
            "http://127.0.0.1:6443/api/v1/pods"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_api_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.list_pods().await.unwrap_err();
        assert!(matches!(err, ControllerError::ApiRequestFailed { .. }));
    }
}
