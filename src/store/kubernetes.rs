//! Kubernetes Device Store Adapter
//!
//! Implements the `DeviceStore` port on namespaced BlockDevice custom
//! resources, mapping API status codes onto the store error variants.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::{debug, instrument};

use crate::crd::{BlockDevice, BLOCK_DEVICE_KIND};
use crate::domain::{DeviceStore, LabelSelector};
use crate::error::{Error, Result};

/// BlockDevice store backed by the cluster API server
#[derive(Clone)]
pub struct KubeDeviceStore {
    client: Client,
    namespace: String,
}

impl KubeDeviceStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<BlockDevice> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Translate API status codes into store semantics
    fn map_error(err: kube::Error, name: &str) -> Error {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Error::ResourceNotFound {
                kind: BLOCK_DEVICE_KIND.into(),
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::ResourceExists {
                    kind: BLOCK_DEVICE_KIND.into(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ref resp) if resp.code == 409 => Error::Conflict {
                kind: BLOCK_DEVICE_KIND.into(),
                name: name.to_string(),
            },
            other => Error::Kube(other),
        }
    }
}

impl std::fmt::Debug for KubeDeviceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDeviceStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl DeviceStore for KubeDeviceStore {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Option<BlockDevice>> {
        self.api()
            .get_opt(name)
            .await
            .map_err(|e| Self::map_error(e, name))
    }

    #[instrument(skip(self), fields(selector = %selector))]
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<BlockDevice>> {
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector.to_string())
        };
        let list = self.api().list(&params).await.map_err(|e| Error::ListFailed {
            kind: BLOCK_DEVICE_KIND.into(),
            reason: e.to_string(),
        })?;
        debug!(count = list.items.len(), "listed BlockDevices");
        Ok(list.items)
    }

    #[instrument(skip(self, device), fields(name = %device.uuid()))]
    async fn create(&self, device: &BlockDevice) -> Result<BlockDevice> {
        self.api()
            .create(&PostParams::default(), device)
            .await
            .map_err(|e| Self::map_error(e, device.uuid()))
    }

    #[instrument(skip(self, device), fields(name = %device.uuid()))]
    async fn update(&self, device: &BlockDevice) -> Result<BlockDevice> {
        self.api()
            .replace(device.uuid(), &PostParams::default(), device)
            .await
            .map_err(|e| Self::map_error(e, device.uuid()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        self.api()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Self::map_error(e, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        assert_matches!(
            KubeDeviceStore::map_error(api_error(404, "NotFound"), "bd"),
            Error::ResourceNotFound { .. }
        );
        assert_matches!(
            KubeDeviceStore::map_error(api_error(409, "AlreadyExists"), "bd"),
            Error::ResourceExists { .. }
        );
        assert_matches!(
            KubeDeviceStore::map_error(api_error(409, "Conflict"), "bd"),
            Error::Conflict { .. }
        );
        assert_matches!(
            KubeDeviceStore::map_error(api_error(500, "InternalError"), "bd"),
            Error::Kube(_)
        );
    }
}
