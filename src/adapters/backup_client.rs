//! Access to EtcdBackup resources
//!
//! The reconciler and periodic runners only see the [`BackupClient`] trait:
//! a read of the local watch cache plus `get`/`update`/`update_status`
//! against the API server.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::PostParams;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, ResourceExt};

use crate::crd::EtcdBackup;
use crate::error::{Error, Result};

#[async_trait]
pub trait BackupClient: Send + Sync {
    /// Look `namespace/name` up in the local cache
    fn get_by_key(&self, key: &str) -> Option<Arc<EtcdBackup>>;

    /// Fetch the latest object from the API server
    async fn get(&self, namespace: &str, name: &str) -> Result<EtcdBackup>;

    /// Replace metadata and spec (finalizers)
    async fn update(&self, backup: &EtcdBackup) -> Result<EtcdBackup>;

    /// Replace the status subresource
    async fn update_status(&self, backup: &EtcdBackup) -> Result<EtcdBackup>;
}

/// Split a queue key into namespace and name
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// [`BackupClient`] backed by a reflector store and the Kubernetes API
#[derive(Clone)]
pub struct KubeBackupClient {
    client: Client,
    store: Store<EtcdBackup>,
}

impl KubeBackupClient {
    pub fn new(client: Client, store: Store<EtcdBackup>) -> Self {
        Self { client, store }
    }

    fn api(&self, namespace: &str) -> Api<EtcdBackup> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of(backup: &EtcdBackup) -> Result<String> {
    backup.namespace().ok_or_else(|| {
        Error::validation(format!("EtcdBackup {} has no namespace", backup.name_any()))
    })
}

#[async_trait]
impl BackupClient for KubeBackupClient {
    fn get_by_key(&self, key: &str) -> Option<Arc<EtcdBackup>> {
        let (namespace, name) = split_key(key);
        let mut obj_ref = ObjectRef::<EtcdBackup>::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        self.store.get(&obj_ref)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<EtcdBackup> {
        self.api(namespace).get(name).await.map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => {
                Error::NotFound(format!("{}/{}", namespace, name))
            }
            other => Error::Kube(other),
        })
    }

    async fn update(&self, backup: &EtcdBackup) -> Result<EtcdBackup> {
        let namespace = namespace_of(backup)?;
        Ok(self
            .api(&namespace)
            .replace(&backup.name_any(), &PostParams::default(), backup)
            .await?)
    }

    async fn update_status(&self, backup: &EtcdBackup) -> Result<EtcdBackup> {
        let namespace = namespace_of(backup)?;
        let data = serde_json::to_vec(backup)?;
        Ok(self
            .api(&namespace)
            .replace_status(&backup.name_any(), &PostParams::default(), data)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_namespaced_key() {
        assert_eq!(split_key("prod/nightly"), (Some("prod"), "nightly"));
        assert_eq!(split_key("nightly"), (None, "nightly"));
    }
}
