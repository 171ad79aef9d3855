//! Secret fetching utilities for Kubernetes secrets

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::error::{Error, Result};

/// Client certificate key in an etcd TLS secret
pub const ETCD_CLIENT_CERT_KEY: &str = "etcd-client.crt";
/// Client private key in an etcd TLS secret
pub const ETCD_CLIENT_KEY_KEY: &str = "etcd-client.key";
/// CA bundle in an etcd TLS secret
pub const ETCD_CLIENT_CA_KEY: &str = "etcd-client-ca.crt";

/// Fetch a secret from Kubernetes
pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets.get(name).await.map_err(|e| match e {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            Error::SecretNotFound(format!("{}/{}", namespace, name))
        }
        other => Error::Kube(other),
    })
}

/// Get raw bytes for `key` from a secret
pub fn get_secret_bytes(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.clone())
        .ok_or_else(|| Error::SecretKeyNotFound {
            secret: secret.metadata.name.clone().unwrap_or_default(),
            key: key.to_string(),
        })
}

/// PEM material for talking TLS to etcd
#[derive(Debug, Clone)]
pub struct EtcdTlsCredentials {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl EtcdTlsCredentials {
    /// Read the standard etcd client keys out of a secret
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            ca_cert: get_secret_bytes(secret, ETCD_CLIENT_CA_KEY)?,
            client_cert: get_secret_bytes(secret, ETCD_CLIENT_CERT_KEY)?,
            client_key: get_secret_bytes(secret, ETCD_CLIENT_KEY_KEY)?,
        })
    }

    /// Certificate followed by key, as `reqwest::Identity::from_pem` expects
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.client_cert.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.client_key);
        pem
    }
}

/// Fetch etcd client TLS credentials from a Kubernetes secret
pub async fn get_etcd_tls_credentials(
    client: &Client,
    namespace: &str,
    secret_name: &str,
) -> Result<EtcdTlsCredentials> {
    let secret = get_secret(client, secret_name, namespace).await?;
    EtcdTlsCredentials::from_secret(&secret)
}
