//! Taking snapshots from etcd
//!
//! The executor only depends on the [`Snapshotter`] trait. The production
//! implementation talks to the etcd v3 JSON gateway over HTTP(S).

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::{Bytes, BytesMut};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapters::get_etcd_tls_credentials;
use crate::error::{Error, Result};

/// What to snapshot and how to connect
#[derive(Debug, Clone, Default)]
pub struct SnapshotRequest {
    pub endpoints: Vec<String>,
    pub client_tls_secret: Option<String>,
    pub allow_self_signed: bool,
    pub namespace: String,
}

/// A complete snapshot of the etcd keyspace
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: i64,
    pub version: String,
    pub data: Bytes,
}

/// Produces a snapshot from one of the requested endpoints
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// Try endpoints in order; the first success wins.
    async fn snapshot(&self, request: &SnapshotRequest) -> Result<Snapshot>;
}

/// Snapshotter using the etcd gRPC gateway (`/v3/maintenance/*`)
#[derive(Clone)]
pub struct EtcdGatewaySnapshotter {
    client: Client,
}

impl EtcdGatewaySnapshotter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn http_client(&self, request: &SnapshotRequest) -> Result<reqwest::Client> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(request.allow_self_signed);

        if let Some(secret) = &request.client_tls_secret {
            let creds =
                get_etcd_tls_credentials(&self.client, &request.namespace, secret).await?;
            builder = builder
                .add_root_certificate(reqwest::Certificate::from_pem(&creds.ca_cert)?)
                .identity(reqwest::Identity::from_pem(&creds.identity_pem())?);
        }

        Ok(builder.build()?)
    }

    async fn snapshot_from(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        tls: bool,
    ) -> Result<Snapshot> {
        let base = endpoint_url(endpoint, tls);

        let status = http
            .post(format!("{}/v3/maintenance/status", base))
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let (revision, version) = parse_status(&status)?;

        let body = http
            .post(format!("{}/v3/maintenance/snapshot", base))
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let data = decode_snapshot_stream(&body)?;

        debug!(endpoint = %endpoint, revision, bytes = data.len(), "Took etcd snapshot");
        Ok(Snapshot {
            revision,
            version,
            data,
        })
    }
}

#[async_trait]
impl Snapshotter for EtcdGatewaySnapshotter {
    async fn snapshot(&self, request: &SnapshotRequest) -> Result<Snapshot> {
        let http = self.http_client(request).await?;
        let tls = request.client_tls_secret.is_some();

        let mut last_error = None;
        for endpoint in &request.endpoints {
            match self.snapshot_from(&http, endpoint, tls).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to snapshot endpoint");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::snapshot(match last_error {
            Some(e) => format!("no endpoint produced a snapshot, last error: {}", e),
            None => "no etcd endpoints given".to_string(),
        }))
    }
}

/// Prefix bare `host:port` endpoints with a scheme
pub fn endpoint_url(endpoint: &str, tls: bool) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if tls {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

/// The gateway renders int64 fields as JSON strings
#[derive(Deserialize)]
#[serde(untagged)]
enum Int64 {
    Str(String),
    Num(i64),
}

impl Int64 {
    fn value(&self) -> Result<i64> {
        match self {
            Int64::Num(n) => Ok(*n),
            Int64::Str(s) => s
                .parse()
                .map_err(|_| Error::snapshot(format!("invalid revision '{}'", s))),
        }
    }
}

#[derive(Deserialize)]
struct ResponseHeader {
    revision: Option<Int64>,
}

#[derive(Deserialize)]
struct StatusResponse {
    header: Option<ResponseHeader>,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
struct SnapshotChunk {
    result: Option<SnapshotResult>,
    error: Option<GatewayError>,
}

#[derive(Deserialize)]
struct SnapshotResult {
    #[serde(default)]
    blob: String,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

/// Extract `(revision, version)` from a maintenance status response
pub fn parse_status(body: &[u8]) -> Result<(i64, String)> {
    let status: StatusResponse = serde_json::from_slice(body)?;
    let revision = match status.header.and_then(|h| h.revision) {
        Some(rev) => rev.value()?,
        None => 0,
    };
    Ok((revision, status.version))
}

/// Join the base64 blobs of a streamed snapshot response
pub fn decode_snapshot_stream(body: &[u8]) -> Result<Bytes> {
    let mut data = BytesMut::new();
    for chunk in serde_json::Deserializer::from_slice(body).into_iter::<SnapshotChunk>() {
        let chunk = chunk?;
        if let Some(err) = chunk.error {
            return Err(Error::snapshot(format!("etcd snapshot stream failed: {}", err.message)));
        }
        if let Some(result) = chunk.result {
            let blob = BASE64_STANDARD
                .decode(result.blob.as_bytes())
                .map_err(|e| Error::snapshot(format!("invalid snapshot chunk: {}", e)))?;
            data.extend_from_slice(&blob);
        }
    }
    Ok(data.freeze())
}
