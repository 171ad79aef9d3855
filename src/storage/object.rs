//! Writer for flat object stores (S3, GCS, OSS)

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::{parse_bucket_and_key, parse_object_path, BoxReader, ObjectClient};
use crate::error::Result;

/// Uploads a snapshot as a single object
#[derive(Clone)]
pub struct ObjectWriter {
    service: &'static str,
    client: Arc<dyn ObjectClient>,
}

impl ObjectWriter {
    pub fn new(service: &'static str, client: Arc<dyn ObjectClient>) -> Self {
        Self { service, client }
    }

    pub async fn write(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let (bucket, key) = parse_object_path(path)?;

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;

        let written = self.client.put_object(bucket, key, Bytes::from(buf)).await?;
        debug!(service = self.service, path = %path, bytes = written, "Uploaded object");
        Ok(written)
    }

    pub async fn list(&self, base_path: &str) -> Result<Vec<String>> {
        let (bucket, prefix) = parse_bucket_and_key(base_path)?;
        let keys = self.client.list_objects(bucket, prefix).await?;
        Ok(keys.into_iter().map(|k| format!("{}/{}", bucket, k)).collect())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let (bucket, key) = parse_object_path(path)?;
        self.client.delete_object(bucket, key).await
    }

    pub async fn open(&self, path: &str) -> Result<BoxReader> {
        let (bucket, key) = parse_object_path(path)?;
        let data = self.client.get_object(bucket, key).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}
