//! Azure Blob Storage writer
//!
//! Snapshots are staged as fixed-size blocks and only become a blob when
//! the block list is committed.

use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{parse_bucket_and_key, parse_object_path, BlockBlobClient, BlockUpload, BoxReader};
use crate::error::{Error, Result};

/// Base64 block id, unique per staged block
pub fn new_block_id() -> String {
    BASE64_STANDARD.encode(Uuid::new_v4().to_string())
}

/// Block-staged writer for Azure Blob Storage
#[derive(Clone)]
pub struct AbsWriter {
    client: Arc<dyn BlockBlobClient>,
    block_size: usize,
}

impl AbsWriter {
    pub fn new(client: Arc<dyn BlockBlobClient>, block_size: usize) -> Self {
        Self {
            client,
            block_size: block_size.max(1),
        }
    }

    pub async fn write(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let (container, key) = parse_object_path(path)?;

        if !self.client.container_exists(container).await? {
            return Err(Error::storage(format!(
                "container {} does not exist or is inaccessible",
                container
            )));
        }

        let mut upload = self.client.begin_upload(container, key).await?;
        let block_ids = match self.stage_all(upload.as_mut(), reader).await {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(abort_err) = upload.abort().await {
                    warn!(path = %path, error = %abort_err, "Failed to abort block upload");
                }
                return Err(e);
            }
        };

        let blocks = block_ids.len();
        let size = upload.commit(block_ids).await?;
        debug!(path = %path, blocks, bytes = size, "Committed block blob");
        Ok(size)
    }

    async fn stage_all(
        &self,
        upload: &mut dyn BlockUpload,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Vec<String>> {
        let mut block_ids = Vec::new();
        loop {
            let mut chunk = Vec::new();
            let n = (&mut *reader)
                .take(self.block_size as u64)
                .read_to_end(&mut chunk)
                .await?;
            if n == 0 {
                break;
            }
            block_ids.push(upload.stage(Bytes::from(chunk)).await?);
            if n < self.block_size {
                break;
            }
        }
        Ok(block_ids)
    }

    pub async fn list(&self, base_path: &str) -> Result<Vec<String>> {
        let (container, prefix) = parse_bucket_and_key(base_path)?;
        let names = self.client.list_blobs(container, prefix).await?;
        Ok(names
            .into_iter()
            .map(|n| format!("{}/{}", container, n))
            .collect())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let (container, key) = parse_object_path(path)?;
        self.client.delete_blob(container, key).await
    }

    pub async fn open(&self, path: &str) -> Result<BoxReader> {
        let (container, key) = parse_object_path(path)?;
        let data = self.client.download(container, key).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryBlockBlobClient;

    #[tokio::test]
    async fn stages_one_block_per_chunk() {
        let client = Arc::new(MemoryBlockBlobClient::with_containers(["backups"]));
        let writer = AbsWriter::new(client.clone(), 4);

        let mut data: &[u8] = b"0123456789";
        let written = writer.write("backups/etcd.db", &mut data).await.unwrap();

        assert_eq!(written, 10);
        assert_eq!(client.committed_blocks("backups", "etcd.db"), Some(3));
        assert_eq!(
            client.blob("backups", "etcd.db").unwrap(),
            Bytes::from_static(b"0123456789")
        );
    }

    #[tokio::test]
    async fn missing_container_is_rejected() {
        let client = Arc::new(MemoryBlockBlobClient::default());
        let writer = AbsWriter::new(client, 4);

        let mut data: &[u8] = b"abc";
        let err = writer.write("absent/etcd.db", &mut data).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn failed_staging_leaves_nothing_listed() {
        let client = Arc::new(MemoryBlockBlobClient::with_containers(["backups"]));
        client.fail_staging_after(1);
        let writer = AbsWriter::new(client.clone(), 2);

        let mut data: &[u8] = b"abcdef";
        assert!(writer.write("backups/etcd.db", &mut data).await.is_err());
        assert!(writer.list("backups/etcd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_blob_opens_for_reading() {
        let client = Arc::new(MemoryBlockBlobClient::with_containers(["backups"]));
        let writer = AbsWriter::new(client, 3);

        let mut data: &[u8] = b"snapshot-bytes";
        writer.write("backups/etcd.db", &mut data).await.unwrap();

        let mut reader = writer.open("backups/etcd.db").await.unwrap();
        let mut read = Vec::new();
        reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, b"snapshot-bytes");

        assert!(matches!(
            writer.open("backups/missing.db").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            writer.open("no-separator").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn block_ids_are_unique_base64() {
        let a = new_block_id();
        let b = new_block_id();
        assert_ne!(a, b);
        assert!(BASE64_STANDARD.decode(&a).is_ok());
    }
}
