//! Storage backends for etcd snapshots
//!
//! Every backend addresses objects as `<container>/<key>`. The four
//! supported services share one capability (`write`, `list`, `delete`,
//! `open`) exposed through [`StorageBackend`]. Service clients arrive
//! already authenticated through the narrow [`ObjectClient`] and
//! [`BlockBlobClient`] traits.

mod abs;
mod cloud;
mod memory;
mod object;

pub use abs::{new_block_id, AbsWriter};
pub use cloud::{CloudStorageProvider, MultipartBlobClient, ObjectStoreClient};
pub use memory::{MemoryBlockBlobClient, MemoryObjectClient, MemoryStorageProvider};
pub use object::ObjectWriter;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::backup::StorageTarget;
use crate::error::{Error, Result};

/// Readable stream of a stored backup
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Split `container/key` into its parts.
///
/// Fails without touching any backend when the separator is missing or the
/// container is empty.
pub fn parse_bucket_and_key(path: &str) -> Result<(&str, &str)> {
    match path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Ok((bucket, key)),
        _ => Err(Error::InvalidPath(path.to_string())),
    }
}

/// Like [`parse_bucket_and_key`] but also requires a non-empty key
pub(crate) fn parse_object_path(path: &str) -> Result<(&str, &str)> {
    let (bucket, key) = parse_bucket_and_key(path)?;
    if key.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok((bucket, key))
}

/// Flat object API (S3, GCS, OSS)
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Store `data` under `bucket/key`, returning the stored size
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Keys in `bucket` starting with `prefix` (bucket name not included)
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Block blob API (Azure Blob Storage)
#[async_trait]
pub trait BlockBlobClient: Send + Sync {
    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// Open a staging session for `container/key`
    async fn begin_upload(&self, container: &str, key: &str) -> Result<Box<dyn BlockUpload>>;

    /// Committed blob names in `container` starting with `prefix`
    async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<String>>;

    async fn delete_blob(&self, container: &str, key: &str) -> Result<()>;

    async fn download(&self, container: &str, key: &str) -> Result<Bytes>;
}

/// Two-phase block upload.
///
/// Staged blocks stay invisible until `commit`; a session dropped or
/// aborted before commit leaves no object behind.
#[async_trait]
pub trait BlockUpload: Send {
    /// Stage one chunk and return its block id
    async fn stage(&mut self, chunk: Bytes) -> Result<String>;

    /// Materialize the blob from `block_ids`, in order. Returns its size.
    async fn commit(self: Box<Self>, block_ids: Vec<String>) -> Result<u64>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// A storage backend resolved for one backup run
pub enum StorageBackend {
    S3(ObjectWriter),
    Abs(AbsWriter),
    Gcs(ObjectWriter),
    Oss(ObjectWriter),
}

impl StorageBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageBackend::S3(_) => "s3",
            StorageBackend::Abs(_) => "abs",
            StorageBackend::Gcs(_) => "gcs",
            StorageBackend::Oss(_) => "oss",
        }
    }

    /// Upload everything readable from `reader` to `path`; returns bytes written
    pub async fn write(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        match self {
            StorageBackend::Abs(w) => w.write(path, reader).await,
            StorageBackend::S3(w) | StorageBackend::Gcs(w) | StorageBackend::Oss(w) => {
                w.write(path, reader).await
            }
        }
    }

    /// Full `container/key` paths starting with `base_path`
    pub async fn list(&self, base_path: &str) -> Result<Vec<String>> {
        match self {
            StorageBackend::Abs(w) => w.list(base_path).await,
            StorageBackend::S3(w) | StorageBackend::Gcs(w) | StorageBackend::Oss(w) => {
                w.list(base_path).await
            }
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        match self {
            StorageBackend::Abs(w) => w.delete(path).await,
            StorageBackend::S3(w) | StorageBackend::Gcs(w) | StorageBackend::Oss(w) => {
                w.delete(path).await
            }
        }
    }

    pub async fn open(&self, path: &str) -> Result<BoxReader> {
        match self {
            StorageBackend::Abs(w) => w.open(path).await,
            StorageBackend::S3(w) | StorageBackend::Gcs(w) | StorageBackend::Oss(w) => {
                w.open(path).await
            }
        }
    }
}

/// Resolves a storage target to a ready-to-use backend
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn backend(&self, target: &StorageTarget, namespace: &str) -> Result<StorageBackend>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;

    use super::*;

    async fn round_trip(backend: &StorageBackend) -> Vec<u8> {
        let mut data: &[u8] = b"etcd-snapshot";
        backend.write("backups/etcd.db", &mut data).await.unwrap();
        let mut read = Vec::new();
        backend
            .open("backups/etcd.db")
            .await
            .unwrap()
            .read_to_end(&mut read)
            .await
            .unwrap();
        read
    }

    #[tokio::test]
    async fn every_backend_opens_what_it_wrote() {
        let objects = Arc::new(MemoryObjectClient::default());
        let blobs = Arc::new(MemoryBlockBlobClient::with_containers(["backups"]));
        let backends = [
            StorageBackend::S3(ObjectWriter::new("s3", objects.clone())),
            StorageBackend::Oss(ObjectWriter::new("oss", objects)),
            StorageBackend::Abs(AbsWriter::new(blobs, 4)),
        ];

        for backend in &backends {
            assert_eq!(round_trip(backend).await, b"etcd-snapshot", "{}", backend.kind());
            assert!(matches!(
                backend.open("no-separator").await,
                Err(Error::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn splits_on_first_separator() {
        assert_eq!(
            parse_bucket_and_key("backups/etcd/cluster-a.db").unwrap(),
            ("backups", "etcd/cluster-a.db")
        );
        assert_eq!(parse_bucket_and_key("backups/").unwrap(), ("backups", ""));
    }

    #[test]
    fn rejects_paths_without_container() {
        assert!(matches!(
            parse_bucket_and_key("no-separator"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            parse_bucket_and_key("/key-only"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            parse_object_path("backups/"),
            Err(Error::InvalidPath(_))
        ));
    }
}
