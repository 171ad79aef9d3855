//! Cloud storage clients built on the `object_store` crate
//!
//! Credentials come from the operator's own environment (instance roles,
//! workload identity, or the standard `AWS_*`, `GOOGLE_*`, `AZURE_*`
//! variables); one store is built lazily per bucket.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};

use super::{
    new_block_id, AbsWriter, BlockBlobClient, BlockUpload, ObjectClient, ObjectWriter,
    StorageBackend, StorageProvider,
};
use crate::backup::StorageTarget;
use crate::error::{Error, Result};

type StoreFactory = dyn Fn(&str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync;

/// [`ObjectClient`] over per-bucket `object_store` instances
pub struct ObjectStoreClient {
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    factory: Box<StoreFactory>,
}

impl ObjectStoreClient {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync + 'static,
    {
        Self {
            stores: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(Arc::clone(store.value()));
        }
        let store = (self.factory)(bucket)?;
        self.stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;
        self.store(bucket)?
            .put(&ObjectPath::from(key), PutPayload::from(data))
            .await?;
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let result = self.store(bucket)?.get(&ObjectPath::from(key)).await?;
        Ok(result.bytes().await?)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        // object_store prefixes match whole path segments; backup names are
        // siblings of the configured prefix, so list its parent and filter.
        let parent = prefix.rsplit_once('/').map(|(dir, _)| ObjectPath::from(dir));
        let store = self.store(bucket)?;
        let keys: Vec<String> = store
            .list(parent.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.store(bucket)?.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }
}

/// [`BlockBlobClient`] over `object_store` multipart uploads
pub struct MultipartBlobClient {
    inner: ObjectStoreClient,
}

impl MultipartBlobClient {
    pub fn new(inner: ObjectStoreClient) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BlockBlobClient for MultipartBlobClient {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        let store = self.inner.store(container)?;
        listing_found(store.list_with_delimiter(None).await)
    }

    async fn begin_upload(&self, container: &str, key: &str) -> Result<Box<dyn BlockUpload>> {
        let upload = self
            .inner
            .store(container)?
            .put_multipart(&ObjectPath::from(key))
            .await?;
        Ok(Box::new(MultipartBlockUpload {
            upload,
            staged: Vec::new(),
            size: 0,
        }))
    }

    async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_objects(container, prefix).await
    }

    async fn delete_blob(&self, container: &str, key: &str) -> Result<()> {
        self.inner.delete_object(container, key).await
    }

    async fn download(&self, container: &str, key: &str) -> Result<Bytes> {
        self.inner.get_object(container, key).await
    }
}

/// A listing answered means the container exists; only not-found says otherwise
fn listing_found<T>(listing: object_store::Result<T>) -> Result<bool> {
    match listing {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

struct MultipartBlockUpload {
    upload: Box<dyn MultipartUpload>,
    staged: Vec<String>,
    size: u64,
}

#[async_trait]
impl BlockUpload for MultipartBlockUpload {
    async fn stage(&mut self, chunk: Bytes) -> Result<String> {
        let len = chunk.len() as u64;
        self.upload.put_part(PutPayload::from(chunk)).await?;
        let id = new_block_id();
        self.staged.push(id.clone());
        self.size += len;
        Ok(id)
    }

    async fn commit(mut self: Box<Self>, block_ids: Vec<String>) -> Result<u64> {
        // Parts are ordered by staging order; any other list cannot be honoured.
        if block_ids != self.staged {
            self.upload.abort().await?;
            return Err(Error::storage("block list does not match staged blocks"));
        }
        self.upload.complete().await?;
        Ok(self.size)
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.upload.abort().await?;
        Ok(())
    }
}

/// Builds `object_store` backed clients for each storage target.
///
/// Clients live as long as the provider, so stores built for a bucket are
/// reused across backup runs.
#[derive(Clone)]
pub struct CloudStorageProvider {
    block_size: usize,
    /// S3-compatible clients keyed by endpoint and addressing style
    s3: Arc<DashMap<String, Arc<ObjectStoreClient>>>,
    gcs: Arc<ObjectStoreClient>,
    abs: Arc<MultipartBlobClient>,
}

impl CloudStorageProvider {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            s3: Arc::new(DashMap::new()),
            gcs: Arc::new(ObjectStoreClient::new(|bucket| {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()?;
                Ok(Arc::new(store) as Arc<dyn ObjectStore>)
            })),
            abs: Arc::new(MultipartBlobClient::new(ObjectStoreClient::new(|container| {
                let store = MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .build()?;
                Ok(Arc::new(store) as Arc<dyn ObjectStore>)
            }))),
        }
    }

    fn s3_client(&self, endpoint: Option<String>, path_style: bool) -> Arc<ObjectStoreClient> {
        let cache_key = format!("{}|{}", endpoint.as_deref().unwrap_or_default(), path_style);
        let client = self.s3.entry(cache_key).or_insert_with(|| {
            Arc::new(ObjectStoreClient::new(move |bucket| {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_virtual_hosted_style_request(!path_style);
                if let Some(endpoint) = &endpoint {
                    builder = builder
                        .with_endpoint(endpoint.as_str())
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                Ok(Arc::new(builder.build()?) as Arc<dyn ObjectStore>)
            }))
        });
        Arc::clone(client.value())
    }
}

#[async_trait]
impl StorageProvider for CloudStorageProvider {
    async fn backend(&self, target: &StorageTarget, _namespace: &str) -> Result<StorageBackend> {
        Ok(match target {
            StorageTarget::S3(s3) => StorageBackend::S3(ObjectWriter::new(
                "s3",
                self.s3_client(s3.endpoint.clone(), s3.force_path_style),
            )),
            StorageTarget::Oss(oss) => {
                let endpoint = oss
                    .endpoint
                    .clone()
                    .ok_or_else(|| Error::config("oss.endpoint is required for OSS storage"))?;
                StorageBackend::Oss(ObjectWriter::new("oss", self.s3_client(Some(endpoint), false)))
            }
            StorageTarget::Gcs(_) => StorageBackend::Gcs(ObjectWriter::new("gcs", self.gcs.clone())),
            StorageTarget::Abs(_) => {
                StorageBackend::Abs(AbsWriter::new(self.abs.clone(), self.block_size))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::crd::S3BackupSource;

    fn in_memory_client() -> ObjectStoreClient {
        ObjectStoreClient::new(|_| Ok(Arc::new(InMemory::new()) as Arc<dyn ObjectStore>))
    }

    fn s3_target(endpoint: Option<&str>) -> StorageTarget {
        StorageTarget::S3(S3BackupSource {
            path: "backups/etcd".into(),
            endpoint: endpoint.map(String::from),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn clients_are_reused_across_runs() {
        let provider = CloudStorageProvider::new(1024);

        for _ in 0..3 {
            provider.backend(&s3_target(None), "default").await.unwrap();
        }
        provider
            .backend(&s3_target(Some("http://minio:9000")), "default")
            .await
            .unwrap();
        assert_eq!(provider.s3.len(), 2);

        let first = provider.s3_client(None, false);
        let again = provider.s3_client(None, false);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn only_not_found_means_missing_container() {
        assert!(listing_found(Ok(())).unwrap());
        assert!(!listing_found::<()>(Err(object_store::Error::NotFound {
            path: "backups".into(),
            source: "container not found".into(),
        }))
        .unwrap());

        let denied = listing_found::<()>(Err(object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "403 AuthorizationFailure".into(),
        }));
        assert!(matches!(denied, Err(Error::Storage(msg)) if msg.contains("AuthorizationFailure")));
    }

    #[tokio::test]
    async fn multipart_blob_round_trip() {
        let blobs = Arc::new(MultipartBlobClient::new(in_memory_client()));
        assert!(blobs.container_exists("backups").await.unwrap());

        let writer = AbsWriter::new(blobs, 4);
        let mut data: &[u8] = b"0123456789";
        assert_eq!(writer.write("backups/etcd.db", &mut data).await.unwrap(), 10);
        assert_eq!(writer.list("backups/etcd").await.unwrap(), vec!["backups/etcd.db"]);

        let mut read = Vec::new();
        writer
            .open("backups/etcd.db")
            .await
            .unwrap()
            .read_to_end(&mut read)
            .await
            .unwrap();
        assert_eq!(read, b"0123456789");
    }
}
