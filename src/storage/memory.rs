//! In-process storage clients
//!
//! Used by tests and local dry runs. Both clients honour the same
//! visibility rules as the real services: objects appear on put, blobs
//! only on commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::{
    new_block_id, AbsWriter, BlockBlobClient, BlockUpload, ObjectClient, ObjectWriter,
    StorageBackend, StorageProvider,
};
use crate::backup::StorageTarget;
use crate::config::DEFAULT_ABS_BLOCK_SIZE;
use crate::error::{Error, Result};

type ObjectKey = (String, String);

/// Flat object store held in memory
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    objects: Mutex<BTreeMap<ObjectKey, Bytes>>,
}

impl MemoryObjectClient {
    /// Keys currently stored in `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Seed an object directly
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;
        self.insert(bucket, key, data);
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.object(bucket, key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BlobState {
    containers: HashSet<String>,
    blobs: BTreeMap<ObjectKey, Bytes>,
    block_counts: HashMap<ObjectKey, usize>,
}

/// Block blob store held in memory
#[derive(Debug, Default)]
pub struct MemoryBlockBlobClient {
    state: Arc<Mutex<BlobState>>,
    /// Staging fails once this many blocks were staged (0 = never)
    fail_after: Arc<AtomicUsize>,
}

impl MemoryBlockBlobClient {
    pub fn with_containers<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        client
            .state
            .lock()
            .containers
            .extend(containers.into_iter().map(Into::into));
        client
    }

    /// Make every upload session fail after staging `blocks` blocks
    pub fn fail_staging_after(&self, blocks: usize) {
        self.fail_after.store(blocks, Ordering::SeqCst);
    }

    pub fn blob(&self, container: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .blobs
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of blocks the committed blob was assembled from
    pub fn committed_blocks(&self, container: &str, key: &str) -> Option<usize> {
        self.state
            .lock()
            .block_counts
            .get(&(container.to_string(), key.to_string()))
            .copied()
    }
}

#[async_trait]
impl BlockBlobClient for MemoryBlockBlobClient {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.state.lock().containers.contains(container))
    }

    async fn begin_upload(&self, container: &str, key: &str) -> Result<Box<dyn BlockUpload>> {
        Ok(Box::new(MemoryBlockUpload {
            state: Arc::clone(&self.state),
            target: (container.to_string(), key.to_string()),
            staged: HashMap::new(),
            fail_after: self.fail_after.load(Ordering::SeqCst),
        }))
    }

    async fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .blobs
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete_blob(&self, container: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        let id = (container.to_string(), key.to_string());
        state.block_counts.remove(&id);
        state
            .blobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("{}/{}", container, key)))
    }

    async fn download(&self, container: &str, key: &str) -> Result<Bytes> {
        self.blob(container, key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", container, key)))
    }
}

struct MemoryBlockUpload {
    state: Arc<Mutex<BlobState>>,
    target: ObjectKey,
    staged: HashMap<String, Bytes>,
    fail_after: usize,
}

#[async_trait]
impl BlockUpload for MemoryBlockUpload {
    async fn stage(&mut self, chunk: Bytes) -> Result<String> {
        if self.fail_after > 0 && self.staged.len() >= self.fail_after {
            return Err(Error::storage("injected staging failure"));
        }
        let id = new_block_id();
        self.staged.insert(id.clone(), chunk);
        Ok(id)
    }

    async fn commit(self: Box<Self>, block_ids: Vec<String>) -> Result<u64> {
        let mut blob = BytesMut::new();
        for id in &block_ids {
            let block = self
                .staged
                .get(id)
                .ok_or_else(|| Error::storage(format!("block {} was never staged", id)))?;
            blob.extend_from_slice(block);
        }

        let size = blob.len() as u64;
        let mut state = self.state.lock();
        state.block_counts.insert(self.target.clone(), block_ids.len());
        state.blobs.insert(self.target.clone(), blob.freeze());
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Provider handing out in-memory backends for every storage type
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageProvider {
    pub objects: Arc<MemoryObjectClient>,
    pub blobs: Arc<MemoryBlockBlobClient>,
    block_size: Option<usize>,
}

impl MemoryStorageProvider {
    pub fn new(objects: Arc<MemoryObjectClient>, blobs: Arc<MemoryBlockBlobClient>) -> Self {
        Self {
            objects,
            blobs,
            block_size: None,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn backend(&self, target: &StorageTarget, _namespace: &str) -> Result<StorageBackend> {
        let objects: Arc<dyn ObjectClient> = self.objects.clone();
        Ok(match target {
            StorageTarget::S3(_) => StorageBackend::S3(ObjectWriter::new("s3", objects)),
            StorageTarget::Gcs(_) => StorageBackend::Gcs(ObjectWriter::new("gcs", objects)),
            StorageTarget::Oss(_) => StorageBackend::Oss(ObjectWriter::new("oss", objects)),
            StorageTarget::Abs(_) => StorageBackend::Abs(AbsWriter::new(
                self.blobs.clone(),
                self.block_size.unwrap_or(DEFAULT_ABS_BLOCK_SIZE),
            )),
        })
    }
}
