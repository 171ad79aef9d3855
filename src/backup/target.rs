//! Storage target resolution

use crate::crd::{
    AbsBackupSource, EtcdBackupSpec, GcsBackupSource, OssBackupSource, S3BackupSource,
    STORAGE_TYPE_ABS, STORAGE_TYPE_GCS, STORAGE_TYPE_OSS, STORAGE_TYPE_S3,
};
use crate::error::{Error, Result};

/// Where a backup is written, one variant per supported service
#[derive(Debug, Clone, PartialEq)]
pub enum StorageTarget {
    S3(S3BackupSource),
    Abs(AbsBackupSource),
    Gcs(GcsBackupSource),
    Oss(OssBackupSource),
}

impl StorageTarget {
    /// Resolve the declared storage type and its source block.
    ///
    /// An unknown type is a configuration error for this resource only.
    pub fn from_spec(spec: &EtcdBackupSpec) -> Result<Self> {
        fn required<T: Clone>(source: &Option<T>, field: &str, kind: &str) -> Result<T> {
            source.clone().ok_or_else(|| {
                Error::config(format!(
                    "spec.{} must be set when storageType is {}",
                    field, kind
                ))
            })
        }

        match spec.storage_type.as_str() {
            STORAGE_TYPE_S3 => Ok(StorageTarget::S3(required(&spec.s3, "s3", STORAGE_TYPE_S3)?)),
            STORAGE_TYPE_ABS => Ok(StorageTarget::Abs(required(
                &spec.abs,
                "abs",
                STORAGE_TYPE_ABS,
            )?)),
            STORAGE_TYPE_GCS => Ok(StorageTarget::Gcs(required(
                &spec.gcs,
                "gcs",
                STORAGE_TYPE_GCS,
            )?)),
            STORAGE_TYPE_OSS => Ok(StorageTarget::Oss(required(
                &spec.oss,
                "oss",
                STORAGE_TYPE_OSS,
            )?)),
            other => Err(Error::config(format!("unknown StorageType: {}", other))),
        }
    }

    /// Base `container/prefix` path backups are written under
    pub fn path(&self) -> &str {
        match self {
            StorageTarget::S3(s) => &s.path,
            StorageTarget::Abs(s) => &s.path,
            StorageTarget::Gcs(s) => &s.path,
            StorageTarget::Oss(s) => &s.path,
        }
    }

    pub fn storage_type(&self) -> &'static str {
        match self {
            StorageTarget::S3(_) => STORAGE_TYPE_S3,
            StorageTarget::Abs(_) => STORAGE_TYPE_ABS,
            StorageTarget::Gcs(_) => STORAGE_TYPE_GCS,
            StorageTarget::Oss(_) => STORAGE_TYPE_OSS,
        }
    }
}
