//! EtcdBackup Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Storage type tag for S3 (and S3-compatible) storage
pub const STORAGE_TYPE_S3: &str = "S3";
/// Storage type tag for Azure Blob Storage
pub const STORAGE_TYPE_ABS: &str = "ABS";
/// Storage type tag for Google Cloud Storage
pub const STORAGE_TYPE_GCS: &str = "GCS";
/// Storage type tag for Alibaba Object Storage Service
pub const STORAGE_TYPE_OSS: &str = "OSS";

/// EtcdBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdBackup",
    plural = "etcdbackups",
    singular = "etcdbackup",
    namespaced,
    status = "EtcdBackupStatus",
    printcolumn = r#"{"name": "Succeeded", "type": "boolean", "jsonPath": ".status.succeeded"}"#,
    printcolumn = r#"{"name": "Last Success", "type": "date", "jsonPath": ".status.lastSuccessDate"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackupSpec {
    /// Endpoints of the etcd cluster to snapshot
    pub etcd_endpoints: Vec<String>,

    /// Storage type (S3, ABS, GCS, OSS)
    pub storage_type: String,

    /// Backup policy; absent or a zero interval means a one-shot backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_policy: Option<BackupPolicy>,

    /// Secret holding etcd client TLS material
    #[serde(
        default,
        rename = "clientTLSSecret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_tls_secret: Option<String>,

    /// Skip verification of the etcd server certificate
    #[serde(default)]
    pub allow_self_signed_certificates: bool,

    /// S3 storage configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3BackupSource>,

    /// Azure Blob storage configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs: Option<AbsBackupSource>,

    /// GCS storage configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsBackupSource>,

    /// OSS storage configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oss: Option<OssBackupSource>,
}

/// Backup policy
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    /// Deadline for one backup run; <= 0 uses the operator default
    #[serde(default)]
    pub timeout_in_second: i64,

    /// Seconds between periodic backups; 0 means one-shot
    #[serde(default)]
    pub backup_interval_in_second: i64,

    /// Number of backups to keep; 0 keeps all
    #[serde(default)]
    pub max_backups: i32,
}

/// S3 storage specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3BackupSource {
    /// Full path `<bucket>/<key-prefix>`
    pub path: String,

    /// Secret holding AWS credentials
    pub aws_secret: String,

    /// Custom endpoint (for MinIO, Ceph, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Use path-style addressing
    #[serde(default)]
    pub force_path_style: bool,
}

/// Azure Blob storage specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbsBackupSource {
    /// Full path `<container>/<blob-prefix>`
    pub path: String,

    /// Secret holding the storage account name and key
    pub abs_secret: String,
}

/// GCS storage specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcsBackupSource {
    /// Full path `<bucket>/<object-prefix>`
    pub path: String,

    /// Secret holding the service account credentials
    pub gcp_secret: String,
}

/// OSS storage specification
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OssBackupSource {
    /// Full path `<bucket>/<object-prefix>`
    pub path: String,

    /// Secret holding the access key pair
    pub oss_secret: String,

    /// OSS endpoint, e.g. `https://oss-cn-hangzhou.aliyuncs.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// EtcdBackup status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackupStatus {
    /// Whether the last backup run succeeded
    #[serde(default)]
    pub succeeded: bool,

    /// Failure reason; empty when the last run succeeded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// etcd version of the member the snapshot was taken from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etcd_version: String,

    /// etcd revision captured by the snapshot
    #[serde(default)]
    pub etcd_revision: i64,

    /// Time of the last successful backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_date: Option<DateTime<Utc>>,

    /// Time of the last backup attempt, successful or not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_date: Option<DateTime<Utc>>,
}

impl EtcdBackupSpec {
    /// Periodic backups carry a policy with a positive interval
    pub fn is_periodic(&self) -> bool {
        self.backup_policy
            .as_ref()
            .map(|p| p.backup_interval_in_second > 0)
            .unwrap_or(false)
    }

    /// Declared interval in seconds, 0 when one-shot
    pub fn interval_secs(&self) -> i64 {
        self.backup_policy
            .as_ref()
            .map(|p| p.backup_interval_in_second)
            .unwrap_or(0)
    }
}

impl EtcdBackupStatus {
    /// A run has been recorded, successful or failed
    pub fn is_terminal(&self) -> bool {
        self.succeeded || !self.reason.is_empty()
    }
}

impl EtcdBackup {
    /// `namespace/name` key used by the work queue
    pub fn queue_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }

    /// Whether a one-shot backup already ran
    pub fn has_terminal_status(&self) -> bool {
        self.status.as_ref().map(|s| s.is_terminal()).unwrap_or(false)
    }
}
