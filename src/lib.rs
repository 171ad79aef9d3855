//! etcd Backup Kubernetes Operator
//!
//! Drives EtcdBackup resources to completion: one-shot backups run once,
//! periodic backups get a long-lived runner, and every outcome is written
//! back to the resource status.

pub mod adapters;
pub mod backup;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconcilers;
pub mod scheduler;
pub mod storage;

pub use error::{Error, Result};
