//! Reconciliation logic for EtcdBackup resources
//!
//! Controllers hand queue keys to these functions; they return errors that
//! feed the queue's retry policy.

pub mod backup;
