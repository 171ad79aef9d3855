//! Prometheus metrics for the etcd Backup Operator
//!
//! This module exposes metrics for monitoring operator health and backup outcomes.

mod prometheus;

pub use prometheus::*;
