//! Adapters between the operator core and the Kubernetes API

mod backup_client;
mod secrets;

pub use backup_client::*;
pub use secrets::*;
