//! Client for the Clio neuron-annotation service.
//!
//! Provides authenticated access to the Clio REST API and its backing DVID
//! store, cached schema and annotated-body lookups, existence checks, and
//! the conflict-aware [`set_annotations`] upload built on `clio-core`.

pub mod annotate;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod default;
pub mod error;
pub mod existence;
pub mod fetch;
pub mod retry;
pub mod upload;
pub mod url;

mod transport;

#[cfg(test)]
mod testing;

pub use annotate::{set_annotations, SetAnnotationsOptions, UploadReport};
pub use backend::AnnotationBackend;
pub use client::ClioClient;
pub use config::{ClientConfig, ClioStore};
pub use default::{clear_default_client, default_client, set_default_client};
pub use error::{ClioError, ClioResult};
pub use existence::exists;
pub use fetch::AnnotationQuery;
pub use upload::{upload, UploadSummary};
