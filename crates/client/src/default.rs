//! Optional process-wide default client.
//!
//! Every operation in this crate takes its client explicitly. Applications
//! that want a single shared connection can register one here and fetch it
//! where threading a handle through is inconvenient.

use std::sync::{Arc, RwLock};

use crate::client::ClioClient;
use crate::error::ConfigError;

static DEFAULT_CLIENT: RwLock<Option<Arc<ClioClient>>> = RwLock::new(None);

/// Register `client` as the default, returning the one it replaces.
pub fn set_default_client(client: Arc<ClioClient>) -> Option<Arc<ClioClient>> {
    tracing::debug!(client = %client, "Setting default clio client");
    let mut slot = DEFAULT_CLIENT.write().unwrap_or_else(|e| e.into_inner());
    slot.replace(client)
}

/// The registered default client.
pub fn default_client() -> Result<Arc<ClioClient>, ConfigError> {
    DEFAULT_CLIENT
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or(ConfigError::NoDefaultClient)
}

/// Remove the default client, returning it if one was set.
pub fn clear_default_client() -> Option<Arc<ClioClient>> {
    DEFAULT_CLIENT
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .take()
}
