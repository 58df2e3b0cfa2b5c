//! Error taxonomy for client operations.

use clio_core::error::{SchemaError, ValidationError};
use clio_core::types::BodyId;

/// Bad client configuration: server URL, dataset, or token input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Plain http was given without `allow_insecure_http`.
    #[error("Server must be https, not http: {0}")]
    InsecureServer(String),

    /// The server URL has a scheme other than http or https.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The server URL could not be parsed.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Credentials are neither a bare token nor a credential document.
    #[error("Did not understand token. Provide the entire JSON document or only the complete token string")]
    UnparseableToken,

    /// An environment variable holds an unusable value.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    /// The store lists no datasets at all.
    #[error("The clio server {0} has no datasets")]
    NoDatasets(String),

    /// The requested dataset is not on the store.
    #[error("Dataset '{dataset}' does not exist on the clio server. Available datasets: {available:?}")]
    UnknownDataset {
        dataset: String,
        available: Vec<String>,
    },

    /// No dataset was named and the store has more than one.
    #[error("Server has several datasets, choose one of: {0:?}")]
    AmbiguousDataset(Vec<String>),

    /// [`crate::default_client`] was called before a client was set.
    #[error("No default client has been set")]
    NoDefaultClient,
}

/// Token acquisition, decoding or refresh failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identity-token command or prompt produced nothing usable.
    #[error("Unable to obtain identity token: {0}")]
    IdentityToken(String),

    /// The token endpoint refused the identity token.
    #[error("Unable to retrieve long-lived FlyEM token ({status}): {body}")]
    Exchange { status: u16, body: String },

    /// The token endpoint could not be reached.
    #[error("Token exchange request failed: {0}")]
    ExchangeRequest(#[source] reqwest::Error),

    /// A refresh was needed but no identity source is configured.
    #[error("Token has expired and no identity source is configured to refresh it")]
    RefreshUnavailable,

    /// The token's expiry claim could not be decoded.
    #[error("Token is not a valid JWT: {0}")]
    Undecodable(String),

    /// Reading or writing the token cache file failed.
    #[error("Token cache {path} could not be accessed: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The store rejected even the freshly issued token.
    #[error("Token was rejected by the server after refresh")]
    Rejected,
}

/// The backend answered badly or could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (connection, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Clio API error ({status}) for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// A success response whose body did not have the expected shape.
    #[error("Unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// Dataset metadata lacks a key the client depends on.
    #[error("Dataset '{dataset}' metadata has no {key}")]
    MissingMetadata { dataset: String, key: &'static str },
}

impl BackendError {
    /// HTTP status code for [`BackendError::Status`] errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A chunk failed mid-upload. Earlier chunks remain applied remotely.
#[derive(Debug, thiserror::Error)]
#[error(
    "Upload chunk {chunk_index} of {chunks} failed after {records_uploaded}/{total} records were applied: {source}"
)]
pub struct UploadError {
    pub chunk_index: usize,
    pub chunks: usize,
    pub records_uploaded: usize,
    pub total: usize,
    /// Body IDs not applied: the failed chunk and everything after it.
    pub unsent: Vec<BodyId>,
    #[source]
    pub source: Box<ClioError>,
}

impl UploadError {
    /// Offset into the write-set at which a resumed upload should start.
    pub fn resume_offset(&self) -> usize {
        self.records_uploaded
    }
}

/// Top-level error for every client operation.
#[derive(Debug, thiserror::Error)]
pub enum ClioError {
    /// Configuration or dataset selection failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No usable token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Input did not match the annotation schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Input body IDs or options were rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A request to the store failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An upload chunk failed; earlier chunks stay applied.
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl From<reqwest::Error> for ClioError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(BackendError::Request(err))
    }
}

/// Convenience alias for client results.
pub type ClioResult<T> = Result<T, ClioError>;
