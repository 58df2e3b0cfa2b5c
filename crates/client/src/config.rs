//! Client configuration, server URL normalization and token parsing.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::IdentitySource;
use crate::error::ConfigError;

/// Production Clio store.
pub const PROD_STORE_URL: &str = "https://clio-store-vwzoicitea-uk.a.run.app";
/// Test Clio store; safe target for trial uploads.
pub const TEST_STORE_URL: &str = "https://clio-test-7fdj77ed7q-uk.a.run.app";

/// Application identifier appended to every request as `app=...`.
pub const DEFAULT_APP_ID: &str = "clio-rs";
/// Token cache file, relative to the working directory.
pub const DEFAULT_TOKEN_CACHE_FILE: &str = "flyem_token.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READ_RETRIES: u32 = 2;
/// DVID node annotations are read from.
pub const DEFAULT_DVID_NODE: &str = ":master";
/// DVID labelmap instance queried for body existence.
pub const DEFAULT_SEGMENTATION_INSTANCE: &str = "segmentation";

/// Named Clio deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClioStore {
    Prod,
    Test,
}

impl ClioStore {
    pub fn url(&self) -> &'static str {
        match self {
            Self::Prod => PROD_STORE_URL,
            Self::Test => TEST_STORE_URL,
        }
    }
}

impl FromStr for ClioStore {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(Self::Prod),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidValue {
                var: "store",
                value: format!("\"{other}\" is not a valid store. Use \"prod\" or \"test\""),
            }),
        }
    }
}

/// Everything needed to connect a [`ClioClient`](crate::ClioClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    /// Dataset to work against; auto-selected when the server has only one.
    pub dataset: Option<String>,
    /// Explicit token (raw or the full JSON credential document).
    pub token: Option<String>,
    pub token_cache: PathBuf,
    /// Where to get an identity token when a long-lived one must be issued.
    pub identity: IdentitySource,
    pub app_id: String,
    pub request_timeout_secs: u64,
    /// Retries for failed connections on read requests. Writes never retry.
    pub read_retries: u32,
    pub verify_tls: bool,
    /// Permit `http://` servers, for a store hosted locally.
    pub allow_insecure_http: bool,
    pub dvid_node: String,
    pub segmentation_instance: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: PROD_STORE_URL.to_string(),
            dataset: None,
            token: None,
            token_cache: PathBuf::from(DEFAULT_TOKEN_CACHE_FILE),
            identity: IdentitySource::default(),
            app_id: DEFAULT_APP_ID.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            read_retries: DEFAULT_READ_RETRIES,
            verify_tls: true,
            allow_insecure_http: false,
            dvid_node: DEFAULT_DVID_NODE.to_string(),
            segmentation_instance: DEFAULT_SEGMENTATION_INSTANCE.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `CLIO_SERVER`                  | production store        |
    /// | `CLIO_DATASET`                 | --                      |
    /// | `CLIO_APPLICATION_CREDENTIALS` | --                      |
    /// | `CLIO_TOKEN_CACHE`             | `flyem_token.json`      |
    /// | `CLIO_APP_ID`                  | `clio-rs`               |
    /// | `CLIO_REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `CLIO_READ_RETRIES`            | `2`                     |
    /// | `CLIO_VERIFY_TLS`              | `true`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server = env_opt("CLIO_SERVER").unwrap_or(defaults.server);
        let dataset = env_opt("CLIO_DATASET");
        let token = env_opt("CLIO_APPLICATION_CREDENTIALS");
        let token_cache = env_opt("CLIO_TOKEN_CACHE")
            .map(PathBuf::from)
            .unwrap_or(defaults.token_cache);
        let app_id = env_opt("CLIO_APP_ID").unwrap_or(defaults.app_id);

        let request_timeout_secs =
            env_parse("CLIO_REQUEST_TIMEOUT_SECS")?.unwrap_or(defaults.request_timeout_secs);
        let read_retries = env_parse("CLIO_READ_RETRIES")?.unwrap_or(defaults.read_retries);
        let verify_tls = env_parse("CLIO_VERIFY_TLS")?.unwrap_or(defaults.verify_tls);

        Ok(Self {
            server,
            dataset,
            token,
            token_cache,
            app_id,
            request_timeout_secs,
            read_retries,
            verify_tls,
            ..defaults
        })
    }

    pub fn with_store(mut self, store: ClioStore) -> Self {
        self.server = store.url().to_string();
        self
    }

    /// HTTP client honouring the timeout and TLS settings.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
    }
}

fn env_opt(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    env_opt(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value })
        })
        .transpose()
}

/// Normalize a server address into an `https://` base URL without a
/// trailing slash. A bare host gets `https://` prepended.
pub fn normalize_server_url(server: &str, allow_insecure_http: bool) -> Result<String, ConfigError> {
    let server = server.trim();
    let mut url = match server.split_once("://") {
        None => format!("https://{server}"),
        Some(("https", _)) => server.to_string(),
        Some(("http", _)) if allow_insecure_http => server.to_string(),
        Some(("http", _)) => return Err(ConfigError::InsecureServer(server.to_string())),
        Some((protocol, _)) => return Err(ConfigError::UnknownProtocol(protocol.to_string())),
    };

    while url.ends_with('/') {
        url.pop();
    }
    Ok(url)
}

/// Extract the bearer token from either a raw token string or the JSON
/// credential document (`{"token": "..."}`), stripping stray quotes.
pub fn parse_token(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    let token = if raw.contains(':') {
        let doc: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| ConfigError::UnparseableToken)?;
        doc.get("token")
            .and_then(|t| t.as_str())
            .ok_or(ConfigError::UnparseableToken)?
            .to_string()
    } else {
        raw.to_string()
    };

    let token = token.replace('"', "");
    if token.is_empty() {
        return Err(ConfigError::UnparseableToken);
    }
    Ok(token)
}
