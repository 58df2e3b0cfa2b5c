//! HTTP client for a Clio store and its backing DVID server.
//!
//! Wraps the Clio REST API (datasets, roles, annotation queries and
//! writes) and the DVID endpoints behind a dataset (annotation schema,
//! field list, annotated keys, label sizes) using [`reqwest`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use clio_core::schema::AnnotationSchema;
use clio_core::types::{AnnotationRecord, BodyId, FieldMap};
use reqwest::Url;
use serde_json::{Map, Value};

use crate::auth::TokenManager;
use crate::backend::AnnotationBackend;
use crate::cache::{AnnotationCaches, SchemaBundle};
use crate::config::{normalize_server_url, ClientConfig};
use crate::error::{BackendError, ClioResult, ConfigError};
use crate::fetch::AnnotationQuery;
use crate::retry::RetryConfig;
use crate::transport::Transport;
use crate::url::make_url;

const ANNOTATIONS_PATH: &str = "v2/json-annotations";
const ANNOTATION_INSTANCE: &str = "segmentation_annotations";

/// A connection to one dataset on a Clio store.
pub struct ClioClient {
    transport: Transport,
    server: String,
    dataset: String,
    verify_tls: bool,
    dvid_node: String,
    segmentation_instance: String,
    caches: AnnotationCaches,
}

impl ClioClient {
    /// Connect to the configured store and select a dataset.
    ///
    /// Normalizes the server URL, resolves a token, and fetches the dataset
    /// list. Without a configured dataset, a server offering exactly one
    /// dataset uses it.
    pub async fn connect(config: ClientConfig) -> ClioResult<Self> {
        let server = normalize_server_url(&config.server, config.allow_insecure_http)?;

        if !config.verify_tls {
            tracing::warn!(server = %server, "TLS certificate verification is disabled");
        }
        let http = config.http_client()?;

        let tokens = TokenManager::resolve(&config, &server, &http).await?;
        let transport = Transport::new(
            http,
            tokens,
            &config.app_id,
            RetryConfig::with_max_retries(config.read_retries),
        );

        let mut client = Self {
            transport,
            server,
            dataset: String::new(),
            verify_tls: config.verify_tls,
            dvid_node: config.dvid_node,
            segmentation_instance: config.segmentation_instance,
            caches: AnnotationCaches::new(),
        };

        let available: Vec<String> = client.fetch_datasets().await?.keys().cloned().collect();
        client.dataset = select_dataset(&client.server, config.dataset.as_deref(), available)?;
        tracing::info!(server = %client.server, dataset = %client.dataset, "Connected to clio");

        Ok(client)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Forget the cached schema and annotated-body set.
    pub async fn invalidate_caches(&self) {
        self.caches.invalidate().await;
    }

    fn url<S: AsRef<str>>(&self, segments: &[S], query: &[(&str, &str)]) -> ClioResult<Url> {
        Ok(make_url(&self.server, segments, query)?)
    }

    // ---- Clio REST API ----

    /// Basic information about every dataset on the server.
    pub async fn fetch_datasets(&self) -> ClioResult<Map<String, Value>> {
        self.transport
            .get_json(self.url(&["v2/datasets"], &[])?)
            .await
    }

    /// The caller's profile, access level and groups.
    pub async fn fetch_roles(&self) -> ClioResult<Value> {
        self.transport.get_json(self.url(&["v2/roles"], &[])?).await
    }

    /// Metadata entry of the selected dataset.
    pub async fn dataset_metadata(&self) -> ClioResult<Value> {
        let mut datasets = self.fetch_datasets().await?;
        datasets.remove(&self.dataset).ok_or_else(|| {
            BackendError::MissingMetadata {
                dataset: self.dataset.clone(),
                key: "dataset entry",
            }
            .into()
        })
    }

    /// The dataset's current head version tag.
    pub async fn head_version(&self) -> ClioResult<String> {
        let meta = self.dataset_metadata().await?;
        ["tag", "uuid"]
            .iter()
            .find_map(|key| meta.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::MissingMetadata {
                    dataset: self.dataset.clone(),
                    key: "tag",
                }
                .into()
            })
    }

    /// Neuron annotations matching `query`.
    ///
    /// An unfiltered query reads the full table from `neurons/all`; anything
    /// else goes through `neurons/query`.
    pub async fn fetch_annotations(&self, query: &AnnotationQuery) -> ClioResult<Vec<FieldMap>> {
        let mut params = Vec::new();
        if let Some(version) = &query.version {
            params.push(("version", version.as_str()));
        }

        if query.is_unfiltered() {
            if let Some(show) = &query.show {
                params.push(("show", show.as_str()));
            }
            let url = self.url(&[ANNOTATIONS_PATH, self.dataset.as_str(), "neurons/all"], &params)?;
            return self.transport.get_json(url).await;
        }

        let url = self.url(&[ANNOTATIONS_PATH, self.dataset.as_str(), "neurons/query"], &params)?;
        self.transport.query_json(url, &query.to_body()).await
    }

    /// Point annotations made by `group`, or by the caller when `None`.
    ///
    /// Requires the matching role; see [`ClioClient::fetch_roles`].
    pub async fn fetch_group_annotations(&self, group: Option<&str>) -> ClioResult<Vec<Value>> {
        let params: Vec<(&str, &str)> = group.map(|g| ("groups", g)).into_iter().collect();
        let url = self.url(&["v2/annotations", self.dataset.as_str()], &params)?;
        self.transport.get_json(url).await
    }

    /// Write one batch of records at `version`.
    pub async fn post_annotations(
        &self,
        records: &[AnnotationRecord],
        version: &str,
    ) -> ClioResult<()> {
        let url = self.url(
            &[ANNOTATIONS_PATH, self.dataset.as_str(), "neurons"],
            &[("version", version)],
        )?;
        let body = Value::Array(records.iter().map(AnnotationRecord::to_json).collect());
        self.transport.post_write(url, &body).await
    }

    // ---- DVID store ----

    /// Base URL of the DVID server backing the dataset.
    pub async fn store_url(&self) -> ClioResult<String> {
        let meta = self.dataset_metadata().await?;
        meta.get("dvid")
            .and_then(Value::as_str)
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                BackendError::MissingMetadata {
                    dataset: self.dataset.clone(),
                    key: "dvid",
                }
                .into()
            })
    }

    async fn dvid_url(&self, instance: &str, endpoint: &str) -> ClioResult<Url> {
        let store = self.store_url().await?;
        Ok(make_url(
            &store,
            &["api/node", self.dvid_node.as_str(), instance, endpoint],
            &[],
        )?)
    }

    /// JSON Schema describing required and typed annotation fields.
    pub async fn fetch_schema(&self) -> ClioResult<AnnotationSchema> {
        let url = self.dvid_url(ANNOTATION_INSTANCE, "json_schema").await?;
        let doc: Value = self.transport.get_json(url).await?;
        Ok(AnnotationSchema::from_json(doc)?)
    }

    /// Every field name the annotation store knows.
    pub async fn fetch_fields(&self) -> ClioResult<BTreeSet<String>> {
        let url = self.dvid_url(ANNOTATION_INSTANCE, "fields").await?;
        let fields: Vec<String> = self.transport.get_json(url).await?;
        Ok(fields.into_iter().collect())
    }
}

#[async_trait]
impl AnnotationBackend for ClioClient {
    fn caches(&self) -> &AnnotationCaches {
        &self.caches
    }

    async fn fetch_schema_bundle(&self) -> ClioResult<SchemaBundle> {
        let schema = self.fetch_schema().await?;
        let fields = self.fetch_fields().await?;
        tracing::debug!(
            dataset = %self.dataset,
            typed = schema.properties.len(),
            fields = fields.len(),
            "Fetched annotation schema",
        );
        Ok(SchemaBundle { schema, fields })
    }

    async fn fetch_annotated_ids(&self) -> ClioResult<HashSet<BodyId>> {
        let url = self.dvid_url(ANNOTATION_INSTANCE, "keys").await?;
        let keys: Vec<String> = self.transport.get_json(url).await?;
        let ids: HashSet<BodyId> = keys.iter().filter_map(|k| k.parse().ok()).collect();
        if ids.len() != keys.len() {
            tracing::debug!(
                skipped = keys.len() - ids.len(),
                "Ignored non-numeric annotation keys"
            );
        }
        Ok(ids)
    }

    async fn query_existence(&self, ids: &[BodyId]) -> ClioResult<HashMap<BodyId, bool>> {
        let url = self.dvid_url(&self.segmentation_instance, "sizes").await?;
        let sizes: Vec<u64> = self
            .transport
            .get_json_with_body(url.clone(), &Value::from(ids.to_vec()))
            .await?;
        if sizes.len() != ids.len() {
            return Err(BackendError::Decode {
                url: url.to_string(),
                reason: format!("expected {} sizes, got {}", ids.len(), sizes.len()),
            }
            .into());
        }
        Ok(ids
            .iter()
            .zip(sizes)
            .map(|(id, size)| (*id, size > 0))
            .collect())
    }

    async fn fetch_existing_annotations(&self, ids: &[BodyId]) -> ClioResult<Vec<FieldMap>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_annotations(&AnnotationQuery::for_bodies(ids.iter().copied()))
            .await
    }

    async fn head_version(&self) -> ClioResult<String> {
        ClioClient::head_version(self).await
    }

    async fn post_annotations(&self, records: &[AnnotationRecord], version: &str) -> ClioResult<()> {
        ClioClient::post_annotations(self, records, version).await
    }
}

impl fmt::Debug for ClioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClioClient")
            .field("server", &self.server)
            .field("dataset", &self.dataset)
            .field("verify_tls", &self.verify_tls)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ClioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client(\"{}\", \"{}\"", self.server, self.dataset)?;
        if !self.verify_tls {
            write!(f, ", verify=False")?;
        }
        write!(f, ")")
    }
}

/// Pick the dataset to work against from the server's list.
pub fn select_dataset(
    server: &str,
    requested: Option<&str>,
    available: Vec<String>,
) -> Result<String, ConfigError> {
    if available.is_empty() {
        return Err(ConfigError::NoDatasets(server.to_string()));
    }
    match requested {
        Some(dataset) if available.iter().any(|d| d == dataset) => Ok(dataset.to_string()),
        Some(dataset) => Err(ConfigError::UnknownDataset {
            dataset: dataset.to_string(),
            available,
        }),
        None if available.len() == 1 => {
            let dataset = available.into_iter().next().unwrap_or_default();
            tracing::info!(dataset = %dataset, "Using the server's only dataset");
            Ok(dataset)
        }
        None => Err(ConfigError::AmbiguousDataset(available)),
    }
}
