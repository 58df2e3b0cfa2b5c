//! Command definitions and dispatch.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use clio_client::auth::issue_token;
use clio_client::{set_annotations, AnnotationQuery, ClientConfig, ClioClient, ClioStore, SetAnnotationsOptions};
use clio_core::chunking::DEFAULT_CHUNK_SIZE;
use clio_core::merge::ProtectionPolicy;
use serde::Serialize;
use serde_json::Value;

use crate::input::{load_input, parse_filter};

#[derive(Parser)]
#[command(name = "clio")]
#[command(about = "Read and write neuron annotations in a Clio store")]
#[command(version)]
pub struct Cli {
    /// Store URL; overrides CLIO_SERVER
    #[arg(long, global = true)]
    server: Option<String>,

    /// Named store instead of a URL
    #[arg(long, global = true, conflicts_with = "server")]
    store: Option<ClioStore>,

    /// Dataset; optional when the store has only one
    #[arg(long, global = true)]
    dataset: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    no_verify_tls: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the datasets on the store
    Datasets,

    /// Show your roles and groups
    Roles,

    /// Fetch neuron annotations
    Fetch {
        /// Body IDs to fetch (repeatable)
        #[arg(short, long = "bodyid")]
        bodyids: Vec<i64>,
        /// Column filter as field=value (repeatable)
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,
        /// Fetch the whole annotation table
        #[arg(long, conflicts_with_all = ["bodyids", "filters"])]
        all: bool,
        /// Dataset version to read
        #[arg(long)]
        version: Option<String>,
        /// Field set to show on full-table fetches
        #[arg(long, requires = "all")]
        show: Option<String>,
    },

    /// Push an annotation file to the store
    Push {
        /// JSON file with records or a column table; `-` for stdin
        file: PathBuf,
        /// Existing values to keep: all, none, or comma-separated fields
        #[arg(long, default_value = "user")]
        protect: ProtectionPolicy,
        /// Write empty values as nulls, clearing stored values
        #[arg(long)]
        write_empty: bool,
        /// Records per upload request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Version to write at (default: the head version)
        #[arg(long)]
        version: Option<String>,
        /// Show the planned writes without sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Issue a long-lived token and store it in the token cache
    Token,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    match cli.command {
        Commands::Datasets => {
            let client = ClioClient::connect(config).await?;
            print_json(&client.fetch_datasets().await?)
        }
        Commands::Roles => {
            let client = ClioClient::connect(config).await?;
            print_json(&client.fetch_roles().await?)
        }
        Commands::Fetch {
            bodyids,
            filters,
            all,
            version,
            show,
        } => {
            if !all && bodyids.is_empty() && filters.is_empty() {
                bail!("give --bodyid or --filter, or --all for the whole table");
            }
            let client = ClioClient::connect(config).await?;

            let mut query = if bodyids.is_empty() {
                AnnotationQuery::new()
            } else {
                AnnotationQuery::for_bodies(bodyids)
            };
            for (field, value) in filters {
                query = query.filter(&field, value);
            }
            query.version = version;
            query.show = show;

            print_json(&client.fetch_annotations(&query).await?)
        }
        Commands::Push {
            file,
            protect,
            write_empty,
            chunk_size,
            version,
            dry_run,
        } => {
            let input = load_input(&file)?;
            let client = ClioClient::connect(config).await?;
            tracing::info!(client = %client, file = %file.display(), "Pushing annotations");

            let options = SetAnnotationsOptions {
                protect,
                write_empty_fields: write_empty,
                chunk_size,
                version,
                dry_run,
            };
            let report = set_annotations(&client, input, &options, |progress| {
                tracing::info!(
                    "Uploaded {}/{} records ({:.0}%)",
                    progress.uploaded,
                    progress.total,
                    progress.fraction() * 100.0
                );
            })
            .await?;
            print_json(&report)
        }
        Commands::Token => {
            issue_token(&config).await?;
            tracing::info!(path = %config.token_cache.display(), "Token written");
            Ok(())
        }
    }
}

impl Cli {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::from_env()?;
        if let Some(store) = self.store {
            config = config.with_store(store);
        }
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = Some(dataset.clone());
        }
        if self.no_verify_tls {
            config.verify_tls = false;
        }
        Ok(config)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
