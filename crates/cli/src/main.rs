//! `clio` -- command-line access to a Clio annotation store.
//!
//! Lists datasets and roles, fetches neuron annotations, and pushes
//! annotation files through the conflict-aware upload.
//!
//! # Environment variables
//!
//! | Variable                       | Required | Default            | Description                        |
//! |--------------------------------|----------|--------------------|------------------------------------|
//! | `CLIO_SERVER`                  | no       | production store   | Store URL (`--server`)             |
//! | `CLIO_DATASET`                 | no       | only dataset       | Dataset name (`--dataset`)         |
//! | `CLIO_APPLICATION_CREDENTIALS` | no       | token cache        | Raw token or credential JSON       |
//! | `CLIO_TOKEN_CACHE`             | no       | `flyem_token.json` | Where issued tokens are cached     |
//! | `RUST_LOG`                     | no       | `clio=info`        | Log filter                         |

mod cli;
mod input;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clio=info,clio_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run().await
}
