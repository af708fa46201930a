//! picoquery CLI — one-shot text analysis against a hosted inference API.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use picoquery::{ClientConfig, QueryClient};

#[derive(Parser, Debug)]
#[command(name = "picoquery", version, about = "Query a hosted text-inference model")]
struct Cli {
    /// Text to analyze.
    text: String,

    /// Model identifier, appended to the endpoint base.
    #[arg(short, long, default_value = "distilbert-base-uncased-finetuned-sst-2-english")]
    model: String,

    /// Bypass the response cache for this invocation.
    #[arg(long)]
    no_cache: bool,

    /// Skip the pre-flight connectivity check.
    #[arg(long)]
    no_offline_check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("loading configuration")?;
    if cli.no_cache {
        config.cache_enabled = false;
    }
    if cli.no_offline_check {
        config.offline_fallback_enabled = false;
    }

    let client = QueryClient::with_defaults(config).context("building client")?;
    let value = client.query(&cli.text, &cli.model).await?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
