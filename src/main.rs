mod args;
mod audit;
mod clean;
mod columns;
mod common;
mod constants;
mod ingest;
mod locate;
mod reader;
mod schema;
mod snapshot;
mod table;
mod unify;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = args::Args::parse();

    match args.cmd {
        args::Command::Ingest(cmd) => ingest::run(cmd).await.map(|_| ()).context("ingest failed"),
        args::Command::Audit(cmd) => audit::run(cmd).map(|_| ()).context("audit failed"),
    }
}
