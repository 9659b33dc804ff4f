use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use course_ledger::{EnrollmentLedger, api::router, config::Config, store, utils::init_log};
use tracing::info;

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    database: Option<PathBuf>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let _guard = init_log(config.log_dir.clone())?;

    let database = store::open(&config).await?;
    let ledger = Arc::new(EnrollmentLedger::from_config(database, &config));
    let app = router(ledger);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "ledger api listening on http://{}, OpenAPI document at /api-docs/openapi.json",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;
    Ok(())
}
