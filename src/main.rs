use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    manager::HcpManager,
    progress::{null_sink, stdout_sink},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + command ---
    let (cfg, command) = config::AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cfg.debug {
        for directive in ["aws_sdk_s3=debug", "aws_smithy_runtime=debug"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting hcp-interface with config: {:?}", cfg);

    // --- Initialize manager ---
    let sink = if cfg.quiet { null_sink() } else { stdout_sink() };
    let mut manager = HcpManager::new(&cfg, sink);
    if let Some(bucket) = cfg.bucket.as_deref() {
        manager.attach_bucket(bucket);
    }

    // --- Run command ---
    routes::routes::dispatch(&mut manager, command).await
}
