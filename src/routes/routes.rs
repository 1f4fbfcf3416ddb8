//! Maps each parsed subcommand onto its handler.
//!
//! ## Commands
//! - **Endpoint-level**
//!   - `buckets`: list bucket names
//!
//! - **Object-level** (need an attached bucket)
//!   - `search`: substring search over the cached listing
//!   - `delete`: delete matches, confirming each unless forced
//!   - `upload`: upload a FASTQ file or tree plus its tag map
//!   - `download`: download matches, or an exact key with `--fast`
//!   - `read`: print a small object's text

use crate::{
    config::Command,
    handlers::{
        commands,
        prompt::{AssumeYes, Confirm, Prompt},
    },
    services::manager::HcpManager,
};
use anyhow::{Context, Result, bail};
use chrono::Local;
use std::{io, path::PathBuf};

/// Run `command` against `manager`.
pub async fn dispatch(manager: &mut HcpManager, command: Command) -> Result<()> {
    let mut out = io::stdout();

    match command {
        Command::Buckets => {
            commands::buckets(manager, &mut out).await?;
        }

        Command::Search {
            query,
            file,
            json,
            reload,
        } => {
            let queries = commands::collect_queries(query, file.as_deref())
                .context("reading search queries")?;
            let hits =
                commands::search(manager.bucket()?, &queries, json, reload, &mut out).await?;
            tracing::debug!("{} hit(s) for {} query(ies)", hits, queries.len());
        }

        Command::Delete { query, force } => {
            let mut confirm: Box<dyn Confirm> = if force {
                Box::new(AssumeYes)
            } else {
                Box::new(Prompt::stdio())
            };
            let deleted = commands::delete(manager.bucket()?, &query, confirm.as_mut()).await?;
            tracing::info!("{} object(s) deleted", deleted);
        }

        Command::Upload {
            input,
            destination,
            tag,
            meta,
        } => {
            let meta_path = match meta {
                Some(path) => path,
                None => default_meta_path()?,
            };
            let summary = commands::upload(
                manager.bucket()?,
                &input,
                destination.as_deref(),
                &tag,
                &meta_path,
            )
            .await?;
            tracing::info!(
                "{} uploaded, {} skipped, {} failed",
                summary.uploaded,
                summary.skipped,
                summary.failed
            );
            if summary.failed > 0 {
                bail!(
                    "{} of {} file(s) failed to upload",
                    summary.failed,
                    summary.failed + summary.uploaded
                );
            }
        }

        Command::Download {
            destination,
            query,
            fast,
            force,
        } => {
            let saved = commands::download(
                manager.bucket()?,
                &destination,
                &query,
                fast,
                force,
                &mut Prompt::stdio(),
            )
            .await?;
            tracing::info!("{} file(s) downloaded", saved.len());
        }

        Command::Read { key } => {
            commands::read(manager.bucket()?, &key, &mut out).await?;
        }
    }

    Ok(())
}

/// `meta-<yymmdd-HHMMSS>.json` in the working directory.
fn default_meta_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("resolving working directory")?;
    Ok(cwd.join(format!("meta-{}.json", Local::now().format("%y%m%d-%H%M%S"))))
}
