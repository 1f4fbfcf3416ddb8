use crate::{models::multipart::TransferConfig, services::backend::S3Endpoint};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub endpoint: S3Endpoint,
    pub bucket: Option<String>,
    pub transfer: TransferConfig,
    pub debug: bool,
    pub quiet: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("endpoint", &self.endpoint.url)
            .field("region", &self.endpoint.region)
            .field("bucket", &self.bucket)
            .field("transfer", &self.transfer)
            .field("debug", &self.debug)
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Search, upload, download and delete files on an HCP bucket")]
pub struct Args {
    /// Endpoint URL (overrides HCP_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Access key id (overrides HCP_ACCESS_KEY_ID)
    #[arg(long, global = true)]
    pub access_key_id: Option<String>,

    /// Secret access key (overrides HCP_SECRET_ACCESS_KEY)
    #[arg(long, global = true)]
    pub secret_access_key: Option<String>,

    /// Signing region (overrides HCP_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Bucket to attach (overrides HCP_BUCKET)
    #[arg(short, long, global = true)]
    pub bucket: Option<String>,

    /// Bytes above which multipart upload is used (overrides HCP_SIZE_THRESHOLD)
    #[arg(long, global = true)]
    pub size_threshold: Option<u64>,

    /// Parallel part transfers (overrides HCP_MAX_CONCURRENCY)
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,

    /// Bytes per multipart part (overrides HCP_CHUNK_SIZE)
    #[arg(long, global = true)]
    pub chunk_size: Option<u64>,

    /// Log storage-client internals. Very verbose.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Do not draw transfer progress lines
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List all file hits for a given query
    Search {
        /// Specific search query
        #[arg(short, long)]
        query: Option<String>,

        /// File containing one query per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print hits as JSON lines
        #[arg(long)]
        json: bool,

        /// Relist the bucket instead of using the cached listing
        #[arg(long)]
        reload: bool,
    },

    /// Delete files matching a query
    Delete {
        /// Specific search query
        #[arg(short, long)]
        query: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Upload fastq files / fastq folder structure
    Upload {
        /// File or directory to upload
        #[arg(short, long = "input")]
        input: PathBuf,

        /// Target directory to put files on the bucket
        #[arg(short, long)]
        destination: Option<String>,

        /// Tag for downstream pipeline execution
        #[arg(short, long, default_value = "None")]
        tag: String,

        /// Local path for the generated metadata file
        #[arg(short, long)]
        meta: Option<PathBuf>,
    },

    /// Download files using a given query
    Download {
        /// Destination file or directory
        #[arg(short, long)]
        destination: PathBuf,

        /// Specific search query
        #[arg(short, long)]
        query: String,

        /// Treat the query as an exact key and skip searching
        #[arg(short, long)]
        fast: bool,

        /// Overwrite existing local files
        #[arg(long)]
        force: bool,
    },

    /// List buckets visible at the endpoint
    Buckets,

    /// Print the content of a small text object
    Read {
        /// Exact object key
        #[arg(short, long)]
        key: String,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let command = args.command.clone();
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, command))
    }

    /// Merge `args` over values from `lookup`, then over built-in defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = TransferConfig::default();

        let Some(url) = args.endpoint.or_else(|| lookup("HCP_ENDPOINT")) else {
            bail!("no endpoint configured; pass --endpoint or set HCP_ENDPOINT");
        };
        let access_key_id = args
            .access_key_id
            .or_else(|| lookup("HCP_ACCESS_KEY_ID"))
            .context("no access key id; pass --access-key-id or set HCP_ACCESS_KEY_ID")?;
        let secret_access_key = args
            .secret_access_key
            .or_else(|| lookup("HCP_SECRET_ACCESS_KEY"))
            .context("no secret access key; pass --secret-access-key or set HCP_SECRET_ACCESS_KEY")?;
        let region = args
            .region
            .or_else(|| lookup("HCP_REGION"))
            .unwrap_or_else(|| "us-east-1".into());

        let transfer = TransferConfig {
            size_threshold: match args.size_threshold {
                Some(v) => v,
                None => parse_env(&lookup, "HCP_SIZE_THRESHOLD")?.unwrap_or(defaults.size_threshold),
            },
            max_concurrency: match args.max_concurrency {
                Some(v) => v,
                None => parse_env(&lookup, "HCP_MAX_CONCURRENCY")?.unwrap_or(defaults.max_concurrency),
            },
            chunk_size: match args.chunk_size {
                Some(v) => v,
                None => parse_env(&lookup, "HCP_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size),
            },
        };
        if transfer.max_concurrency == 0 {
            bail!("max concurrency must be at least 1");
        }

        Ok(Self {
            endpoint: S3Endpoint {
                url,
                region,
                access_key_id,
                secret_access_key,
            },
            bucket: args.bucket.or_else(|| lookup("HCP_BUCKET")),
            transfer,
            debug: args.debug,
            quiet: args.quiet,
        })
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["hcp-interface"];
        argv.extend_from_slice(extra);
        argv.push("buckets");
        Args::parse_from(argv)
    }

    const CREDS: [(&str, &str); 3] = [
        ("HCP_ENDPOINT", "https://hcp.example.org"),
        ("HCP_ACCESS_KEY_ID", "key"),
        ("HCP_SECRET_ACCESS_KEY", "secret"),
    ];

    #[test]
    fn environment_supplies_connection_and_defaults_fill_tunables() {
        let cfg = AppConfig::resolve(args(&[]), env_of(&CREDS)).unwrap();

        assert_eq!(cfg.endpoint.url, "https://hcp.example.org");
        assert_eq!(cfg.endpoint.region, "us-east-1");
        assert_eq!(cfg.bucket, None);
        assert_eq!(cfg.transfer, TransferConfig::default());
    }

    #[test]
    fn flags_override_environment() {
        let mut env = CREDS.to_vec();
        env.push(("HCP_BUCKET", "from-env"));
        env.push(("HCP_CHUNK_SIZE", "1000"));

        let cfg = AppConfig::resolve(
            args(&["--bucket", "from-flag", "--chunk-size", "2000"]),
            env_of(&env),
        )
        .unwrap();

        assert_eq!(cfg.bucket.as_deref(), Some("from-flag"));
        assert_eq!(cfg.transfer.chunk_size, 2000);
    }

    #[test]
    fn tunables_are_read_from_environment() {
        let mut env = CREDS.to_vec();
        env.push(("HCP_SIZE_THRESHOLD", "12345"));
        env.push(("HCP_MAX_CONCURRENCY", "3"));

        let cfg = AppConfig::resolve(args(&[]), env_of(&env)).unwrap();

        assert_eq!(cfg.transfer.size_threshold, 12345);
        assert_eq!(cfg.transfer.max_concurrency, 3);
    }

    #[test]
    fn malformed_tunable_is_rejected() {
        let mut env = CREDS.to_vec();
        env.push(("HCP_MAX_CONCURRENCY", "many"));

        let err = AppConfig::resolve(args(&[]), env_of(&env)).unwrap_err();
        assert!(err.to_string().contains("HCP_MAX_CONCURRENCY"));
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let err = AppConfig::resolve(args(&[]), env_of(&CREDS[1..])).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = AppConfig::resolve(args(&[]), env_of(&CREDS)).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("secret"));
    }
}
