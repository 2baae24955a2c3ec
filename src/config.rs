use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr};

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/meta/libression.db";

/// Which store the gateway talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite metadata plus sharded payloads on local disk.
    Local,
    /// Any S3-compatible endpoint.
    S3,
    /// Process memory; everything is lost on exit.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| anyhow::anyhow!("unknown backend `{s}`"))
    }
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct StoreConfig {
    /// Overrides the SDK's default endpoint (e.g. a MinIO URL).
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Used for client signing and at bucket-creation time.
    pub region: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub store: StoreConfig,
    pub source_bucket: String,
    pub cache_bucket: String,
    pub cache_suffix: String,
    pub max_concurrency: usize,
    pub list_page_size: usize,
    pub thumbnail_height: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Browse an S3 bucket as a photo library with cached thumbnails")]
pub struct Args {
    /// Host to bind to (overrides LIBRESSION_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LIBRESSION_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Backing store (overrides LIBRESSION_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Payload directory for the local backend (overrides LIBRESSION_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database for the local backend (overrides LIBRESSION_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3 endpoint URL (overrides LIBRESSION_S3_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// S3 access key (overrides LIBRESSION_S3_ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// S3 secret key (overrides LIBRESSION_S3_SECRET_KEY)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Region (overrides LIBRESSION_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Bucket holding the originals (overrides LIBRESSION_SOURCE_BUCKET)
    #[arg(long)]
    pub source_bucket: Option<String>,

    /// Bucket holding thumbnails (overrides LIBRESSION_CACHE_BUCKET)
    #[arg(long)]
    pub cache_bucket: Option<String>,

    /// Suffix appended to a source key to name its thumbnail (overrides LIBRESSION_CACHE_SUFFIX)
    #[arg(long)]
    pub cache_suffix: Option<String>,

    /// Maximum thumbnails generated at once (overrides LIBRESSION_MAX_CONCURRENCY)
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Keys requested per listing page (overrides LIBRESSION_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Thumbnail height in pixels (overrides LIBRESSION_THUMBNAIL_HEIGHT)
    #[arg(long)]
    pub thumbnail_height: Option<u32>,

    /// Apply the local backend schema and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name`, falling back to `default` when unset.
fn env_or(name: &str, default: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default.to_string()),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Read and parse `name`, falling back to `default` when unset.
fn env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let env_backend = env_or("LIBRESSION_BACKEND", "local")?
            .parse::<BackendKind>()
            .context("parsing LIBRESSION_BACKEND")?;
        let env_endpoint = match env::var("LIBRESSION_S3_ENDPOINT") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value),
            Err(env::VarError::NotPresent) => Some("http://127.0.0.1:9000".into()),
            Err(err) => return Err(err).context("reading LIBRESSION_S3_ENDPOINT"),
        };

        let store = StoreConfig {
            endpoint: args.endpoint.or(env_endpoint),
            access_key: args
                .access_key
                .map_or_else(|| env_or("LIBRESSION_S3_ACCESS_KEY", "minioadmin"), Ok)?,
            secret_key: args
                .secret_key
                .map_or_else(|| env_or("LIBRESSION_S3_SECRET_KEY", "minioadmin"), Ok)?,
            region: args
                .region
                .map_or_else(|| env_or("LIBRESSION_REGION", "us-east-2"), Ok)?,
        };

        let cfg = Self {
            host: args
                .host
                .map_or_else(|| env_or("LIBRESSION_HOST", "0.0.0.0"), Ok)?,
            port: args
                .port
                .map_or_else(|| env_parse_or("LIBRESSION_PORT", 8000), Ok)?,
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args
                .storage_dir
                .map_or_else(|| env_or("LIBRESSION_STORAGE_DIR", "./data/objects"), Ok)?,
            database_url: args.database_url.map_or_else(
                || env_or("LIBRESSION_DATABASE_URL", DEFAULT_DATABASE_URL),
                Ok,
            )?,
            store,
            source_bucket: args
                .source_bucket
                .map_or_else(|| env_or("LIBRESSION_SOURCE_BUCKET", "libression-data"), Ok)?,
            cache_bucket: args
                .cache_bucket
                .map_or_else(|| env_or("LIBRESSION_CACHE_BUCKET", "libression-cache"), Ok)?,
            cache_suffix: args
                .cache_suffix
                .map_or_else(|| env_or("LIBRESSION_CACHE_SUFFIX", "cache.jpg"), Ok)?,
            max_concurrency: args
                .max_concurrency
                .map_or_else(|| env_parse_or("LIBRESSION_MAX_CONCURRENCY", 8), Ok)?,
            list_page_size: args
                .list_page_size
                .map_or_else(|| env_parse_or("LIBRESSION_LIST_PAGE_SIZE", 1000), Ok)?,
            thumbnail_height: args
                .thumbnail_height
                .map_or_else(|| env_parse_or("LIBRESSION_THUMBNAIL_HEIGHT", 200), Ok)?,
        };

        if cfg.source_bucket == cfg.cache_bucket {
            anyhow::bail!(
                "source and cache bucket must differ (both are `{}`)",
                cfg.source_bucket
            );
        }
        if cfg.cache_suffix.is_empty() {
            anyhow::bail!("cache suffix must not be empty");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
