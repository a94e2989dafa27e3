//! LFS Gateway - batch transfer server for large objects

use clap::Parser;
use lfs_server::{run_server_with_shutdown, shutdown_signal, GatewayConfig};
use lfs_store::{S3Config, StorageConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lfs-gateway")]
#[command(about = "Batch transfer gateway for content-addressed large objects")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "LFS_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "LFS_PORT")]
    port: u16,

    /// Public base URL used in action links
    #[arg(long, default_value = "http://localhost:3000/", env = "LFS_APP_URL")]
    app_url: String,

    /// Storage backend: memory, local, minio or s3
    #[arg(long, default_value = "local", env = "LFS_STORAGE")]
    storage: String,

    /// Root directory of the local backend
    #[arg(long, default_value = "data/lfs", env = "LFS_LOCAL_PATH")]
    local_path: PathBuf,

    /// S3 endpoint (e.g. http://localhost:9000 for MinIO)
    #[arg(long, env = "LFS_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// S3 bucket
    #[arg(long, default_value = "lfs", env = "LFS_S3_BUCKET")]
    s3_bucket: String,

    /// S3 region
    #[arg(long, default_value = "us-east-1", env = "LFS_S3_REGION")]
    s3_region: String,

    /// S3 access key id
    #[arg(long, default_value = "", env = "LFS_S3_ACCESS_KEY_ID")]
    s3_access_key_id: String,

    /// S3 secret access key
    #[arg(long, default_value = "", env = "LFS_S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    s3_secret_access_key: String,

    /// Key prefix inside the bucket
    #[arg(long, default_value = "lfs/", env = "LFS_S3_BASE_PATH")]
    s3_base_path: String,

    /// Hand out presigned URLs for direct downloads
    #[arg(long, env = "LFS_SERVE_DIRECT")]
    serve_direct: bool,

    /// Host replacing the endpoint host in presigned URLs
    #[arg(long, env = "LFS_PUBLIC_DOMAIN")]
    public_domain: Option<String>,

    /// JWT secret for capability tokens
    #[arg(long, env = "LFS_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Disable authentication (for development only!)
    #[arg(long, env = "LFS_NO_AUTH")]
    no_auth: bool,

    /// Largest accepted object in bytes (0 = unlimited)
    #[arg(long, default_value = "0", env = "LFS_MAX_FILE_SIZE")]
    max_file_size: i64,

    /// Requests per second per caller (0 = unlimited)
    #[arg(long, default_value = "100", env = "LFS_RATE_LIMIT_RPS")]
    rate_limit_rps: u32,

    /// Multipart part size in bytes
    #[arg(long, env = "LFS_MULTIPART_CHUNK_SIZE")]
    multipart_chunk_size: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, env = "LFS_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LFS_JSON_LOGS")]
    json_logs: bool,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        let s3 = matches!(self.storage.as_str(), "minio" | "s3").then(|| S3Config {
            endpoint: self.s3_endpoint.clone(),
            bucket: self.s3_bucket.clone(),
            region: self.s3_region.clone(),
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
            base_path: self.s3_base_path.clone(),
            serve_direct: self.serve_direct,
            public_domain: self.public_domain.clone(),
            ..Default::default()
        });
        StorageConfig {
            kind: self.storage.clone(),
            local_path: Some(self.local_path.clone()),
            s3,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_filter = if args.debug {
        "debug,lfs_server=trace"
    } else {
        "info,lfs_server=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(host = %args.host, port = args.port, storage = %args.storage, "starting LFS gateway");

    if args.no_auth {
        tracing::warn!("authentication is DISABLED - for development only!");
    }

    let mut config = GatewayConfig {
        host: args.host.clone(),
        port: args.port,
        app_url: args.app_url.clone(),
        auth_enabled: !args.no_auth,
        jwt_secret: args.jwt_secret.clone(),
        max_file_size: args.max_file_size,
        rate_limit_rps: args.rate_limit_rps,
        storage: args.storage_config(),
        ..Default::default()
    };
    if let Some(chunk_size) = args.multipart_chunk_size {
        config.multipart_chunk_size = chunk_size;
    }
    config.validate()?;

    run_server_with_shutdown(config, shutdown_signal()).await
}
