//! HTTP stem separation service.
//!
//! Usage:
//!   stem-splitter-server --bind 0.0.0.0:5000 --workspace-root /tmp/stem-splitter
//!
//! Every flag can also be set through its `STEM_SPLITTER_*` environment variable.

use clap::Parser;
use std::path::PathBuf;
use stem_splitter::{
    api::{router, AppState},
    config::ServiceConfig,
    ort_separator, DevicePreference, OutputFormat, WorkspaceManager,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-splitter-server")]
#[command(about = "HTTP service for audio stem separation", long_about = None)]
#[command(version)]
struct Args {
    #[arg(long, env = "STEM_SPLITTER_BIND")]
    bind: Option<String>,

    #[arg(long, env = "STEM_SPLITTER_TMP_DIR")]
    workspace_root: Option<PathBuf>,

    #[arg(long, env = "STEM_SPLITTER_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    #[arg(long, env = "STEM_SPLITTER_MODEL", default_value = "")]
    model: String,

    #[arg(long, env = "STEM_SPLITTER_DEVICE", default_value = "auto")]
    device: DevicePreference,

    #[arg(long, env = "STEM_SPLITTER_FORMAT", default_value = "wav")]
    format: OutputFormat,

    #[arg(long, env = "STEM_SPLITTER_CLEANUP_RETENTION_SECS")]
    cleanup_retention_secs: Option<u64>,

    #[arg(long, env = "STEM_SPLITTER_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Maximum loaded model instances; unset keeps all
    #[arg(long, env = "STEM_SPLITTER_MODEL_CACHE_CAPACITY")]
    model_cache_capacity: Option<usize>,

    #[arg(long, env = "STEM_SPLITTER_MANIFEST_URL")]
    manifest_url: Option<String>,
}

impl Args {
    fn into_config(self) -> ServiceConfig {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            bind: self.bind.unwrap_or(defaults.bind),
            workspace_root: self.workspace_root.unwrap_or(defaults.workspace_root),
            max_upload_bytes: self.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            default_model: self.model,
            default_device: self.device,
            default_format: self.format,
            cleanup_retention_secs: self
                .cleanup_retention_secs
                .unwrap_or(defaults.cleanup_retention_secs),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            model_cache_capacity: self.model_cache_capacity,
            manifest_url_override: self.manifest_url,
        }
        .validate()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stem_splitter=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Args::parse().into_config();

    let separator = ort_separator(
        config.manifest_url_override.clone(),
        config.model_cache_capacity,
    )?;
    let workspaces = WorkspaceManager::new(&config.workspace_root)?;

    let bind = config.bind.clone();
    tracing::info!(
        %bind,
        workspace_root = %config.workspace_root.display(),
        max_upload_bytes = config.max_upload_bytes,
        accelerator = separator.resolver().accelerator_available(),
        "starting stem separation service"
    );

    let app = router(AppState::new(separator, workspaces, config));
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
