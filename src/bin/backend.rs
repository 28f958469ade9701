use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, process::Command};
use tube_fetch::{
    cache::ResultCache,
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    pipeline::MediaPipeline,
    provider::{suggest::SuggestClient, ytdlp::YtDlpProvider},
    server,
    service::AppService,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "HTTP service for video search, suggestions and audio/video downloads."
)]
struct Cli {
    /// Env file with KEY=VALUE settings.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind, overriding HOST.
    #[arg(long, value_name = "ADDR")]
    host: Option<String>,

    /// Port to bind, overriding PORT.
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tube_fetch=debug,backend=debug".to_string()
        } else {
            "tube_fetch=info,backend=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let mut config = load_runtime_config_from(&cli.config)?;
    config.apply_port_env(std::env::var("PORT").ok().as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    config.prepare_work_dir()?;
    warn_if_unavailable(&config.ffmpeg_path, "-version").await;
    warn_if_unavailable(&config.ytdlp_path, "--version").await;

    let provider = YtDlpProvider::new(
        config.ytdlp_path.clone(),
        SuggestClient::new(config.suggest_endpoint.clone()),
    );
    let service = Arc::new(AppService::new(
        provider,
        ResultCache::new(config.cache_ttl),
        MediaPipeline::new(config.pipeline_config()),
    ));

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(
        work_dir = %config.work_dir.display(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "App is running on http://{}",
        addr
    );

    server::serve(listener, service).await
}

async fn warn_if_unavailable(program: &Path, version_flag: &str) {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {
            tracing::debug!(program = %program.display(), "found external tool");
        }
        Ok(status) => tracing::warn!(
            program = %program.display(),
            %status,
            "external tool did not run cleanly; downloads may fail"
        ),
        Err(err) => tracing::warn!(
            program = %program.display(),
            %err,
            "external tool not found; downloads may fail"
        ),
    }
}
