use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    cache::DEFAULT_TTL,
    pipeline::{DEFAULT_FFMPEG_PROGRAM, PipelineConfig},
    provider::{suggest::DEFAULT_SUGGEST_ENDPOINT, ytdlp::DEFAULT_YTDLP_PROGRAM},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tube-fetch-env";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Values read from the `KEY=VALUE` env file. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub cache_ttl_secs: Option<u64>,
    pub suggest_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
    pub work_dir: PathBuf,
    pub cache_ttl: Duration,
    pub suggest_endpoint: String,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "HOST" => cfg.host = Some(value.to_string()),
            "PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing PORT from {}", path.display()))?;
                cfg.port = Some(port);
            }
            "FFMPEG_PATH" => cfg.ffmpeg_path = Some(PathBuf::from(value)),
            "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
            "WORK_DIR" => cfg.work_dir = Some(PathBuf::from(value)),
            "CACHE_TTL_SECS" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Parsing CACHE_TTL_SECS from {}", path.display()))?;
                cfg.cache_ttl_secs = Some(secs);
            }
            "SUGGEST_ENDPOINT" => cfg.suggest_endpoint = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(Some(cfg))
}

/// Loads the env file at `path`. A missing file means defaults everywhere.
pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(RuntimeConfig::from_env_config(cfg))
}

impl RuntimeConfig {
    pub fn from_env_config(cfg: EnvConfig) -> Self {
        Self {
            host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            ffmpeg_path: cfg
                .ffmpeg_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_PROGRAM)),
            ytdlp_path: cfg
                .ytdlp_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_PROGRAM)),
            work_dir: cfg.work_dir.unwrap_or_else(std::env::temp_dir),
            cache_ttl: cfg
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TTL),
            suggest_endpoint: cfg
                .suggest_endpoint
                .unwrap_or_else(|| DEFAULT_SUGGEST_ENDPOINT.to_string()),
        }
    }

    /// Applies the `PORT` environment variable, which wins over the file.
    pub fn apply_port_env(&mut self, value: Option<&str>) -> Result<()> {
        let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(());
        };
        self.port = value
            .parse()
            .with_context(|| format!("Parsing PORT environment variable {value:?}"))?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|err| anyhow!("Invalid host {:?}: {err}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ffmpeg: self.ffmpeg_path.clone(),
            work_dir: self.work_dir.clone(),
        }
    }

    pub fn prepare_work_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("Creating work dir {}", self.work_dir.display()))
    }
}
