use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_YTDLP: &str = "yt-dlp";

/// Runtime settings, read from `MEDIAFETCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Working directory shared by all jobs; artifacts are named by job id.
    pub download_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    /// Decoded cookies.txt contents handed to yt-dlp, if configured.
    pub cookies: Option<Vec<u8>>,
    /// Cap on queued + running jobs. `None` admits everything.
    pub max_active_jobs: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            ytdlp_path: PathBuf::from(DEFAULT_YTDLP),
            ffmpeg_location: None,
            cookies: None,
            max_active_jobs: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine; real env vars still apply.
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| lookup(&vars, key);
        let mut config = Config::default();

        if let Some(addr) = get("MEDIAFETCH_ADDR") {
            config.addr = addr
                .parse()
                .with_context(|| format!("MEDIAFETCH_ADDR is not a socket address: {addr}"))?;
        }
        if let Some(dir) = get("MEDIAFETCH_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(bin) = get("MEDIAFETCH_YTDLP") {
            config.ytdlp_path = PathBuf::from(bin);
        }
        config.ffmpeg_location = get("MEDIAFETCH_FFMPEG_LOCATION").map(PathBuf::from);

        if let Some(encoded) = get("MEDIAFETCH_COOKIES_B64") {
            let decoded = STANDARD
                .decode(encoded)
                .context("MEDIAFETCH_COOKIES_B64 is not valid base64")?;
            config.cookies = Some(decoded);
        }

        if let Some(limit) = get("MEDIAFETCH_MAX_ACTIVE_JOBS") {
            let limit: usize = limit
                .parse()
                .with_context(|| format!("MEDIAFETCH_MAX_ACTIVE_JOBS must be a number: {limit}"))?;
            anyhow::ensure!(limit > 0, "MEDIAFETCH_MAX_ACTIVE_JOBS must be greater than zero");
            config.max_active_jobs = Some(limit);
        }

        Ok(config)
    }
}

fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
