//! Load config from file and environment.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fetch_core::{Keypair, MAX_MESSAGE_SIZE};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/peafetch/config.toml or /etc/peafetch/config.toml.
/// Env overrides: PEAFETCH_LISTEN_PORT, PEAFETCH_DATA_DIR, PEAFETCH_IDENTITY_FILE,
/// PEAFETCH_FETCH_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address (default 0.0.0.0).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    /// Listen TCP port (default 45680).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Directory whose files are served, one key per file name.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 32-byte secret key; generated on first run.
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,
    /// Ceiling for one outbound fetch (default 10).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Largest request or response accepted (default 1 MiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_listen_port() -> u16 {
    45680
}
fn default_data_dir() -> PathBuf {
    match home() {
        Some(h) => h.join(".local/share/peafetch/data"),
        None => PathBuf::from("data"),
    }
}
fn default_identity_file() -> PathBuf {
    match home() {
        Some(h) => h.join(".config/peafetch/identity.key"),
        None => PathBuf::from("identity.key"),
    }
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            data_dir: default_data_dir(),
            identity_file: default_identity_file(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("identity file {}: {source}", path.display())]
    Identity {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Config {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Parse one config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Apply env overrides; unparsable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(p) = var("PEAFETCH_LISTEN_PORT").and_then(|s| s.parse().ok()) {
            self.listen_port = p;
        }
        if let Some(d) = var("PEAFETCH_DATA_DIR") {
            self.data_dir = PathBuf::from(d);
        }
        if let Some(f) = var("PEAFETCH_IDENTITY_FILE") {
            self.identity_file = PathBuf::from(f);
        }
        if let Some(t) = var("PEAFETCH_FETCH_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.fetch_timeout_secs = t;
        }
    }

    /// Load or create the node identity at `identity_file`.
    pub fn keypair(&self) -> Result<Keypair, ConfigError> {
        load_or_create_identity(&self.identity_file).map_err(|source| ConfigError::Identity {
            path: self.identity_file.clone(),
            source,
        })
    }
}

/// Load config: `explicit` file if given, else the first existing default path, else
/// defaults; then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => Config::from_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => Config::from_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = home() {
        out.push(h.join(".config/peafetch/config.toml"));
    }
    out.push(PathBuf::from("/etc/peafetch/config.toml"));
    out
}

fn load_or_create_identity(path: &Path) -> std::io::Result<Keypair> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let secret: [u8; 32] = bytes.try_into().map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "expected 32 bytes")
            })?;
            Ok(Keypair::from_secret_bytes(secret))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let keypair = Keypair::generate();
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut opts = std::fs::OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(0o600);
            }
            opts.open(path)?.write_all(&keypair.secret_bytes())?;
            Ok(keypair)
        }
        Err(e) => Err(e),
    }
}
