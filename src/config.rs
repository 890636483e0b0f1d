use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{NodeError, Result};
use crate::worker::staging::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_PORT: u16 = 7070;
pub const DEFAULT_CONTROLLER_TIMEOUT_MS: u64 = 10_000;
pub const ENV_PREFIX: &str = "RAWNODE";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    /// Address the intake API listens on
    pub listen_addr: SocketAddr,
    /// Base directory for relative dataset paths. Empty means paths are used as given.
    pub data_root: PathBuf,
    /// Where working copies are created
    pub work_dir: PathBuf,
    /// Bytes per chunk when staging datasets
    pub chunk_size: usize,
    /// Controller to report to at startup, if known
    pub controller_url: Option<String>,
    pub controller_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            data_root: PathBuf::new(),
            work_dir: std::env::temp_dir().join("rawnode"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            controller_url: None,
            controller_timeout_ms: DEFAULT_CONTROLLER_TIMEOUT_MS,
        }
    }
}

/// On-disk settings. Every key is optional and falls back to the default.
#[derive(Debug, Default, Deserialize)]
struct Settings {
    node_id: Option<u64>,
    listen_host: Option<IpAddr>,
    listen_port: Option<u16>,
    data_root: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
    controller_url: Option<String>,
    controller_timeout_ms: Option<u64>,
}

impl NodeConfig {
    pub fn new(node_id: u64, listen_addr: SocketAddr) -> Self {
        Self {
            node_id,
            listen_addr,
            ..Default::default()
        }
    }

    /// Load a TOML settings file, then apply `RAWNODE_*` environment overrides
    /// (e.g. `RAWNODE_LISTEN_PORT`, `RAWNODE_DATA_ROOT`).
    pub fn from_settings_file(path: &Path) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        Self::default().apply(settings).validated()
    }

    /// Defaults plus `RAWNODE_*` environment overrides only.
    pub fn from_env() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        Self::default().apply(settings).validated()
    }

    fn apply(mut self, settings: Settings) -> Self {
        if let Some(node_id) = settings.node_id {
            self.node_id = node_id;
        }
        if let Some(host) = settings.listen_host {
            self.listen_addr.set_ip(host);
        }
        if let Some(port) = settings.listen_port {
            self.listen_addr.set_port(port);
        }
        if let Some(data_root) = settings.data_root {
            self.data_root = data_root;
        }
        if let Some(work_dir) = settings.work_dir {
            self.work_dir = work_dir;
        }
        if let Some(chunk_size) = settings.chunk_size {
            self.chunk_size = chunk_size;
        }
        if settings.controller_url.is_some() {
            self.controller_url = settings.controller_url;
        }
        if let Some(timeout) = settings.controller_timeout_ms {
            self.controller_timeout_ms = timeout;
        }
        self
    }

    pub fn validated(self) -> Result<Self> {
        if self.chunk_size == 0 {
            return Err(NodeError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.controller_timeout_ms == 0 {
            return Err(NodeError::InvalidConfig(
                "controller_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_controller(mut self, url: impl Into<String>) -> Self {
        self.controller_url = Some(url.into());
        self
    }

    pub fn controller_timeout(&self) -> Duration {
        Duration::from_millis(self.controller_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.node_id, 1);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:7070");
        assert!(cfg.data_root.as_os_str().is_empty());
        assert_eq!(cfg.chunk_size, 5 * 1024 * 1024);
        assert!(cfg.controller_url.is_none());
        assert_eq!(cfg.controller_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn node_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new(42, addr);
        assert_eq!(cfg.node_id, 42);
        assert_eq!(cfg.listen_addr, addr);
    }

    #[test]
    fn node_config_builders() {
        let cfg = NodeConfig::default()
            .with_data_root("/data")
            .with_work_dir("/scratch")
            .with_chunk_size(1024)
            .with_controller("http://controller:8080");
        assert_eq!(cfg.data_root, PathBuf::from("/data"));
        assert_eq!(cfg.work_dir, PathBuf::from("/scratch"));
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.controller_url.as_deref(), Some("http://controller:8080"));
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
listen_port = 9123
data_root = "/srv/rawdata"
chunk_size = 4096
controller_url = "http://controller:8080"
"#,
        )
        .unwrap();

        let cfg = NodeConfig::from_settings_file(&path).unwrap();
        assert_eq!(cfg.listen_addr.port(), 9123);
        assert_eq!(cfg.data_root, PathBuf::from("/srv/rawdata"));
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.controller_url.as_deref(), Some("http://controller:8080"));
        assert_eq!(cfg.controller_timeout_ms, DEFAULT_CONTROLLER_TIMEOUT_MS);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        let err = NodeConfig::from_settings_file(&path).unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: chunk_size must be greater than zero"
        );
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::from_settings_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
