//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config
//! file. Every field has a default so a partial file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub management: ManagementConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Path to the `username:bcrypthash` passwords file. Absent disables
    /// authentication.
    pub passwords_file: Option<PathBuf>,

    /// Certificate files for TLS listeners. Required when `tls_ports` is
    /// non-empty.
    pub tls: Option<TlsFiles>,

    pub server: ListenConfig,

    pub worker: WorkerTuning,
}

/// PEM file paths for the serving certificate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsFiles {
    pub certificate: PathBuf,
    pub certificate_key: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Plain-TCP listen ports.
    pub ports: Vec<u16>,

    /// TLS-wrapped listen ports.
    pub tls_ports: Vec<u16>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ports: vec![8080],
            tls_ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerTuning {
    /// `0` selects the elastic pool; positive values preallocate exactly
    /// that many workers.
    pub pool_count: usize,

    /// Scratch buffer sizes in bytes; values under 512 are clamped up.
    pub read_buffer: usize,
    pub write_buffer: usize,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            pool_count: 0,
            read_buffer: 512,
            write_buffer: 512,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagementConfig {
    /// Path for the management channel's unix domain socket. Absent
    /// disables the channel.
    pub unix_socket: Option<PathBuf>,
}
