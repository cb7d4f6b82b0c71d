//! The process-private configuration directory and the trusted-server
//! store.
//!
//! `$XDG_CONFIG_HOME/pyutmremote` (falling back to
//! `~/.config/pyutmremote`), created with mode 0700, holds `client.crt`
//! (the identity) and `servers.json` (fingerprints the user has already
//! trusted, keyed by name, address, and port).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::fingerprint::Fingerprint;

/// Directory name under the XDG config root.
pub const CONFIG_DIR_NAME: &str = "pyutmremote";

/// File name of the client identity in the config dir.
pub const CERTIFICATE_FILE_NAME: &str = "client.crt";

const SERVERS_FILE_NAME: &str = "servers.json";

/// The config directory, created on first use.
pub fn config_dir() -> Result<PathBuf, ClientError> {
    let base = match env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = env::var_os("HOME").ok_or_else(|| {
                ClientError::Certificate("neither XDG_CONFIG_HOME nor HOME is set".to_owned())
            })?;
            PathBuf::from(home).join(".config")
        }
    };
    let dir = base.join(CONFIG_DIR_NAME);
    create_private_dir(&dir)?;
    Ok(dir)
}

/// Default location of the client identity.
pub fn default_certificate_path() -> Result<PathBuf, ClientError> {
    Ok(config_dir()?.join(CERTIFICATE_FILE_NAME))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<(), ClientError> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<(), ClientError> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// One remembered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedServer {
    /// Advertised or user-chosen display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Host name or address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Trusted connection fingerprint, `AA:BB:…` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// `servers.json`: the fingerprints the user has already trusted.
pub struct ServerStore {
    path: PathBuf,
    servers: Vec<SavedServer>,
}

impl ServerStore {
    /// Open the store in the default config directory.
    pub fn open_default() -> Result<Self, ClientError> {
        Ok(Self::open(config_dir()?.join(SERVERS_FILE_NAME)))
    }

    /// Open a store at `path`; a missing or unreadable file is an empty
    /// store.
    pub fn open(path: PathBuf) -> Self {
        let servers = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self { path, servers }
    }

    /// Persist the store.
    pub fn save(&self) -> Result<(), ClientError> {
        let text = serde_json::to_string(&self.servers)
            .map_err(|error| std::io::Error::other(error.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// All remembered servers.
    pub fn servers(&self) -> &[SavedServer] {
        &self.servers
    }

    /// The trusted fingerprint for `address:port`, when one is remembered
    /// and still parses.
    pub fn fingerprint_for(&self, address: &str, port: u16) -> Option<Fingerprint> {
        self.servers
            .iter()
            .find(|server| server.address == address && server.port == port)
            .and_then(|server| server.fingerprint.as_deref())
            .and_then(|text| Fingerprint::from_str(text).ok())
    }

    /// Remember `fingerprint` for `address:port`, updating an existing
    /// entry in place.
    pub fn remember(&mut self, address: &str, port: u16, fingerprint: &Fingerprint) {
        let text = fingerprint.to_string();
        match self
            .servers
            .iter_mut()
            .find(|server| server.address == address && server.port == port)
        {
            Some(server) => server.fingerprint = Some(text),
            None => self.servers.push(SavedServer {
                name: None,
                address: address.to_owned(),
                port,
                fingerprint: Some(text),
            }),
        }
    }

    /// Drop the entry for `address:port`.
    pub fn forget(&mut self, address: &str, port: u16) {
        self.servers.retain(|server| server.address != address || server.port != port);
    }
}
