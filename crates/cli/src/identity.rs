//! Private key files.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::{ClientIdentity, Credentials};
use tracing::{debug, info};

/// Loads a private key from a raw 32-byte seed or OpenSSH key file.
pub fn load_identity(path: &Path) -> Result<ClientIdentity> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read private key: {}", path.display()))?;
    let identity = ClientIdentity::from_key_material(&bytes)
        .with_context(|| format!("Failed to load private key: {}", path.display()))?;

    debug!(fingerprint = %identity.fingerprint(), "loaded private key from {:?}", path);
    Ok(identity)
}

/// Where the client's credentials come from.
///
/// A key file is only read once the daemon issues a challenge.
#[derive(Debug, Clone, Default)]
pub enum CredentialSource {
    /// No key configured.
    #[default]
    Anonymous,
    /// Credentials already in memory.
    Inline(Credentials),
    /// A private key file on disk.
    KeyFile {
        /// Name sent with the signature.
        identity: String,
        /// Path to the private key.
        path: PathBuf,
    },
}

impl CredentialSource {
    /// Credentials available without touching the filesystem.
    pub fn preloaded(&self) -> Option<Credentials> {
        match self {
            CredentialSource::Inline(credentials) => Some(credentials.clone()),
            _ => None,
        }
    }

    /// Resolves the credentials, reading the key file if there is one.
    pub fn load(&self) -> Result<Option<Credentials>> {
        match self {
            CredentialSource::Anonymous => Ok(None),
            CredentialSource::Inline(credentials) => Ok(Some(credentials.clone())),
            CredentialSource::KeyFile { identity, path } => Ok(Some(Credentials {
                identity: identity.clone(),
                key: load_identity(path)?,
            })),
        }
    }
}

impl From<Option<Credentials>> for CredentialSource {
    fn from(credentials: Option<Credentials>) -> Self {
        credentials.map_or(CredentialSource::Anonymous, CredentialSource::Inline)
    }
}

/// Generates a new identity and writes its seed to `path`.
///
/// The file is created with owner-only permissions. An existing file is
/// never overwritten.
pub fn generate_identity(path: &Path) -> Result<ClientIdentity> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).with_context(|| {
        format!(
            "Failed to create private key {} (refusing to overwrite an existing file)",
            path.display()
        )
    })?;

    let identity = ClientIdentity::generate();
    file.write_all(&identity.secret_key_bytes())
        .with_context(|| format!("Failed to write private key: {}", path.display()))?;

    info!("Generated new client identity and saved to {:?}", path);
    Ok(identity)
}
